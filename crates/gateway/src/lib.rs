//! Switchboard gateway core: the request plane of an OpenAI-compatible
//! multi-provider LLM gateway.
//!
//! The crate exposes typed entry points ([`Gateway`]) that a framing
//! layer calls after authentication and JSON parsing. One request flows
//! validate → endpoint rewrite → cache lookup → routing → upstream
//! dispatch → cache store, with usage analytics and webhook events
//! recorded along the way. Batches fan the same pipeline across many
//! child requests under a bounded-concurrency scheduler.
//!
//! Provider integrations stay behind the [`upstream::UpstreamAdapter`]
//! capability; the core never speaks a provider wire format itself.

pub mod analytics;
pub mod batch;
pub mod cache;
pub mod catalog;
mod clock;
pub mod endpoint;
mod error;
mod http_client;
pub mod messages;
pub mod router;
mod server;
pub mod upstream;
pub mod validate;
pub mod webhook;

pub use error::{Error, Result};
pub use server::{ChunkStream, Gateway, GatewayBuilder, RequestContext};

pub use catalog::{AUTO_MODEL, ModelCatalog, ModelFeatures, ModelInfo};
pub use messages::{ChatMessage, ModelRequest, ModelResponse, RouteStrategy, TokenUsage};
pub use upstream::UpstreamAdapter;
