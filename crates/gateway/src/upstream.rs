//! The upstream adapter capability.
//!
//! One adapter is registered per provider (OpenAI, Anthropic, Google, …).
//! Adapters translate the gateway's neutral request into provider-native
//! calls and back; the gateway never speaks a provider wire format
//! itself. Translation details, authentication, and connection handling
//! all live behind this seam.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::messages::{FinishReason, ModelRequest, TokenUsage};

/// Neutral completion result returned by an adapter.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
    /// Provider-assigned response id, when one exists.
    pub raw_id: Option<String>,
}

/// One incremental piece of a streamed completion.
#[derive(Debug, Clone, Default)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub finish_reason: Option<FinishReason>,
}

/// A stream of completion deltas from an adapter.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta>> + Send>>;

/// Per-provider capability the gateway dispatches through.
///
/// `model_id` arguments are always the full namespaced id from the
/// catalog; adapters strip the provider prefix themselves if their API
/// wants the bare name.
#[async_trait]
pub trait UpstreamAdapter: Send + Sync {
    /// Provider name this adapter serves, matching the catalog's
    /// `provider` segment.
    fn provider(&self) -> &str;

    /// Health probe for a specific model. The router bounds the call with
    /// its configured probe timeout; adapters should still avoid blocking
    /// indefinitely.
    async fn available(&self, model_id: &str) -> bool;

    /// Execute a completion against the provider.
    async fn complete(&self, model_id: &str, request: &ModelRequest) -> Result<CompletionOutcome>;

    /// Open a streaming completion against the provider.
    async fn stream(&self, model_id: &str, request: &ModelRequest) -> Result<DeltaStream>;
}

/// Registry of adapters keyed by provider name.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<String, Arc<dyn UpstreamAdapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its provider name. Registering the same
    /// provider twice replaces the earlier adapter.
    pub fn register(&mut self, adapter: Arc<dyn UpstreamAdapter>) {
        self.adapters.insert(adapter.provider().to_string(), adapter);
    }

    pub fn get(&self, provider: &str) -> Option<&Arc<dyn UpstreamAdapter>> {
        self.adapters.get(provider)
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }
}

impl std::fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSet")
            .field("providers", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}
