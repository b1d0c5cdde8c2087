//! Switchboard configuration structures to map the switchboard.toml configuration.

#![deny(missing_docs)]

mod analytics;
mod batch;
mod cache;
mod catalog;
mod loader;
mod router;
mod webhooks;

use std::path::Path;

pub use analytics::AnalyticsConfig;
pub use batch::BatchConfig;
pub use cache::{CacheConfig, CacheKeyStrategy};
pub use catalog::{CatalogConfig, ModelEntry, ModelFeaturesEntry};
pub use router::RouterConfig;
pub use webhooks::WebhooksConfig;

use serde::Deserialize;

/// Main configuration structure for the Switchboard gateway.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Model catalog overrides and additions.
    pub catalog: CatalogConfig,
    /// Routing and health probe settings.
    pub router: RouterConfig,
    /// Response cache settings.
    pub cache: CacheConfig,
    /// Batch processor settings.
    pub batch: BatchConfig,
    /// Webhook delivery settings.
    pub webhooks: WebhooksConfig,
    /// Usage analytics settings.
    pub analytics: AnalyticsConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validate cross-field invariants of the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }
}
