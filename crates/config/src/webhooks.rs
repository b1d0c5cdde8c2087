//! Webhook delivery configuration.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Webhook delivery settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebhooksConfig {
    /// Upper bound for a single delivery attempt, e.g. `"10s"`.
    #[serde(deserialize_with = "deserialize_duration")]
    pub delivery_timeout: Duration,
    /// Retry count applied to webhooks that do not specify their own.
    pub default_retries: u32,
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(10),
            default_retries: 3,
        }
    }
}
