//! Router and health probe configuration.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Routing and health probe settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    /// Upper bound for a single health probe, e.g. `"5s"`.
    #[serde(deserialize_with = "deserialize_duration")]
    pub probe_timeout: Duration,
    /// How many times a failed probe is retried before the candidate is
    /// skipped for the current request.
    pub probe_retries: u32,
    /// Base delay for probe retry backoff. Attempt `n` waits
    /// `probe_backoff * 2^(n-1)` plus jitter.
    #[serde(deserialize_with = "deserialize_duration")]
    pub probe_backoff: Duration,
    /// Upper bound for a completion dispatch against the upstream.
    #[serde(deserialize_with = "deserialize_duration")]
    pub dispatch_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            probe_retries: 3,
            probe_backoff: Duration::from_millis(200),
            dispatch_timeout: Duration::from_secs(30),
        }
    }
}
