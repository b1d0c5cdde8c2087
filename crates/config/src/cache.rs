//! Response cache configuration.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Response cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Whether responses are cached at all. When disabled, `get` always
    /// misses and `set` is a no-op.
    pub enabled: bool,
    /// Time-to-live for cache entries, e.g. `"1h"`.
    #[serde(deserialize_with = "deserialize_duration")]
    pub ttl: Duration,
    /// How request fingerprints are derived.
    pub key_strategy: CacheKeyStrategy,
    /// Exclude `temperature` from the fingerprint.
    pub ignore_temperature: bool,
    /// Exclude `top_p` from the fingerprint.
    pub ignore_top_p: bool,
    /// Cadence of the background sweep that removes expired entries.
    #[serde(deserialize_with = "deserialize_duration")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(3600),
            key_strategy: CacheKeyStrategy::Exact,
            ignore_temperature: false,
            ignore_top_p: false,
            sweep_interval: Duration::from_secs(300),
        }
    }
}

/// Fingerprint derivation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheKeyStrategy {
    /// Hash the full canonicalized request, messages sorted by
    /// `(role, canonical json)`.
    #[default]
    Exact,
    /// Hash only the user messages, lowercased and whitespace-trimmed.
    Semantic,
}
