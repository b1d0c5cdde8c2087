//! Batch processor configuration.

use serde::Deserialize;

/// Batch processor settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Maximum number of child dispatches in flight across the whole
    /// process.
    pub max_concurrent_requests: usize,
    /// Maximum number of child requests accepted in a single batch.
    pub max_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 5,
            max_batch_size: 100,
        }
    }
}
