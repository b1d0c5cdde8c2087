//! Usage analytics configuration.

use serde::Deserialize;

/// Usage analytics settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyticsConfig {
    /// Fallback input price (USD per one million tokens) used when the
    /// actual model has no catalog entry at record time.
    pub default_input_price: f64,
    /// Fallback output price (USD per one million tokens).
    pub default_output_price: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_input_price: 0.5,
            default_output_price: 1.5,
        }
    }
}
