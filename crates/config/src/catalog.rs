//! Model catalog configuration.

use indexmap::IndexMap;
use serde::Deserialize;

/// Catalog section: models declared here are merged over the built-in
/// catalog at startup, keyed by their namespaced `provider/name` id.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    /// Model entries keyed by namespaced id, e.g. `openai/gpt-4o`.
    pub models: IndexMap<String, ModelEntry>,
}

/// A single model catalog entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelEntry {
    /// Human-readable model name.
    pub display_name: Option<String>,
    /// Context window size in tokens.
    pub context_window: u32,
    /// Input price in USD per one million tokens.
    pub input_price: f64,
    /// Output price in USD per one million tokens.
    pub output_price: f64,
    /// Maximum tokens the model will generate in one response.
    pub max_output_tokens: u32,
    /// Free-form capability tags, e.g. `"reasoning"` or `"coding"`.
    pub strengths: Vec<String>,
    /// Feature support flags.
    pub features: ModelFeaturesEntry,
    /// Catalog-recommended fallback model ids, tried in order by the
    /// `default` routing strategy.
    pub fallbacks: Vec<String>,
}

impl Default for ModelEntry {
    fn default() -> Self {
        Self {
            display_name: None,
            context_window: 8192,
            input_price: 0.0,
            output_price: 0.0,
            max_output_tokens: 4096,
            strengths: Vec::new(),
            features: ModelFeaturesEntry::default(),
            fallbacks: Vec::new(),
        }
    }
}

/// Feature support flags for a catalog entry.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ModelFeaturesEntry {
    /// Accepts image content parts.
    pub vision: bool,
    /// Supports the legacy `functions` API.
    pub function_calling: bool,
    /// Supports the `tools` API.
    pub tool_use: bool,
    /// Supports `response_format: json_object`.
    pub json_mode: bool,
}
