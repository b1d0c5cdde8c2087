//! Process-wide read-only model catalog.
//!
//! The catalog is built once at startup from compiled-in defaults merged
//! with `[catalog.models]` configuration entries, then shared immutably.
//! Every model is keyed by its namespaced id (`provider/name`).

use config::{CatalogConfig, ModelEntry};
use indexmap::IndexMap;
use serde::Serialize;

/// Reserved model id that delegates the choice entirely to the router.
pub const AUTO_MODEL: &str = "auto";

/// Feature support flags for a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModelFeatures {
    pub vision: bool,
    pub function_calling: bool,
    pub tool_use: bool,
    pub json_mode: bool,
}

impl ModelFeatures {
    /// Whether this feature set covers everything in `required`.
    pub fn covers(&self, required: &ModelFeatures) -> bool {
        (self.vision || !required.vision)
            && (self.function_calling || !required.function_calling)
            && (self.tool_use || !required.tool_use)
            && (self.json_mode || !required.json_mode)
    }

    /// Whether no feature is required.
    pub fn is_empty(&self) -> bool {
        !(self.vision || self.function_calling || self.tool_use || self.json_mode)
    }
}

/// Immutable catalog entry for one model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    /// Namespaced id, `provider/name`.
    pub id: String,
    /// Provider segment of the id.
    pub provider: String,
    pub display_name: String,
    /// Context window in tokens.
    pub context_window: u32,
    /// USD per one million input tokens.
    pub input_price: f64,
    /// USD per one million output tokens.
    pub output_price: f64,
    pub strengths: Vec<String>,
    pub features: ModelFeatures,
    pub max_output_tokens: u32,
    /// Catalog-recommended fallbacks, tried in order by the `default`
    /// routing strategy.
    pub fallbacks: Vec<String>,
}

impl ModelInfo {
    /// Combined price used by the `lowest_cost` strategy.
    pub fn combined_price(&self) -> f64 {
        self.input_price + self.output_price
    }
}

/// The read-only model catalog.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: IndexMap<String, ModelInfo>,
}

impl ModelCatalog {
    /// Compiled-in defaults only.
    pub fn builtin() -> Self {
        let mut models = IndexMap::new();

        for model in builtin_models() {
            models.insert(model.id.clone(), model);
        }

        Self { models }
    }

    /// Compiled-in defaults merged with configuration entries. Config
    /// entries replace built-in models with the same id.
    pub fn from_config(config: &CatalogConfig) -> Self {
        let mut catalog = Self::builtin();

        for (id, entry) in &config.models {
            let model = model_from_entry(id, entry);
            catalog.models.insert(id.clone(), model);
        }

        catalog
    }

    pub fn get(&self, id: &str) -> Option<&ModelInfo> {
        self.models.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.models.contains_key(id)
    }

    /// All models in stable declaration order.
    pub fn models(&self) -> impl Iterator<Item = &ModelInfo> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn model_from_entry(id: &str, entry: &ModelEntry) -> ModelInfo {
    let provider = id.split_once('/').map(|(provider, _)| provider).unwrap_or_default();

    ModelInfo {
        id: id.to_string(),
        provider: provider.to_string(),
        display_name: entry.display_name.clone().unwrap_or_else(|| id.to_string()),
        context_window: entry.context_window,
        input_price: entry.input_price,
        output_price: entry.output_price,
        strengths: entry.strengths.clone(),
        features: ModelFeatures {
            vision: entry.features.vision,
            function_calling: entry.features.function_calling,
            tool_use: entry.features.tool_use,
            json_mode: entry.features.json_mode,
        },
        max_output_tokens: entry.max_output_tokens,
        fallbacks: entry.fallbacks.clone(),
    }
}

struct BuiltinModel {
    id: &'static str,
    display_name: &'static str,
    context_window: u32,
    input_price: f64,
    output_price: f64,
    strengths: &'static [&'static str],
    features: ModelFeatures,
    max_output_tokens: u32,
    fallbacks: &'static [&'static str],
}

const ALL_FEATURES: ModelFeatures = ModelFeatures {
    vision: true,
    function_calling: true,
    tool_use: true,
    json_mode: true,
};

const TEXT_TOOLING: ModelFeatures = ModelFeatures {
    vision: false,
    function_calling: true,
    tool_use: true,
    json_mode: true,
};

const VISION_TOOLS: ModelFeatures = ModelFeatures {
    vision: true,
    function_calling: false,
    tool_use: true,
    json_mode: false,
};

fn builtin_models() -> Vec<ModelInfo> {
    // Prices are USD per million tokens. The relative ordering matters to
    // the lowest_cost strategy; keep claude-3-haiku the cheapest combined.
    const BUILTIN: &[BuiltinModel] = &[
        BuiltinModel {
            id: "openai/gpt-4o",
            display_name: "GPT-4o",
            context_window: 128_000,
            input_price: 5.0,
            output_price: 15.0,
            strengths: &["reasoning", "vision", "coding"],
            features: ALL_FEATURES,
            max_output_tokens: 4096,
            fallbacks: &["openai/gpt-4-turbo", "anthropic/claude-3-sonnet"],
        },
        BuiltinModel {
            id: "openai/gpt-4-turbo",
            display_name: "GPT-4 Turbo",
            context_window: 128_000,
            input_price: 10.0,
            output_price: 30.0,
            strengths: &["reasoning", "coding"],
            features: TEXT_TOOLING,
            max_output_tokens: 4096,
            fallbacks: &["openai/gpt-4o", "openai/gpt-3.5-turbo"],
        },
        BuiltinModel {
            id: "openai/gpt-3.5-turbo",
            display_name: "GPT-3.5 Turbo",
            context_window: 16_385,
            input_price: 0.5,
            output_price: 1.5,
            strengths: &["speed", "chat"],
            features: TEXT_TOOLING,
            max_output_tokens: 4096,
            fallbacks: &["anthropic/claude-3-haiku"],
        },
        BuiltinModel {
            id: "anthropic/claude-3-opus",
            display_name: "Claude 3 Opus",
            context_window: 200_000,
            input_price: 15.0,
            output_price: 75.0,
            strengths: &["reasoning", "writing", "vision"],
            features: VISION_TOOLS,
            max_output_tokens: 4096,
            fallbacks: &["anthropic/claude-3-sonnet", "openai/gpt-4o"],
        },
        BuiltinModel {
            id: "anthropic/claude-3-sonnet",
            display_name: "Claude 3 Sonnet",
            context_window: 200_000,
            input_price: 3.0,
            output_price: 15.0,
            strengths: &["writing", "vision"],
            features: VISION_TOOLS,
            max_output_tokens: 4096,
            fallbacks: &["anthropic/claude-3-haiku"],
        },
        BuiltinModel {
            id: "anthropic/claude-3-haiku",
            display_name: "Claude 3 Haiku",
            context_window: 200_000,
            input_price: 0.25,
            output_price: 1.25,
            strengths: &["speed", "vision"],
            features: VISION_TOOLS,
            max_output_tokens: 4096,
            fallbacks: &["openai/gpt-3.5-turbo"],
        },
        BuiltinModel {
            id: "google/gemini-pro",
            display_name: "Gemini Pro",
            context_window: 1_000_000,
            input_price: 3.5,
            output_price: 10.5,
            strengths: &["reasoning", "long-context"],
            features: ALL_FEATURES,
            max_output_tokens: 8192,
            fallbacks: &["google/gemini-flash"],
        },
        BuiltinModel {
            id: "google/gemini-flash",
            display_name: "Gemini Flash",
            context_window: 1_000_000,
            input_price: 0.5,
            output_price: 1.5,
            strengths: &["speed", "long-context"],
            features: ALL_FEATURES,
            max_output_tokens: 8192,
            fallbacks: &["anthropic/claude-3-haiku"],
        },
        BuiltinModel {
            id: "meta/llama-3-70b",
            display_name: "Llama 3 70B",
            context_window: 8192,
            input_price: 0.9,
            output_price: 0.9,
            strengths: &["open-weights", "chat"],
            features: ModelFeatures {
                vision: false,
                function_calling: false,
                tool_use: false,
                json_mode: false,
            },
            max_output_tokens: 4096,
            fallbacks: &["openai/gpt-3.5-turbo"],
        },
    ];

    BUILTIN
        .iter()
        .map(|model| ModelInfo {
            id: model.id.to_string(),
            provider: model
                .id
                .split_once('/')
                .map(|(provider, _)| provider)
                .unwrap_or_default()
                .to_string(),
            display_name: model.display_name.to_string(),
            context_window: model.context_window,
            input_price: model.input_price,
            output_price: model.output_price,
            strengths: model.strengths.iter().map(|s| s.to_string()).collect(),
            features: model.features,
            max_output_tokens: model.max_output_tokens,
            fallbacks: model.fallbacks.iter().map(|s| s.to_string()).collect(),
        })
        .collect()
}
