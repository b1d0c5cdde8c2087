//! Custom endpoints: named presets merged into incoming requests.
//!
//! An endpoint pins a base model, routing strategy, fallbacks, default
//! sampling parameters, and an optional system prompt under a stable id.
//! Owners manage their endpoints through the per-owner CRUD surface;
//! other callers can only resolve an endpoint marked public.

use dashmap::DashMap;
use serde_json::Value;

use crate::clock;
use crate::error::{Error, Result};
use crate::messages::{ChatMessage, ModelRequest, RouteStrategy};

/// A stored endpoint preset.
#[derive(Debug, Clone)]
pub struct CustomEndpoint {
    pub id: String,
    pub owner: String,
    pub name: String,
    /// Model substituted into every request resolved through this endpoint.
    pub base_model: String,
    pub fallbacks: Vec<String>,
    pub routing_strategy: RouteStrategy,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Prepended as a system message when the caller supplied none.
    pub system_prompt: Option<String>,
    pub is_public: bool,
    /// Requests per minute. Stored for the deployment to enforce; the core
    /// does not rate limit.
    pub rate_limit: Option<u32>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl CustomEndpoint {
    fn visible_to(&self, caller: &str) -> bool {
        self.owner == caller || self.is_public
    }
}

/// Parameters for creating an endpoint.
#[derive(Debug, Clone, Default)]
pub struct NewEndpoint {
    pub name: String,
    pub base_model: String,
    pub fallbacks: Vec<String>,
    pub routing_strategy: RouteStrategy,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    pub is_public: bool,
    pub rate_limit: Option<u32>,
}

/// Partial update; `None` fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct EndpointUpdate {
    pub name: Option<String>,
    pub base_model: Option<String>,
    pub fallbacks: Option<Vec<String>>,
    pub routing_strategy: Option<RouteStrategy>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    pub is_public: Option<bool>,
    pub rate_limit: Option<u32>,
}

/// Process-wide endpoint store with per-owner isolation.
#[derive(Debug, Default)]
pub struct EndpointStore {
    endpoints: DashMap<String, CustomEndpoint>,
}

impl EndpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, owner: &str, params: NewEndpoint) -> Result<CustomEndpoint> {
        if params.name.is_empty() {
            return Err(Error::InvalidRequest("endpoint name must not be empty".into()));
        }

        if params.base_model.is_empty() {
            return Err(Error::InvalidRequest("endpoint base_model must not be empty".into()));
        }

        let now = clock::unix_now_secs();
        let endpoint = CustomEndpoint {
            id: format!("ep_{}", uuid::Uuid::new_v4().simple()),
            owner: owner.to_string(),
            name: params.name,
            base_model: params.base_model,
            fallbacks: params.fallbacks,
            routing_strategy: params.routing_strategy,
            temperature: params.temperature,
            top_p: params.top_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            max_tokens: params.max_tokens,
            system_prompt: params.system_prompt,
            is_public: params.is_public,
            rate_limit: params.rate_limit,
            created_at: now,
            updated_at: now,
        };

        self.endpoints.insert(endpoint.id.clone(), endpoint.clone());
        log::debug!("Created endpoint '{}' for owner '{owner}'", endpoint.id);

        Ok(endpoint)
    }

    /// Resolve an endpoint the caller may read.
    pub fn get(&self, id: &str, caller: &str) -> Result<CustomEndpoint> {
        self.endpoints
            .get(id)
            .filter(|endpoint| endpoint.visible_to(caller))
            .map(|endpoint| endpoint.clone())
            .ok_or_else(|| Error::NotFound(format!("endpoint '{id}'")))
    }

    /// Apply a partial update. Only the owner may mutate.
    pub fn update(&self, id: &str, caller: &str, update: EndpointUpdate) -> Result<CustomEndpoint> {
        let mut entry = self
            .endpoints
            .get_mut(id)
            .filter(|endpoint| endpoint.owner == caller)
            .ok_or_else(|| Error::NotFound(format!("endpoint '{id}'")))?;

        if let Some(name) = update.name {
            entry.name = name;
        }
        if let Some(base_model) = update.base_model {
            entry.base_model = base_model;
        }
        if let Some(fallbacks) = update.fallbacks {
            entry.fallbacks = fallbacks;
        }
        if let Some(strategy) = update.routing_strategy {
            entry.routing_strategy = strategy;
        }
        if update.temperature.is_some() {
            entry.temperature = update.temperature;
        }
        if update.top_p.is_some() {
            entry.top_p = update.top_p;
        }
        if update.frequency_penalty.is_some() {
            entry.frequency_penalty = update.frequency_penalty;
        }
        if update.presence_penalty.is_some() {
            entry.presence_penalty = update.presence_penalty;
        }
        if update.max_tokens.is_some() {
            entry.max_tokens = update.max_tokens;
        }
        if update.system_prompt.is_some() {
            entry.system_prompt = update.system_prompt;
        }
        if let Some(is_public) = update.is_public {
            entry.is_public = is_public;
        }
        if update.rate_limit.is_some() {
            entry.rate_limit = update.rate_limit;
        }

        entry.updated_at = clock::unix_now_secs();

        Ok(entry.clone())
    }

    /// Delete an endpoint. Only the owner may delete.
    pub fn delete(&self, id: &str, caller: &str) -> Result<CustomEndpoint> {
        let owned = self
            .endpoints
            .get(id)
            .map(|endpoint| endpoint.owner == caller)
            .unwrap_or(false);

        if !owned {
            return Err(Error::NotFound(format!("endpoint '{id}'")));
        }

        self.endpoints
            .remove(id)
            .map(|(_, endpoint)| endpoint)
            .ok_or_else(|| Error::NotFound(format!("endpoint '{id}'")))
    }

    /// Endpoints visible to the caller: their own plus public ones.
    pub fn list(&self, caller: &str) -> Vec<CustomEndpoint> {
        let mut endpoints: Vec<_> = self
            .endpoints
            .iter()
            .filter(|endpoint| endpoint.visible_to(caller))
            .map(|endpoint| endpoint.clone())
            .collect();

        endpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        endpoints
    }

    /// Summary payload for endpoint lifecycle webhook events.
    pub(crate) fn event_payload(endpoint: &CustomEndpoint) -> Value {
        serde_json::json!({
            "endpoint_id": endpoint.id,
            "name": endpoint.name,
            "base_model": endpoint.base_model,
            "is_public": endpoint.is_public,
        })
    }
}

/// Merge an endpoint preset into a request. The caller's explicit values
/// always win; the preset only fills gaps.
///
/// Applying the rewrite twice yields the same request, which keeps retry
/// paths free to re-enter the pipeline.
pub fn rewrite_request(request: &ModelRequest, endpoint: &CustomEndpoint) -> ModelRequest {
    let mut rewritten = request.clone();

    rewritten.model = endpoint.base_model.clone();
    rewritten.route = Some(endpoint.routing_strategy);

    if rewritten.fallbacks.is_none() && !endpoint.fallbacks.is_empty() {
        rewritten.fallbacks = Some(endpoint.fallbacks.clone());
    }

    if let Some(system_prompt) = &endpoint.system_prompt
        && !rewritten.has_system_message()
    {
        rewritten.messages.insert(0, ChatMessage::system(system_prompt.clone()));
    }

    rewritten.temperature = rewritten.temperature.or(endpoint.temperature);
    rewritten.top_p = rewritten.top_p.or(endpoint.top_p);
    rewritten.frequency_penalty = rewritten.frequency_penalty.or(endpoint.frequency_penalty);
    rewritten.presence_penalty = rewritten.presence_penalty.or(endpoint.presence_penalty);
    rewritten.max_tokens = rewritten.max_tokens.or(endpoint.max_tokens);

    rewritten
}
