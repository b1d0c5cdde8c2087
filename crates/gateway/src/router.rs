//! Strategy-driven model selection with health probing and fallback.
//!
//! Routing happens per request and carries no state between requests:
//! every candidate is probed through the adapter before dispatch, and a
//! failed probe only removes the candidate for the current request. A
//! deployment that wants sticky circuit breaking wraps its adapter.
//!
//! The candidate walk is a plain loop over an ordered, eligibility-
//! filtered list. Per-candidate upstream failures (`Upstream`,
//! `UpstreamTimeout`) are swallowed and the next candidate is tried; only
//! exhaustion surfaces as `NoModelAvailable`.

use std::sync::Arc;
use std::time::Duration;

use config::RouterConfig;
use itertools::Itertools as _;
use rand::Rng as _;
use tokio_util::sync::CancellationToken;

use crate::catalog::{AUTO_MODEL, ModelCatalog, ModelFeatures, ModelInfo};
use crate::error::{Error, Result};
use crate::messages::{ModelRequest, ResponseFormatKind, RouteStrategy};
use crate::upstream::{AdapterSet, CompletionOutcome, DeltaStream};

/// Fixed speed ranking, fastest first. Models matching an earlier pattern
/// are preferred by the `fastest` strategy; unknown models rank last.
const SPEED_ORDER: &[&str] = &[
    "haiku",
    "gpt-3.5-turbo",
    "flash",
    "llama",
    "sonnet",
    "gemini-pro",
    "gpt-4o",
    "gpt-4-turbo",
    "opus",
];

/// Fixed quality ranking, best first. Unknown models rank last.
const QUALITY_ORDER: &[&str] = &[
    "opus",
    "gpt-4o",
    "gemini-pro",
    "gpt-4-turbo",
    "sonnet",
    "llama",
    "flash",
    "gpt-3.5-turbo",
    "haiku",
];

/// A completed dispatch, annotated with what the router chose.
#[derive(Debug)]
pub struct RoutedCompletion {
    pub outcome: CompletionOutcome,
    /// The model that served the request.
    pub model_id: String,
    /// Whether the served model differs from the requested one.
    pub fell_back: bool,
}

/// An opened stream, annotated with what the router chose.
pub struct RoutedStream {
    pub stream: DeltaStream,
    pub model_id: String,
    pub fell_back: bool,
}

/// The request router.
pub struct Router {
    catalog: Arc<ModelCatalog>,
    adapters: AdapterSet,
    config: RouterConfig,
}

impl Router {
    pub fn new(catalog: Arc<ModelCatalog>, adapters: AdapterSet, config: RouterConfig) -> Self {
        Self {
            catalog,
            adapters,
            config,
        }
    }

    /// Route and dispatch a completion.
    pub async fn complete(
        &self,
        request: &ModelRequest,
        cancellation: &CancellationToken,
    ) -> Result<RoutedCompletion> {
        let candidates = self.candidates(request);

        if candidates.is_empty() {
            return Err(Error::NoModelAvailable(format!(
                "no eligible model for '{}'",
                request.model
            )));
        }

        let mut last_error: Option<Error> = None;

        for candidate in &candidates {
            if !self.probe_candidate(candidate, cancellation).await? {
                log::debug!("Model '{}' failed its health probe, trying next candidate", candidate.id);
                continue;
            }

            match self.dispatch(candidate, request, cancellation).await {
                Ok(outcome) => {
                    return Ok(RoutedCompletion {
                        outcome,
                        model_id: candidate.id.clone(),
                        fell_back: candidate.id != request.model,
                    });
                }
                Err(error) if error.is_candidate_retriable() => {
                    log::warn!("Dispatch to '{}' failed ({error}), trying next candidate", candidate.id);
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        let tried = candidates.iter().map(|model| model.id.as_str()).join(", ");
        log::error!("All candidates failed for '{}': [{tried}]", request.model);

        Err(exhausted(request, last_error))
    }

    /// Route and open a streaming completion.
    pub async fn open_stream(
        &self,
        request: &ModelRequest,
        cancellation: &CancellationToken,
    ) -> Result<RoutedStream> {
        let candidates = self.candidates(request);

        if candidates.is_empty() {
            return Err(Error::NoModelAvailable(format!(
                "no eligible model for '{}'",
                request.model
            )));
        }

        let mut last_error: Option<Error> = None;

        for candidate in &candidates {
            if !self.probe_candidate(candidate, cancellation).await? {
                continue;
            }

            let Some(adapter) = self.adapters.get(&candidate.provider) else {
                continue;
            };

            let opened = bounded(
                adapter.stream(&candidate.id, request),
                self.config.probe_timeout,
                &candidate.id,
                cancellation,
            )
            .await;

            match opened {
                Ok(stream) => {
                    return Ok(RoutedStream {
                        stream,
                        model_id: candidate.id.clone(),
                        fell_back: candidate.id != request.model,
                    });
                }
                Err(error) if error.is_candidate_retriable() => {
                    log::warn!("Stream open on '{}' failed ({error}), trying next candidate", candidate.id);
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        Err(exhausted(request, last_error))
    }

    /// Ordered, eligibility-filtered candidate list for a request.
    pub fn candidates(&self, request: &ModelRequest) -> Vec<ModelInfo> {
        let required = required_features(request);
        let eligible = |model: &ModelInfo| model.features.covers(&required);

        let all_eligible = || self.catalog.models().filter(|m| eligible(m)).cloned();

        match request.strategy() {
            RouteStrategy::Default => {
                let mut ordered: Vec<ModelInfo> = Vec::new();

                if let Some(requested) = self.catalog.get(&request.model) {
                    ordered.push(requested.clone());
                    ordered.extend(requested.fallbacks.iter().filter_map(|id| self.catalog.get(id)).cloned());
                }

                ordered.extend(all_eligible());
                dedup_by_id(&mut ordered);
                ordered.retain(|m| eligible(m));
                ordered
            }
            RouteStrategy::Fallback => {
                let mut ordered: Vec<ModelInfo> = Vec::new();

                if let Some(requested) = self.catalog.get(&request.model) {
                    ordered.push(requested.clone());
                }

                for id in request.fallbacks.iter().flatten() {
                    if let Some(model) = self.catalog.get(id) {
                        ordered.push(model.clone());
                    }
                }

                ordered.extend(all_eligible());
                dedup_by_id(&mut ordered);
                ordered.retain(|m| eligible(m));
                ordered
            }
            RouteStrategy::LowestCost => {
                let mut models: Vec<ModelInfo> = all_eligible().collect();
                models.sort_by(|a, b| {
                    a.combined_price()
                        .total_cmp(&b.combined_price())
                        .then_with(|| a.id.cmp(&b.id))
                });
                diversify(models, |m| m.combined_price().to_bits())
            }
            RouteStrategy::Fastest => {
                let mut models: Vec<ModelInfo> = all_eligible().collect();
                models.sort_by(|a, b| {
                    rank(a, SPEED_ORDER)
                        .cmp(&rank(b, SPEED_ORDER))
                        .then_with(|| a.id.cmp(&b.id))
                });
                diversify(models, |m| rank(m, SPEED_ORDER))
            }
            RouteStrategy::HighestQuality => {
                let mut models: Vec<ModelInfo> = all_eligible().collect();
                models.sort_by(|a, b| {
                    rank(a, QUALITY_ORDER)
                        .cmp(&rank(b, QUALITY_ORDER))
                        .then_with(|| a.id.cmp(&b.id))
                });
                diversify(models, |m| rank(m, QUALITY_ORDER))
            }
        }
    }

    /// Probe one candidate with bounded attempts and exponential backoff.
    ///
    /// Returns `Ok(false)` for an unhealthy candidate; `Err` only on
    /// cancellation.
    async fn probe_candidate(&self, model: &ModelInfo, cancellation: &CancellationToken) -> Result<bool> {
        let Some(adapter) = self.adapters.get(&model.provider) else {
            log::warn!("No adapter registered for provider '{}'", model.provider);
            return Ok(false);
        };

        let attempts = self.config.probe_retries + 1;

        for attempt in 1..=attempts {
            let probe = adapter.available(&model.id);

            let healthy = tokio::select! {
                _ = cancellation.cancelled() => return Err(Error::Cancelled),
                outcome = tokio::time::timeout(self.config.probe_timeout, probe) => {
                    outcome.unwrap_or(false)
                }
            };

            if healthy {
                return Ok(true);
            }

            if attempt < attempts {
                let delay = backoff_with_jitter(self.config.probe_backoff, attempt);
                log::debug!(
                    "Probe {attempt}/{attempts} for '{}' failed, retrying in {delay:?}",
                    model.id
                );

                tokio::select! {
                    _ = cancellation.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Ok(false)
    }

    async fn dispatch(
        &self,
        model: &ModelInfo,
        request: &ModelRequest,
        cancellation: &CancellationToken,
    ) -> Result<CompletionOutcome> {
        let Some(adapter) = self.adapters.get(&model.provider) else {
            return Err(Error::Internal(Some(format!(
                "no adapter registered for provider '{}'",
                model.provider
            ))));
        };

        bounded(
            adapter.complete(&model.id, request),
            self.config.dispatch_timeout,
            &model.id,
            cancellation,
        )
        .await
    }
}

/// Bound an upstream call with the configured timeout and the caller's
/// cancellation token.
async fn bounded<T>(
    call: impl Future<Output = Result<T>>,
    timeout: Duration,
    model_id: &str,
    cancellation: &CancellationToken,
) -> Result<T> {
    tokio::select! {
        _ = cancellation.cancelled() => Err(Error::Cancelled),
        outcome = tokio::time::timeout(timeout, call) => match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::UpstreamTimeout {
                model: model_id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        },
    }
}

fn exhausted(request: &ModelRequest, last_error: Option<Error>) -> Error {
    match last_error {
        Some(error) => Error::NoModelAvailable(format!(
            "all candidates for '{}' failed, last error: {error}",
            request.model
        )),
        None => Error::NoModelAvailable(format!("all candidates for '{}' failed health probes", request.model)),
    }
}

/// Compute the feature set a request requires from its serving model.
pub fn required_features(request: &ModelRequest) -> ModelFeatures {
    ModelFeatures {
        vision: request.has_image_parts(),
        function_calling: request.functions.as_ref().is_some_and(|f| !f.is_empty())
            || request.function_call.is_some(),
        tool_use: request.tools.as_ref().is_some_and(|t| !t.is_empty()),
        json_mode: request
            .response_format
            .is_some_and(|format| format.kind == ResponseFormatKind::JsonObject),
    }
}

fn rank(model: &ModelInfo, order: &[&str]) -> usize {
    order
        .iter()
        .position(|pattern| model.id.contains(pattern))
        .unwrap_or(order.len())
}

fn dedup_by_id(models: &mut Vec<ModelInfo>) {
    let mut seen = std::collections::HashSet::new();
    models.retain(|model| seen.insert(model.id.clone()));
}

/// Reorder runs of equal-keyed models so that consecutive picks prefer a
/// provider different from the previous one. Ties stay deterministic: the
/// input is already id-sorted and the walk always takes the first
/// acceptable element.
fn diversify<K: PartialEq>(models: Vec<ModelInfo>, key: impl Fn(&ModelInfo) -> K) -> Vec<ModelInfo> {
    let mut result: Vec<ModelInfo> = Vec::with_capacity(models.len());
    let mut remaining = models;

    while !remaining.is_empty() {
        let group_key = key(&remaining[0]);
        let split = remaining
            .iter()
            .position(|model| key(model) != group_key)
            .unwrap_or(remaining.len());
        let mut group: Vec<ModelInfo> = remaining.drain(..split).collect();

        while !group.is_empty() {
            let previous_provider = result.last().map(|model: &ModelInfo| model.provider.clone());
            let pick = previous_provider
                .and_then(|provider| group.iter().position(|model| model.provider != provider))
                .unwrap_or(0);

            result.push(group.remove(pick));
        }
    }

    result
}

fn backoff_with_jitter(base: Duration, attempt: u32) -> Duration {
    let exponential = base.saturating_mul(1 << (attempt - 1).min(16));
    let jitter: f64 = rand::rng().random_range(0.0..0.1);

    Duration::from_secs_f64(exponential.as_secs_f64() * (1.0 + jitter))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::messages::{ChatMessage, ContentPart, FinishReason, ImageUrl, MessageContent, ResponseFormat, ToolDef};
    use crate::messages::{FunctionDef, TokenUsage};
    use crate::upstream::{StreamDelta, UpstreamAdapter};

    /// Scripted adapter: per-model availability plus probe/dispatch
    /// counters.
    struct ScriptedAdapter {
        provider: String,
        unavailable: Mutex<HashMap<String, u32>>,
        failing: Mutex<HashMap<String, String>>,
        probes: AtomicU32,
        completions: AtomicU32,
    }

    impl ScriptedAdapter {
        fn new(provider: &str) -> Self {
            Self {
                provider: provider.to_string(),
                unavailable: Mutex::new(HashMap::new()),
                failing: Mutex::new(HashMap::new()),
                probes: AtomicU32::new(0),
                completions: AtomicU32::new(0),
            }
        }

        /// Make the next `count` probes of `model` fail.
        fn fail_probes(&self, model: &str, count: u32) {
            self.unavailable.lock().unwrap().insert(model.to_string(), count);
        }

        /// Make every dispatch to `model` fail with an upstream error.
        fn fail_dispatch(&self, model: &str, message: &str) {
            self.failing
                .lock()
                .unwrap()
                .insert(model.to_string(), message.to_string());
        }
    }

    #[async_trait]
    impl UpstreamAdapter for ScriptedAdapter {
        fn provider(&self) -> &str {
            &self.provider
        }

        async fn available(&self, model_id: &str) -> bool {
            self.probes.fetch_add(1, Ordering::Relaxed);

            let mut unavailable = self.unavailable.lock().unwrap();
            match unavailable.get_mut(model_id) {
                Some(0) | None => true,
                Some(remaining) => {
                    *remaining -= 1;
                    false
                }
            }
        }

        async fn complete(&self, model_id: &str, _request: &ModelRequest) -> Result<CompletionOutcome> {
            self.completions.fetch_add(1, Ordering::Relaxed);

            if let Some(message) = self.failing.lock().unwrap().get(model_id) {
                return Err(Error::Upstream {
                    model: model_id.to_string(),
                    message: message.clone(),
                });
            }

            Ok(CompletionOutcome {
                content: format!("reply from {model_id}"),
                finish_reason: FinishReason::Stop,
                usage: TokenUsage::new(5, 7),
                raw_id: None,
            })
        }

        async fn stream(&self, model_id: &str, _request: &ModelRequest) -> Result<DeltaStream> {
            let deltas = vec![
                Ok(StreamDelta {
                    content: Some(format!("reply from {model_id}")),
                    finish_reason: None,
                }),
                Ok(StreamDelta {
                    content: None,
                    finish_reason: Some(FinishReason::Stop),
                }),
            ];

            Ok(Box::pin(futures::stream::iter(deltas)))
        }
    }

    fn fast_config() -> RouterConfig {
        RouterConfig {
            probe_timeout: Duration::from_millis(100),
            probe_retries: 1,
            probe_backoff: Duration::from_millis(1),
            dispatch_timeout: Duration::from_millis(200),
        }
    }

    fn router_with(adapters: Vec<Arc<dyn UpstreamAdapter>>) -> Router {
        let mut set = AdapterSet::new();
        for adapter in adapters {
            set.register(adapter);
        }

        Router::new(Arc::new(ModelCatalog::builtin()), set, fast_config())
    }

    fn all_providers() -> (Arc<ScriptedAdapter>, Arc<ScriptedAdapter>, Arc<ScriptedAdapter>, Arc<ScriptedAdapter>) {
        (
            Arc::new(ScriptedAdapter::new("openai")),
            Arc::new(ScriptedAdapter::new("anthropic")),
            Arc::new(ScriptedAdapter::new("google")),
            Arc::new(ScriptedAdapter::new("meta")),
        )
    }

    fn request(model: &str) -> ModelRequest {
        ModelRequest::new(model, vec![ChatMessage::user("Hi")])
    }

    fn vision_request(model: &str) -> ModelRequest {
        let message = ChatMessage {
            role: crate::messages::Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "what is in this image?".into(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "https://example.com/cat.png".into(),
                        detail: None,
                    },
                },
            ]),
            name: None,
            tool_call_id: None,
        };

        ModelRequest::new(model, vec![message])
    }

    #[test]
    fn detects_required_features() {
        let mut req = request("auto");
        assert!(required_features(&req).is_empty());

        req.tools = Some(vec![ToolDef {
            kind: "function".into(),
            function: FunctionDef {
                name: "lookup".into(),
                description: None,
                parameters: None,
            },
        }]);
        assert!(required_features(&req).tool_use);

        req.functions = Some(vec![FunctionDef {
            name: "lookup".into(),
            description: None,
            parameters: None,
        }]);
        assert!(required_features(&req).function_calling);

        req.response_format = Some(ResponseFormat {
            kind: ResponseFormatKind::JsonObject,
        });
        assert!(required_features(&req).json_mode);

        assert!(required_features(&vision_request("auto")).vision);
    }

    #[test]
    fn default_strategy_prefers_requested_then_catalog_fallbacks() {
        let (openai, anthropic, google, meta) = all_providers();
        let router = router_with(vec![openai, anthropic, google, meta]);

        let candidates = router.candidates(&request("openai/gpt-4o"));
        let ids: Vec<&str> = candidates.iter().map(|m| m.id.as_str()).collect();

        assert_eq!(ids[0], "openai/gpt-4o");
        assert_eq!(ids[1], "openai/gpt-4-turbo");
        assert_eq!(ids[2], "anthropic/claude-3-sonnet");
        // Every builtin model serves a plain text request.
        assert_eq!(candidates.len(), ModelCatalog::builtin().len());
    }

    #[test]
    fn fallback_strategy_follows_explicit_list() {
        let (openai, anthropic, google, meta) = all_providers();
        let router = router_with(vec![openai, anthropic, google, meta]);

        let mut req = request("anthropic/claude-3-opus");
        req.route = Some(RouteStrategy::Fallback);
        req.fallbacks = Some(vec!["openai/gpt-4o".into(), "openai/gpt-3.5-turbo".into()]);

        let ids: Vec<String> = router.candidates(&req).into_iter().map(|m| m.id).collect();
        assert_eq!(&ids[..3], ["anthropic/claude-3-opus", "openai/gpt-4o", "openai/gpt-3.5-turbo"]);
    }

    #[test]
    fn feature_gate_excludes_models_without_vision() {
        let (openai, anthropic, google, meta) = all_providers();
        let router = router_with(vec![openai, anthropic, google, meta]);

        let candidates = router.candidates(&vision_request("openai/gpt-4-turbo"));

        assert!(candidates.iter().all(|m| m.features.vision));
        assert!(!candidates.iter().any(|m| m.id == "openai/gpt-4-turbo"));
        assert!(!candidates.is_empty());
    }

    #[test]
    fn lowest_cost_puts_haiku_first() {
        let (openai, anthropic, google, meta) = all_providers();
        let router = router_with(vec![openai, anthropic, google, meta]);

        let mut req = request("auto");
        req.route = Some(RouteStrategy::LowestCost);

        let candidates = router.candidates(&req);
        assert_eq!(candidates[0].id, "anthropic/claude-3-haiku");
    }

    #[test]
    fn fastest_and_highest_quality_follow_the_rank_tables() {
        let (openai, anthropic, google, meta) = all_providers();
        let router = router_with(vec![openai, anthropic, google, meta]);

        let mut fastest = request("auto");
        fastest.route = Some(RouteStrategy::Fastest);
        assert_eq!(router.candidates(&fastest)[0].id, "anthropic/claude-3-haiku");

        let mut best = request("auto");
        best.route = Some(RouteStrategy::HighestQuality);
        assert_eq!(router.candidates(&best)[0].id, "anthropic/claude-3-opus");
    }

    #[test]
    fn equal_cost_ties_alternate_providers() {
        let config: config::CatalogConfig = toml::from_str(indoc::indoc! {r#"
            [models."alpha/a-one"]
            input_price = 1.0
            output_price = 1.0

            [models."alpha/a-two"]
            input_price = 1.0
            output_price = 1.0

            [models."beta/b-one"]
            input_price = 1.0
            output_price = 1.0
        "#})
        .unwrap();

        let catalog = ModelCatalog::from_config(&config);
        let router = Router::new(Arc::new(catalog), AdapterSet::new(), fast_config());

        let mut req = request("auto");
        req.route = Some(RouteStrategy::LowestCost);

        let ids: Vec<String> = router
            .candidates(&req)
            .into_iter()
            .filter(|m| m.provider == "alpha" || m.provider == "beta")
            .map(|m| m.id)
            .collect();

        // Sorted order would be a-one, a-two, b-one; diversification swaps
        // the beta model between the two alphas.
        assert_eq!(ids, ["alpha/a-one", "beta/b-one", "alpha/a-two"]);
    }

    #[tokio::test]
    async fn healthy_requested_model_is_dispatched_directly() {
        let (openai, anthropic, google, meta) = all_providers();
        let router = router_with(vec![openai.clone(), anthropic, google, meta]);

        let routed = router
            .complete(&request("openai/gpt-4o"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(routed.model_id, "openai/gpt-4o");
        assert!(!routed.fell_back);
        assert_eq!(routed.outcome.content, "reply from openai/gpt-4o");
        assert_eq!(openai.completions.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probes_are_retried_with_backoff_then_skipped() {
        let (openai, anthropic, google, meta) = all_providers();
        // Exhaust all probe attempts (1 + 1 retry) for the requested model.
        openai.fail_probes("openai/gpt-4o", 2);

        let router = router_with(vec![openai.clone(), anthropic, google, meta]);

        let routed = router
            .complete(&request("openai/gpt-4o"), &CancellationToken::new())
            .await
            .unwrap();

        // Fell through to the first catalog fallback.
        assert_eq!(routed.model_id, "openai/gpt-4-turbo");
        assert!(routed.fell_back);
        // Two failed probes on gpt-4o plus one successful on gpt-4-turbo.
        assert_eq!(openai.probes.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn upstream_error_falls_through_to_next_candidate() {
        let (openai, anthropic, google, meta) = all_providers();
        anthropic.fail_dispatch("anthropic/claude-3-opus", "overloaded");

        let router = router_with(vec![openai, anthropic.clone(), google, meta]);

        let mut req = request("anthropic/claude-3-opus");
        req.route = Some(RouteStrategy::Fallback);
        req.fallbacks = Some(vec!["openai/gpt-4o".into()]);

        let routed = router.complete(&req, &CancellationToken::new()).await.unwrap();

        assert_eq!(routed.model_id, "openai/gpt-4o");
        assert!(routed.fell_back);
        assert_eq!(anthropic.completions.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_no_model_available() {
        // Only a "local" adapter is registered, and its one model always
        // fails probes. Builtin candidates are skipped because no adapter
        // serves their providers.
        let adapter = Arc::new(ScriptedAdapter::new("local"));
        adapter.fail_probes("local/tiny", 100);

        let config: config::CatalogConfig = toml::from_str(indoc::indoc! {r#"
            [models."local/tiny"]
            context_window = 4096
        "#})
        .unwrap();

        let mut set = AdapterSet::new();
        set.register(adapter);
        let router = Router::new(Arc::new(ModelCatalog::from_config(&config)), set, fast_config());

        let error = router
            .complete(&request("local/tiny"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.error_type(), "no_model_available");
    }

    #[tokio::test]
    async fn cancellation_aborts_before_dispatch() {
        let (openai, anthropic, google, meta) = all_providers();
        let router = router_with(vec![openai.clone(), anthropic, google, meta]);

        let token = CancellationToken::new();
        token.cancel();

        let error = router
            .complete(&request("openai/gpt-4o"), &token)
            .await
            .unwrap_err();

        assert_eq!(error.error_type(), "cancelled");
        assert_eq!(openai.completions.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn unknown_model_falls_through_to_eligible_candidates() {
        let (openai, anthropic, google, meta) = all_providers();
        let router = router_with(vec![openai, anthropic, google, meta]);

        let routed = router
            .complete(&request("acme/unreleased"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(routed.fell_back);
        assert_ne!(routed.model_id, "acme/unreleased");
    }

    #[tokio::test]
    async fn stream_route_reports_selected_model() {
        use futures::StreamExt as _;

        let (openai, anthropic, google, meta) = all_providers();
        let router = router_with(vec![openai, anthropic, google, meta]);

        let routed = router
            .open_stream(&request("openai/gpt-4o"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(routed.model_id, "openai/gpt-4o");

        let deltas: Vec<_> = routed.stream.collect().await;
        assert_eq!(deltas.len(), 2);
    }

    #[test]
    fn backoff_grows_exponentially() {
        let base = Duration::from_millis(100);

        let first = backoff_with_jitter(base, 1);
        let second = backoff_with_jitter(base, 2);
        let third = backoff_with_jitter(base, 3);

        assert!(first >= base && first < base * 2);
        assert!(second >= base * 2 && second < base * 3);
        assert!(third >= base * 4 && third < base * 5);
    }
}
