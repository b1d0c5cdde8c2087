//! The gateway facade: typed entry points over the request plane.
//!
//! A [`Gateway`] owns every store and service, constructed once by the
//! [`GatewayBuilder`] and shared behind an `Arc`. The framing layer calls
//! the typed entry points after authenticating the caller; the core never
//! sees transport concerns.

mod builder;

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

pub use builder::GatewayBuilder;

use crate::analytics::{
    AnalyticsStore, CacheOutcome, ModelUsage, Pagination, Recorder as _, UsageFilter, UsageMetrics, UsagePage,
    UsageRecord,
};
use crate::batch::{Batch, BatchIntake, BatchOptions, BatchProcessor, ChildExecutor};
use crate::cache::{CacheStats, InvalidateFilter, ResponseCache};
use crate::catalog::{ModelCatalog, ModelInfo};
use crate::endpoint::{CustomEndpoint, EndpointStore, EndpointUpdate, NewEndpoint, rewrite_request};
use crate::error::{Error, Result};
use crate::messages::{ChatChunk, ChatObject, ChunkChoice, ChunkDelta, ModelRequest, ModelResponse, Role};
use crate::router::Router;
use crate::validate::validate_request;
use crate::webhook::{
    NewWebhook, WebhookConfig, WebhookDelivery, WebhookDispatcher, WebhookEvent, WebhookEventType, WebhookUpdate,
};

/// Stream of response chunks handed to the framing layer.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatChunk>> + Send>>;

/// Per-request caller context attached by the framing layer.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Authenticated tenant identifier; all store reads filter by it.
    pub owner: String,
    /// Cancelling this token aborts pending probes and dispatches. The
    /// only side effect recorded for cancelled work is a `request.failed`
    /// event.
    pub cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(owner: impl Into<String>, cancellation: CancellationToken) -> Self {
        Self {
            owner: owner.into(),
            cancellation,
        }
    }
}

/// The assembled gateway.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

pub(crate) struct GatewayInner {
    catalog: Arc<ModelCatalog>,
    endpoints: EndpointStore,
    cache: Arc<ResponseCache>,
    router: Router,
    webhooks: Arc<WebhookDispatcher>,
    analytics: Arc<AnalyticsStore>,
    batches: BatchProcessor,
}

impl Gateway {
    /// Start building a gateway from configuration.
    pub fn builder(config: config::Config) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Execute a chat completion end to end: rewrite, validate, cache,
    /// route, dispatch, record.
    pub async fn chat_complete(
        &self,
        context: &RequestContext,
        request: ModelRequest,
        endpoint_id: Option<&str>,
    ) -> Result<ModelResponse> {
        self.inner.execute_chat(context, request, endpoint_id).await
    }

    /// Open a streaming chat completion. Streaming bypasses the cache on
    /// both sides: no lookup, no store.
    pub async fn chat_stream(
        &self,
        context: &RequestContext,
        request: ModelRequest,
        endpoint_id: Option<&str>,
    ) -> Result<ChunkStream> {
        self.inner.execute_stream(context, request, endpoint_id).await
    }

    /// All catalog models, in declaration order.
    pub fn list_models(&self) -> Vec<ModelInfo> {
        self.inner.catalog.models().cloned().collect()
    }

    // Batches.

    pub fn create_batch(&self, owner: &str, requests: Vec<ModelRequest>, options: BatchOptions) -> Result<BatchIntake> {
        self.inner.batches.create_batch(owner, requests, options)
    }

    pub fn get_batch(&self, id: &str, owner: &str) -> Result<Batch> {
        self.inner.batches.get_batch(id, owner)
    }

    pub fn list_batches(&self, owner: &str) -> Vec<Batch> {
        self.inner.batches.list_batches(owner)
    }

    pub fn cancel_batch(&self, id: &str, owner: &str) -> Result<Batch> {
        self.inner.batches.cancel_batch(id, owner)
    }

    // Custom endpoints.

    pub fn create_endpoint(&self, owner: &str, params: NewEndpoint) -> Result<CustomEndpoint> {
        let endpoint = self.inner.endpoints.create(owner, params)?;

        self.inner.webhooks.trigger_event(
            owner,
            WebhookEventType::EndpointCreated,
            EndpointStore::event_payload(&endpoint),
        );

        Ok(endpoint)
    }

    pub fn get_endpoint(&self, id: &str, owner: &str) -> Result<CustomEndpoint> {
        self.inner.endpoints.get(id, owner)
    }

    pub fn update_endpoint(&self, id: &str, owner: &str, update: EndpointUpdate) -> Result<CustomEndpoint> {
        let endpoint = self.inner.endpoints.update(id, owner, update)?;

        self.inner.webhooks.trigger_event(
            owner,
            WebhookEventType::EndpointUpdated,
            EndpointStore::event_payload(&endpoint),
        );

        Ok(endpoint)
    }

    pub fn delete_endpoint(&self, id: &str, owner: &str) -> Result<CustomEndpoint> {
        let endpoint = self.inner.endpoints.delete(id, owner)?;

        self.inner.webhooks.trigger_event(
            owner,
            WebhookEventType::EndpointDeleted,
            EndpointStore::event_payload(&endpoint),
        );

        Ok(endpoint)
    }

    pub fn list_endpoints(&self, owner: &str) -> Vec<CustomEndpoint> {
        self.inner.endpoints.list(owner)
    }

    // Webhooks.

    pub fn create_webhook(&self, owner: &str, params: NewWebhook) -> Result<WebhookConfig> {
        self.inner.webhooks.create_webhook(owner, params)
    }

    pub fn get_webhook(&self, id: &str, owner: &str) -> Result<WebhookConfig> {
        self.inner.webhooks.get_webhook(id, owner)
    }

    pub fn update_webhook(&self, id: &str, owner: &str, update: WebhookUpdate) -> Result<WebhookConfig> {
        self.inner.webhooks.update_webhook(id, owner, update)
    }

    pub fn delete_webhook(&self, id: &str, owner: &str) -> Result<WebhookConfig> {
        self.inner.webhooks.delete_webhook(id, owner)
    }

    pub fn list_webhooks(&self, owner: &str) -> Vec<WebhookConfig> {
        self.inner.webhooks.list_webhooks(owner)
    }

    pub async fn retry_delivery(&self, delivery_id: &str, owner: &str) -> Result<WebhookDelivery> {
        self.inner.webhooks.retry_delivery(delivery_id, owner).await
    }

    pub fn list_deliveries(&self, webhook_id: &str, owner: &str) -> Result<Vec<WebhookDelivery>> {
        self.inner.webhooks.list_deliveries(webhook_id, owner)
    }

    pub fn list_events(&self, owner: &str) -> Vec<WebhookEvent> {
        self.inner.webhooks.list_events(owner)
    }

    // Analytics.

    pub fn query_usage(&self, filter: &UsageFilter, page: Pagination) -> UsagePage {
        self.inner.analytics.query(filter, page)
    }

    pub fn get_metrics(&self, filter: &UsageFilter) -> UsageMetrics {
        self.inner.analytics.metrics(filter)
    }

    // Cache administration.

    pub fn invalidate_cache(&self, filter: &InvalidateFilter) -> usize {
        self.inner.cache.invalidate(filter)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }
}

impl GatewayInner {
    async fn execute_chat(
        &self,
        context: &RequestContext,
        request: ModelRequest,
        endpoint_id: Option<&str>,
    ) -> Result<ModelResponse> {
        let started = Instant::now();

        let request = self.prepare(context, request, endpoint_id)?;
        let requested_model = request.model.clone();

        self.webhooks.trigger_event(
            &context.owner,
            WebhookEventType::RequestCreated,
            serde_json::json!({
                "model": requested_model,
                "endpoint_id": endpoint_id,
                "stream": request.is_streaming(),
            }),
        );

        if let Some(hit) = self.cache.get(&request) {
            log::debug!("Cache hit for model '{}'", hit.model_id);

            let mut record = UsageRecord::new(
                &context.owner,
                ModelUsage {
                    requested: requested_model.clone(),
                    actual: Some(hit.model_id.clone()),
                },
            );
            record.tokens = hit.token_usage;
            record.latency_ms = started.elapsed().as_millis() as u64;
            record.success = true;
            record.routing_strategy = Some(request.strategy());
            record.endpoint_id = endpoint_id.map(ToString::to_string);
            record.cache = CacheOutcome {
                hit: true,
                ttl_secs: Some(hit.ttl_remaining.as_secs()),
            };
            self.analytics.log_usage(record);

            self.webhooks.trigger_event(
                &context.owner,
                WebhookEventType::RequestCompleted,
                serde_json::json!({
                    "model": hit.model_id,
                    "cache_hit": true,
                }),
            );

            return Ok(hit.response);
        }

        match self.router.complete(&request, &context.cancellation).await {
            Ok(routed) => {
                let response = ModelResponse::new(
                    routed.model_id.clone(),
                    routed.outcome.content.clone(),
                    routed.outcome.finish_reason,
                    routed.outcome.usage,
                );

                self.cache.set(&request, &response, routed.outcome.usage);

                let mut record = UsageRecord::new(
                    &context.owner,
                    ModelUsage {
                        requested: requested_model.clone(),
                        actual: Some(routed.model_id.clone()),
                    },
                );
                record.tokens = routed.outcome.usage;
                record.latency_ms = started.elapsed().as_millis() as u64;
                record.success = true;
                record.routing_strategy = Some(request.strategy());
                record.endpoint_id = endpoint_id.map(ToString::to_string);
                self.analytics.log_usage(record);

                if routed.fell_back {
                    self.webhooks.trigger_event(
                        &context.owner,
                        WebhookEventType::ModelFallback,
                        serde_json::json!({
                            "requested": requested_model,
                            "actual": routed.model_id,
                        }),
                    );
                }

                self.webhooks.trigger_event(
                    &context.owner,
                    WebhookEventType::RequestCompleted,
                    serde_json::json!({
                        "model": routed.model_id,
                        "cache_hit": false,
                    }),
                );

                Ok(response)
            }
            Err(error) => {
                self.record_failure(context, &request, endpoint_id, started, &error);
                Err(error)
            }
        }
    }

    async fn execute_stream(
        &self,
        context: &RequestContext,
        request: ModelRequest,
        endpoint_id: Option<&str>,
    ) -> Result<ChunkStream> {
        let started = Instant::now();

        let mut request = self.prepare(context, request, endpoint_id)?;
        request.stream = Some(true);
        let requested_model = request.model.clone();

        self.webhooks.trigger_event(
            &context.owner,
            WebhookEventType::RequestCreated,
            serde_json::json!({
                "model": requested_model,
                "endpoint_id": endpoint_id,
                "stream": true,
            }),
        );

        let routed = match self.router.open_stream(&request, &context.cancellation).await {
            Ok(routed) => routed,
            Err(error) => {
                self.record_failure(context, &request, endpoint_id, started, &error);
                return Err(error);
            }
        };

        if routed.fell_back {
            self.webhooks.trigger_event(
                &context.owner,
                WebhookEventType::ModelFallback,
                serde_json::json!({
                    "requested": requested_model,
                    "actual": routed.model_id,
                }),
            );
        }

        let chunk_id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
        let created = crate::clock::unix_now_secs();
        let model_id = routed.model_id.clone();

        let webhooks = Arc::clone(&self.webhooks);
        let analytics = Arc::clone(&self.analytics);
        let owner = context.owner.clone();
        let strategy = request.strategy();
        let endpoint_id = endpoint_id.map(ToString::to_string);

        let stream = routed.stream.enumerate().map(move |(index, delta)| {
            let delta = delta?;

            // Terminal delta: record the request before the consumer sees
            // the final chunk. Token accounting for streams is adapter-
            // specific, so the record carries zero tokens.
            if delta.finish_reason.is_some() {
                let mut record = UsageRecord::new(
                    &owner,
                    ModelUsage {
                        requested: requested_model.clone(),
                        actual: Some(model_id.clone()),
                    },
                );
                record.latency_ms = started.elapsed().as_millis() as u64;
                record.success = true;
                record.routing_strategy = Some(strategy);
                record.endpoint_id = endpoint_id.clone();
                analytics.log_usage(record);

                webhooks.trigger_event(
                    &owner,
                    WebhookEventType::RequestCompleted,
                    serde_json::json!({
                        "model": model_id,
                        "cache_hit": false,
                        "stream": true,
                    }),
                );
            }

            Ok(ChatChunk {
                id: chunk_id.clone(),
                object: ChatObject::ChatCompletionChunk,
                created,
                model: model_id.clone(),
                choices: vec![ChunkChoice {
                    index: 0,
                    delta: ChunkDelta {
                        role: (index == 0).then_some(Role::Assistant),
                        content: delta.content,
                    },
                    finish_reason: delta.finish_reason,
                }],
                routed_through: model_id.clone(),
            })
        });

        Ok(Box::pin(stream))
    }

    /// Rewrite through the endpoint preset (when given) and validate.
    fn prepare(
        &self,
        context: &RequestContext,
        request: ModelRequest,
        endpoint_id: Option<&str>,
    ) -> Result<ModelRequest> {
        let request = match endpoint_id {
            Some(endpoint_id) => {
                let endpoint = self.endpoints.get(endpoint_id, &context.owner)?;
                rewrite_request(&request, &endpoint)
            }
            None => request,
        };

        validate_request(&request, &self.catalog)?;
        Ok(request)
    }

    /// Emit the failure-path events and analytics record for an error.
    ///
    /// Cancelled work records nothing beyond its `request.failed` event.
    fn record_failure(
        &self,
        context: &RequestContext,
        request: &ModelRequest,
        endpoint_id: Option<&str>,
        started: Instant,
        error: &Error,
    ) {
        match error {
            Error::Cancelled => {
                self.webhooks.trigger_event(
                    &context.owner,
                    WebhookEventType::RequestFailed,
                    serde_json::json!({
                        "model": request.model,
                        "error_kind": "cancelled",
                    }),
                );
                return;
            }
            Error::NoModelAvailable(_) => {
                self.webhooks.trigger_event(
                    &context.owner,
                    WebhookEventType::ModelUnavailable,
                    serde_json::json!({
                        "model": request.model,
                    }),
                );
            }
            Error::Internal(_) => {
                self.webhooks.trigger_event(
                    &context.owner,
                    WebhookEventType::Error,
                    serde_json::json!({
                        "model": request.model,
                        "error_kind": error.error_type(),
                    }),
                );
            }
            _ => {
                self.webhooks.trigger_event(
                    &context.owner,
                    WebhookEventType::RequestFailed,
                    serde_json::json!({
                        "model": request.model,
                        "error_kind": error.error_type(),
                    }),
                );
            }
        }

        let mut record = UsageRecord::new(
            &context.owner,
            ModelUsage {
                requested: request.model.clone(),
                actual: None,
            },
        );
        record.latency_ms = started.elapsed().as_millis() as u64;
        record.success = false;
        record.error_kind = Some(error.error_type().to_string());
        record.routing_strategy = Some(request.strategy());
        record.endpoint_id = endpoint_id.map(ToString::to_string);
        self.analytics.log_usage(record);
    }
}

/// Batch children run through the same pipeline as direct requests. The
/// executor holds a weak handle so in-flight batches cannot keep a
/// dropped gateway alive.
struct PipelineExecutor {
    gateway: Weak<GatewayInner>,
}

#[async_trait]
impl ChildExecutor for PipelineExecutor {
    async fn execute(&self, owner: &str, request: ModelRequest) -> Result<ModelResponse> {
        let Some(gateway) = self.gateway.upgrade() else {
            return Err(Error::Internal(Some("gateway is shutting down".into())));
        };

        let context = RequestContext::new(owner);
        gateway.execute_chat(&context, request, None).await
    }
}
