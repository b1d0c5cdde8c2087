//! Shared harness for gateway integration tests: a scripted upstream
//! adapter and a recording webhook transport.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gateway::messages::{FinishReason, ModelRequest, TokenUsage};
use gateway::upstream::{CompletionOutcome, DeltaStream, StreamDelta, UpstreamAdapter};
use gateway::webhook::DeliveryTransport;
use gateway::{Error, Gateway, Result};

/// Adapter whose availability and failures are scripted per model.
pub struct ScriptedAdapter {
    provider: String,
    unavailable: Mutex<HashSet<String>>,
    failing: Mutex<HashMap<String, String>>,
    pub completions: AtomicU32,
}

impl ScriptedAdapter {
    pub fn new(provider: &str) -> Arc<Self> {
        Arc::new(Self {
            provider: provider.to_string(),
            unavailable: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashMap::new()),
            completions: AtomicU32::new(0),
        })
    }

    /// Mark a model as failing every health probe.
    pub fn mark_unavailable(&self, model: &str) {
        self.unavailable.lock().unwrap().insert(model.to_string());
    }

    /// Make every dispatch to a model fail with an upstream error.
    #[allow(dead_code)]
    pub fn fail_dispatch(&self, model: &str, message: &str) {
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
        !self.unavailable.lock().unwrap().contains(model_id)
    }

    async fn complete(&self, model_id: &str, request: &ModelRequest) -> Result<CompletionOutcome> {
        self.completions.fetch_add(1, Ordering::Relaxed);

        if let Some(message) = self.failing.lock().unwrap().get(model_id) {
            return Err(Error::Upstream {
                model: model_id.to_string(),
                message: message.clone(),
            });
        }

        let prompt = request
            .messages
            .last()
            .map(|message| message.content.text())
            .unwrap_or_default();

        Ok(CompletionOutcome {
            content: format!("{model_id} says hello to '{prompt}'"),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::new(9, 12),
            raw_id: None,
        })
    }

    async fn stream(&self, model_id: &str, _request: &ModelRequest) -> Result<DeltaStream> {
        self.completions.fetch_add(1, Ordering::Relaxed);

        let deltas = vec![
            Ok(StreamDelta {
                content: Some(format!("{model_id} ")),
                finish_reason: None,
            }),
            Ok(StreamDelta {
                content: Some("says hello".to_string()),
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

/// Webhook transport that records every post and always returns 200.
#[derive(Default)]
pub struct RecordingTransport {
    pub posts: Mutex<Vec<(String, Vec<(String, String)>, Vec<u8>)>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delivered event `type` fields, in delivery order.
    pub fn delivered_types(&self) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, _, body)| {
                let event: serde_json::Value = serde_json::from_slice(body).ok()?;
                Some(event["type"].as_str()?.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl DeliveryTransport for RecordingTransport {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> std::result::Result<u16, String> {
        self.posts
            .lock()
            .unwrap()
            .push((url.to_string(), headers.to_vec(), body.to_vec()));
        Ok(200)
    }
}

/// Config tuned for tests: short probe windows, no probe retries.
pub fn test_config() -> config::Config {
    config::Config {
        router: config::RouterConfig {
            probe_timeout: Duration::from_millis(100),
            probe_retries: 0,
            probe_backoff: Duration::from_millis(1),
            dispatch_timeout: Duration::from_secs(1),
        },
        ..config::Config::default()
    }
}

/// Gateway wired with one scripted adapter per builtin provider and a
/// recording webhook transport.
pub fn test_gateway() -> (
    Gateway,
    Arc<ScriptedAdapter>,
    Arc<ScriptedAdapter>,
    Arc<RecordingTransport>,
) {
    let openai = ScriptedAdapter::new("openai");
    let anthropic = ScriptedAdapter::new("anthropic");
    let google = ScriptedAdapter::new("google");
    let meta = ScriptedAdapter::new("meta");
    let transport = RecordingTransport::new();

    let gateway = Gateway::builder(test_config())
        .with_adapter(openai.clone())
        .with_adapter(anthropic.clone())
        .with_adapter(google)
        .with_adapter(meta)
        .with_delivery_transport(transport.clone())
        .build()
        .expect("gateway builds");

    (gateway, openai, anthropic, transport)
}

/// Poll until the condition holds; panics after ~5 seconds of virtual
/// time.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
