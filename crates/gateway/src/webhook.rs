//! Webhook subscriptions and event fan-out.
//!
//! Events are append-only records. Triggering an event appends it to the
//! log, then queues one delivery job per active, subscribed webhook of
//! the owning tenant. Every webhook gets its own worker task consuming a
//! FIFO queue, so deliveries to a single webhook happen in trigger order
//! while distinct webhooks proceed independently.
//!
//! Delivery is at-least-once: consumers deduplicate by `event.id`.

mod delivery;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, Weak};

use dashmap::DashMap;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

pub use delivery::{DeliveryTransport, HttpTransport, retry_delay, sign_payload};

use crate::clock;
use crate::error::{Error, Result};

/// Maximum configurable retry count per webhook.
const MAX_RETRIES: u32 = 10;

/// Closed set of event types the gateway emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum WebhookEventType {
    #[serde(rename = "request.created")]
    #[strum(serialize = "request.created")]
    RequestCreated,
    #[serde(rename = "request.completed")]
    #[strum(serialize = "request.completed")]
    RequestCompleted,
    #[serde(rename = "request.failed")]
    #[strum(serialize = "request.failed")]
    RequestFailed,
    #[serde(rename = "model.unavailable")]
    #[strum(serialize = "model.unavailable")]
    ModelUnavailable,
    #[serde(rename = "model.fallback")]
    #[strum(serialize = "model.fallback")]
    ModelFallback,
    #[serde(rename = "endpoint.created")]
    #[strum(serialize = "endpoint.created")]
    EndpointCreated,
    #[serde(rename = "endpoint.updated")]
    #[strum(serialize = "endpoint.updated")]
    EndpointUpdated,
    #[serde(rename = "endpoint.deleted")]
    #[strum(serialize = "endpoint.deleted")]
    EndpointDeleted,
    #[serde(rename = "credit.low")]
    #[strum(serialize = "credit.low")]
    CreditLow,
    #[serde(rename = "batch.completed")]
    #[strum(serialize = "batch.completed")]
    BatchCompleted,
    #[serde(rename = "error")]
    #[strum(serialize = "error")]
    Error,
}

/// A registered webhook.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub id: String,
    pub owner: String,
    pub url: String,
    pub name: String,
    /// Event types this webhook receives. A webhook with an empty set
    /// receives nothing.
    pub events: Vec<WebhookEventType>,
    /// HMAC-SHA256 signing secret; when set, deliveries carry an
    /// `X-Signature` header.
    pub secret: Option<SecretString>,
    /// Extra headers applied to every delivery.
    pub headers: BTreeMap<String, String>,
    /// Retry count after a failed attempt, `0..=10`.
    pub retries: u32,
    pub active: bool,
    /// HTTP status of the most recent delivery attempt.
    pub last_status: Option<u16>,
    pub created_at: u64,
}

impl WebhookConfig {
    fn accepts(&self, event_type: WebhookEventType) -> bool {
        self.active && self.events.contains(&event_type)
    }
}

/// Parameters for registering a webhook.
#[derive(Debug, Clone, Default)]
pub struct NewWebhook {
    pub url: String,
    pub name: String,
    pub events: Vec<WebhookEventType>,
    pub secret: Option<String>,
    pub headers: BTreeMap<String, String>,
    /// `None` uses the configured default.
    pub retries: Option<u32>,
    pub active: bool,
}

/// Partial webhook update; `None` fields keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct WebhookUpdate {
    pub url: Option<String>,
    pub name: Option<String>,
    pub events: Option<Vec<WebhookEventType>>,
    pub secret: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub retries: Option<u32>,
    pub active: Option<bool>,
}

/// An immutable event record.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub id: String,
    /// Unix milliseconds.
    pub ts: u64,
    pub owner: String,
    #[serde(rename = "type")]
    pub event_type: WebhookEventType,
    pub data: Value,
}

/// One delivery attempt record.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookDelivery {
    pub id: String,
    pub webhook_id: String,
    pub event_id: String,
    /// 1-based attempt counter.
    pub attempt: u32,
    /// Unix milliseconds.
    pub ts: u64,
    pub success: bool,
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    /// When the next automatic retry fires, unix milliseconds.
    pub next_retry: Option<u64>,
}

struct DeliveryJob {
    webhook_id: String,
    event: WebhookEvent,
}

/// Webhook store plus the event fan-out machinery.
pub struct WebhookDispatcher {
    inner: Arc<DispatcherInner>,
}

pub(crate) struct DispatcherInner {
    webhooks: DashMap<String, WebhookConfig>,
    events: RwLock<Vec<WebhookEvent>>,
    deliveries: RwLock<Vec<WebhookDelivery>>,
    workers: DashMap<String, mpsc::UnboundedSender<DeliveryJob>>,
    transport: Arc<dyn DeliveryTransport>,
    config: config::WebhooksConfig,
}

impl WebhookDispatcher {
    pub fn new(config: config::WebhooksConfig, transport: Arc<dyn DeliveryTransport>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                webhooks: DashMap::new(),
                events: RwLock::new(Vec::new()),
                deliveries: RwLock::new(Vec::new()),
                workers: DashMap::new(),
                transport,
                config,
            }),
        }
    }

    /// Register a webhook for an owner.
    pub fn create_webhook(&self, owner: &str, params: NewWebhook) -> Result<WebhookConfig> {
        if !params.url.starts_with("http://") && !params.url.starts_with("https://") {
            return Err(Error::InvalidRequest("webhook url must be http(s)".into()));
        }

        let webhook = WebhookConfig {
            id: format!("wh_{}", uuid::Uuid::new_v4().simple()),
            owner: owner.to_string(),
            url: params.url,
            name: params.name,
            events: params.events,
            secret: params.secret.map(SecretString::from),
            headers: params.headers,
            retries: params.retries.unwrap_or(self.inner.config.default_retries).min(MAX_RETRIES),
            active: params.active,
            last_status: None,
            created_at: clock::unix_now_secs(),
        };

        self.inner.webhooks.insert(webhook.id.clone(), webhook.clone());
        log::debug!("Registered webhook '{}' for owner '{owner}'", webhook.id);

        Ok(webhook)
    }

    pub fn get_webhook(&self, id: &str, owner: &str) -> Result<WebhookConfig> {
        self.inner
            .webhooks
            .get(id)
            .filter(|webhook| webhook.owner == owner)
            .map(|webhook| webhook.clone())
            .ok_or_else(|| Error::NotFound(format!("webhook '{id}'")))
    }

    pub fn update_webhook(&self, id: &str, owner: &str, update: WebhookUpdate) -> Result<WebhookConfig> {
        let mut entry = self
            .inner
            .webhooks
            .get_mut(id)
            .filter(|webhook| webhook.owner == owner)
            .ok_or_else(|| Error::NotFound(format!("webhook '{id}'")))?;

        if let Some(url) = update.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::InvalidRequest("webhook url must be http(s)".into()));
            }
            entry.url = url;
        }
        if let Some(name) = update.name {
            entry.name = name;
        }
        if let Some(events) = update.events {
            entry.events = events;
        }
        if update.secret.is_some() {
            entry.secret = update.secret.map(SecretString::from);
        }
        if let Some(headers) = update.headers {
            entry.headers = headers;
        }
        if let Some(retries) = update.retries {
            entry.retries = retries.min(MAX_RETRIES);
        }
        if let Some(active) = update.active {
            entry.active = active;
        }

        Ok(entry.clone())
    }

    pub fn delete_webhook(&self, id: &str, owner: &str) -> Result<WebhookConfig> {
        let owned = self
            .inner
            .webhooks
            .get(id)
            .map(|webhook| webhook.owner == owner)
            .unwrap_or(false);

        if !owned {
            return Err(Error::NotFound(format!("webhook '{id}'")));
        }

        // Dropping the sender ends the worker after its queued jobs drain.
        self.inner.workers.remove(id);

        self.inner
            .webhooks
            .remove(id)
            .map(|(_, webhook)| webhook)
            .ok_or_else(|| Error::NotFound(format!("webhook '{id}'")))
    }

    pub fn list_webhooks(&self, owner: &str) -> Vec<WebhookConfig> {
        let mut webhooks: Vec<_> = self
            .inner
            .webhooks
            .iter()
            .filter(|webhook| webhook.owner == owner)
            .map(|webhook| webhook.clone())
            .collect();

        webhooks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        webhooks
    }

    /// Append an event and fan it out to the owner's subscribed webhooks.
    ///
    /// Returns the stored event. Delivery happens asynchronously and never
    /// affects the caller: a dead webhook target cannot fail the request
    /// that triggered the event.
    pub fn trigger_event(&self, owner: &str, event_type: WebhookEventType, data: Value) -> WebhookEvent {
        let event = WebhookEvent {
            id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            ts: clock::unix_now_millis(),
            owner: owner.to_string(),
            event_type,
            data,
        };

        {
            let mut events = self.inner.events.write().unwrap_or_else(|e| e.into_inner());
            events.push(event.clone());
        }

        let subscribers: Vec<String> = self
            .inner
            .webhooks
            .iter()
            .filter(|webhook| webhook.owner == owner && webhook.accepts(event_type))
            .map(|webhook| webhook.id.clone())
            .collect();

        for webhook_id in subscribers {
            self.enqueue(&webhook_id, event.clone());
        }

        event
    }

    /// Re-attempt one specific delivery, continuing its attempt counter.
    pub async fn retry_delivery(&self, delivery_id: &str, owner: &str) -> Result<WebhookDelivery> {
        let previous = {
            let deliveries = self.inner.deliveries.read().unwrap_or_else(|e| e.into_inner());
            deliveries
                .iter()
                .find(|delivery| delivery.id == delivery_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("delivery '{delivery_id}'")))?
        };

        let webhook = self.get_webhook(&previous.webhook_id, owner)?;

        let event = {
            let events = self.inner.events.read().unwrap_or_else(|e| e.into_inner());
            events
                .iter()
                .find(|event| event.id == previous.event_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("event '{}'", previous.event_id)))?
        };

        Ok(self.inner.attempt_delivery(&webhook, &event, previous.attempt + 1, None).await)
    }

    /// Delivery history for one of the owner's webhooks, oldest first.
    pub fn list_deliveries(&self, webhook_id: &str, owner: &str) -> Result<Vec<WebhookDelivery>> {
        self.get_webhook(webhook_id, owner)?;

        let deliveries = self.inner.deliveries.read().unwrap_or_else(|e| e.into_inner());
        Ok(deliveries
            .iter()
            .filter(|delivery| delivery.webhook_id == webhook_id)
            .cloned()
            .collect())
    }

    /// The owner's event log, oldest first.
    pub fn list_events(&self, owner: &str) -> Vec<WebhookEvent> {
        let events = self.inner.events.read().unwrap_or_else(|e| e.into_inner());
        events.iter().filter(|event| event.owner == owner).cloned().collect()
    }

    fn enqueue(&self, webhook_id: &str, event: WebhookEvent) {
        let sender = self
            .inner
            .workers
            .entry(webhook_id.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                delivery::spawn_worker(Arc::downgrade(&self.inner), rx);
                tx
            })
            .clone();

        let job = DeliveryJob {
            webhook_id: webhook_id.to_string(),
            event,
        };

        if sender.send(job).is_err() {
            // Worker died between lookup and send; a fresh one picks up the
            // next event.
            self.inner.workers.remove(webhook_id);
            log::warn!("Delivery worker for webhook '{webhook_id}' was gone, dropped one job");
        }
    }
}

pub(crate) type DispatcherHandle = Weak<DispatcherInner>;
