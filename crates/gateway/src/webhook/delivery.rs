//! Delivery workers: signing, posting, retrying.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::mpsc;

use super::{DeliveryJob, DispatcherHandle, DispatcherInner, WebhookConfig, WebhookDelivery, WebhookEvent};
use crate::clock;
use crate::http_client::http_client;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 signature carried in the `X-Signature` header.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    format!("{:x}", mac.finalize().into_bytes())
}

/// Wait before retrying after the given failed 1-based attempt.
pub fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.min(10))
}

/// Transport seam for delivery posts. The production implementation is
/// [`HttpTransport`]; tests substitute a recording stub.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// POST `body` to `url` with the given headers. Returns the HTTP
    /// status, or a transport-level error message when no response was
    /// received at all.
    async fn post(&self, url: &str, headers: &[(String, String)], body: &[u8]) -> Result<u16, String>;
}

/// reqwest-backed transport sharing the process-wide HTTP client.
#[derive(Clone, Default)]
pub struct HttpTransport;

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn post(&self, url: &str, headers: &[(String, String)], body: &[u8]) -> Result<u16, String> {
        let mut request = http_client().post(url).body(body.to_vec());

        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|error| error.to_string())?;
        Ok(response.status().as_u16())
    }
}

pub(super) fn spawn_worker(handle: DispatcherHandle, mut jobs: mpsc::UnboundedReceiver<DeliveryJob>) {
    tokio::spawn(async move {
        while let Some(job) = jobs.recv().await {
            // The dispatcher may be gone; workers must not keep it alive.
            let Some(inner) = handle.upgrade() else {
                break;
            };

            inner.deliver_with_retries(job).await;
        }
    });
}

impl DispatcherInner {
    fn webhook_snapshot(&self, id: &str) -> Option<WebhookConfig> {
        self.webhooks.get(id).map(|webhook| webhook.clone())
    }

    pub(super) async fn deliver_with_retries(&self, job: DeliveryJob) {
        // Re-read the webhook before each attempt so mid-flight updates
        // (new retries, deactivation, deletion) take effect.
        let Some(webhook) = self.webhook_snapshot(&job.webhook_id) else {
            return;
        };

        let max_attempts = webhook.retries + 1;

        for attempt in 1..=max_attempts {
            let Some(webhook) = self.webhook_snapshot(&job.webhook_id) else {
                return;
            };

            let will_retry_after = (attempt < max_attempts).then(|| retry_delay(attempt));
            let delivery = self
                .attempt_delivery(&webhook, &job.event, attempt, will_retry_after)
                .await;

            if delivery.success {
                return;
            }

            log::warn!(
                "Delivery of event '{}' to webhook '{}' failed (attempt {attempt}/{max_attempts})",
                job.event.id,
                webhook.id
            );

            if let Some(delay) = will_retry_after {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Run a single delivery attempt and record it.
    pub(super) async fn attempt_delivery(
        &self,
        webhook: &WebhookConfig,
        event: &WebhookEvent,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> WebhookDelivery {
        let body = serde_json::to_vec(event).unwrap_or_default();

        let mut headers: Vec<(String, String)> = vec![("Content-Type".to_string(), "application/json".to_string())];

        for (name, value) in &webhook.headers {
            headers.push((name.clone(), value.clone()));
        }

        if let Some(secret) = &webhook.secret {
            use secrecy::ExposeSecret as _;
            headers.push(("X-Signature".to_string(), sign_payload(secret.expose_secret(), &body)));
        }

        let posted = tokio::time::timeout(
            self.config.delivery_timeout,
            self.transport.post(&webhook.url, &headers, &body),
        )
        .await;

        let (success, status_code, response_body) = match posted {
            Ok(Ok(status)) => ((200..300).contains(&status), Some(status), None),
            Ok(Err(message)) => (false, None, Some(message)),
            Err(_) => (false, None, Some("delivery timed out".to_string())),
        };

        let now = clock::unix_now_millis();
        let delivery = WebhookDelivery {
            id: format!("del_{}", uuid::Uuid::new_v4().simple()),
            webhook_id: webhook.id.clone(),
            event_id: event.id.clone(),
            attempt,
            ts: now,
            success,
            status_code,
            response_body,
            next_retry: (!success)
                .then(|| retry_after.map(|delay| now + delay.as_millis() as u64))
                .flatten(),
        };

        {
            let mut deliveries = self.deliveries.write().unwrap_or_else(|e| e.into_inner());
            deliveries.push(delivery.clone());
        }

        if let Some(mut entry) = self.webhooks.get_mut(&webhook.id) {
            entry.last_status = status_code;
        }

        delivery
    }
}
