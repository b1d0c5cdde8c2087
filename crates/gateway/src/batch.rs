//! Batch intake, priority queueing, and bounded-concurrency processing.
//!
//! A single worker drains the queue. Children of the batch at the head
//! are dispatched in chunks of `max_concurrent_requests`; progress
//! counters are persisted after every chunk and only ever grow. Child
//! failures become `{error}` results at the child's index instead of
//! failing the batch.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::catalog::ModelCatalog;
use crate::clock;
use crate::error::{Error, Result};
use crate::messages::{ModelRequest, ModelResponse};
use crate::validate::validate_request;
use crate::webhook::{WebhookDispatcher, WebhookEventType};

/// Batch lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Queue priority. Ordering follows queue position: `High` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPriority {
    High,
    #[default]
    Normal,
    Low,
}

/// One child outcome, stored at the same index as its request.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BatchItemResult {
    Response(ModelResponse),
    Failure { error: String },
}

impl BatchItemResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Response(_))
    }
}

/// A batch of child requests tracked as a unit.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub id: String,
    pub owner: String,
    /// Accepted (valid) child requests.
    pub requests: Vec<ModelRequest>,
    pub state: BatchState,
    pub priority: BatchPriority,
    pub request_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    /// Index-aligned with `requests`; `None` until the child terminates.
    pub results: Vec<Option<BatchItemResult>>,
    pub callback_url: Option<String>,
    pub metadata: Option<Value>,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Set when the batch reaches a terminal state.
    pub completed_at: Option<u64>,
    pub error: Option<String>,
}

impl Batch {
    /// Summary payload for the `batch.completed` event: counters only,
    /// never the raw results.
    fn summary(&self) -> Value {
        serde_json::json!({
            "batch_id": self.id,
            "state": self.state.to_string(),
            "request_count": self.request_count,
            "completed_count": self.completed_count,
            "failed_count": self.failed_count,
            "callback_url": self.callback_url,
        })
    }
}

/// Intake options.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub priority: BatchPriority,
    pub callback_url: Option<String>,
    pub metadata: Option<Value>,
}

/// A rejected child, reported with its index in the submitted list.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidChild {
    pub index: usize,
    pub error: String,
}

/// Result of batch intake: the accepted batch plus any rejected children.
#[derive(Debug, Clone)]
pub struct BatchIntake {
    pub batch: Batch,
    pub invalid: Vec<InvalidChild>,
}

/// Capability the batch worker uses to run one child request through the
/// request pipeline.
#[async_trait]
pub trait ChildExecutor: Send + Sync {
    async fn execute(&self, owner: &str, request: ModelRequest) -> Result<ModelResponse>;
}

type QueueEntry = (String, BatchPriority);

/// Batch store plus the scheduler.
pub struct BatchProcessor {
    inner: Arc<ProcessorInner>,
}

struct ProcessorInner {
    batches: DashMap<String, Batch>,
    queue: Mutex<VecDeque<QueueEntry>>,
    wake: OnceLock<mpsc::UnboundedSender<()>>,
    catalog: Arc<ModelCatalog>,
    config: config::BatchConfig,
}

impl BatchProcessor {
    pub fn new(catalog: Arc<ModelCatalog>, config: config::BatchConfig) -> Self {
        Self {
            inner: Arc::new(ProcessorInner {
                batches: DashMap::new(),
                queue: Mutex::new(VecDeque::new()),
                wake: OnceLock::new(),
                catalog,
                config,
            }),
        }
    }

    /// Spawn the scheduler worker. Must be called exactly once, after the
    /// executor and dispatcher exist.
    pub fn start(&self, executor: Arc<dyn ChildExecutor>, events: Arc<WebhookDispatcher>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        if self.inner.wake.set(tx.clone()).is_err() {
            log::warn!("Batch scheduler started twice, ignoring");
            return;
        }

        let weak = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                loop {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };

                    let Some(batch_id) = inner.pop_next() else {
                        break;
                    };

                    if let Err(error) = inner.process(&batch_id, executor.as_ref()).await {
                        inner.mark_failed(&batch_id, &error.to_string());
                    }

                    inner.emit_callback(&batch_id, events.as_ref());
                }
            }
        });

        // Drain anything enqueued before the worker existed.
        let _ = tx.send(());
    }

    /// Validate children and enqueue a new batch.
    ///
    /// Invalid children are reported but do not block the valid ones; the
    /// batch is rejected only when every child is invalid.
    pub fn create_batch(&self, owner: &str, requests: Vec<ModelRequest>, options: BatchOptions) -> Result<BatchIntake> {
        if requests.is_empty() {
            return Err(Error::InvalidRequest("batch must contain at least one request".into()));
        }

        if requests.len() > self.inner.config.max_batch_size {
            return Err(Error::InvalidRequest(format!(
                "batch exceeds the maximum of {} requests",
                self.inner.config.max_batch_size
            )));
        }

        let mut valid = Vec::with_capacity(requests.len());
        let mut invalid = Vec::new();

        for (index, request) in requests.into_iter().enumerate() {
            match validate_request(&request, &self.inner.catalog) {
                Ok(()) => valid.push(request),
                Err(error) => invalid.push(InvalidChild {
                    index,
                    error: error.to_string(),
                }),
            }
        }

        if valid.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "all {} child requests are invalid",
                invalid.len()
            )));
        }

        let request_count = valid.len();
        let batch = Batch {
            id: format!("batch_{}", uuid::Uuid::new_v4().simple()),
            owner: owner.to_string(),
            results: vec![None; request_count],
            requests: valid,
            state: BatchState::Pending,
            priority: options.priority,
            request_count,
            completed_count: 0,
            failed_count: 0,
            callback_url: options.callback_url,
            metadata: options.metadata,
            created_at: clock::unix_now_millis(),
            completed_at: None,
            error: None,
        };

        self.inner.batches.insert(batch.id.clone(), batch.clone());
        self.inner.enqueue(&batch.id, batch.priority);

        if let Some(wake) = self.inner.wake.get() {
            let _ = wake.send(());
        }

        log::debug!(
            "Batch '{}' accepted with {request_count} children ({} invalid) at {:?} priority",
            batch.id,
            invalid.len(),
            batch.priority
        );

        Ok(BatchIntake { batch, invalid })
    }

    pub fn get_batch(&self, id: &str, owner: &str) -> Result<Batch> {
        self.inner
            .batches
            .get(id)
            .filter(|batch| batch.owner == owner)
            .map(|batch| batch.clone())
            .ok_or_else(|| Error::NotFound(format!("batch '{id}'")))
    }

    /// The owner's batches, newest first.
    pub fn list_batches(&self, owner: &str) -> Vec<Batch> {
        let mut batches: Vec<_> = self
            .inner
            .batches
            .iter()
            .filter(|batch| batch.owner == owner)
            .map(|batch| batch.clone())
            .collect();

        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        batches
    }

    /// Cancel a still-pending batch. Batches that entered processing keep
    /// running; their in-flight children cannot be recalled.
    pub fn cancel_batch(&self, id: &str, owner: &str) -> Result<Batch> {
        let mut entry = self
            .inner
            .batches
            .get_mut(id)
            .filter(|batch| batch.owner == owner)
            .ok_or_else(|| Error::NotFound(format!("batch '{id}'")))?;

        if entry.state != BatchState::Pending {
            return Err(Error::InvalidRequest(format!(
                "batch '{id}' is {} and can no longer be cancelled",
                entry.state
            )));
        }

        {
            let mut queue = self.inner.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.retain(|(queued_id, _)| queued_id != id);
        }

        entry.state = BatchState::Failed;
        entry.error = Some("cancelled".to_string());
        entry.completed_at = Some(clock::unix_now_millis());

        Ok(entry.clone())
    }

    #[cfg(test)]
    fn queued_ids(&self) -> Vec<String> {
        let queue = self.inner.queue.lock().unwrap();
        queue.iter().map(|(id, _)| id.clone()).collect()
    }
}

impl ProcessorInner {
    /// Insert before the first queued batch of strictly lower priority;
    /// equal priority appends, preserving FIFO within a priority band.
    fn enqueue(&self, id: &str, priority: BatchPriority) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());

        let position = queue
            .iter()
            .position(|(_, queued_priority)| *queued_priority > priority)
            .unwrap_or(queue.len());

        queue.insert(position, (id.to_string(), priority));
    }

    fn pop_next(&self) -> Option<String> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.pop_front().map(|(id, _)| id)
    }

    async fn process(&self, batch_id: &str, executor: &dyn ChildExecutor) -> Result<()> {
        let (owner, requests) = {
            let mut entry = self
                .batches
                .get_mut(batch_id)
                .ok_or_else(|| Error::Internal(Some(format!("batch '{batch_id}' vanished from the store"))))?;

            // A cancellation may have won the race after the pop.
            if entry.state != BatchState::Pending {
                return Ok(());
            }

            entry.state = BatchState::Processing;
            (entry.owner.clone(), entry.requests.clone())
        };

        log::debug!("Batch '{batch_id}' processing {} children", requests.len());

        let chunk_size = self.config.max_concurrent_requests.max(1);

        for (chunk_index, chunk) in requests.chunks(chunk_size).enumerate() {
            let dispatches = chunk
                .iter()
                .map(|request| executor.execute(&owner, request.clone()));

            let outcomes = futures::future::join_all(dispatches).await;

            let mut entry = self
                .batches
                .get_mut(batch_id)
                .ok_or_else(|| Error::Internal(Some(format!("batch '{batch_id}' vanished mid-flight"))))?;

            for (offset, outcome) in outcomes.into_iter().enumerate() {
                let index = chunk_index * chunk_size + offset;

                match outcome {
                    Ok(response) => {
                        entry.results[index] = Some(BatchItemResult::Response(response));
                        entry.completed_count += 1;
                    }
                    Err(error) => {
                        entry.results[index] = Some(BatchItemResult::Failure {
                            error: error.to_string(),
                        });
                        entry.failed_count += 1;
                    }
                }
            }
        }

        if let Some(mut entry) = self.batches.get_mut(batch_id) {
            entry.state = BatchState::Completed;
            entry.completed_at = Some(clock::unix_now_millis());
        }

        Ok(())
    }

    fn mark_failed(&self, batch_id: &str, error: &str) {
        if let Some(mut entry) = self.batches.get_mut(batch_id) {
            entry.state = BatchState::Failed;
            entry.error = Some(error.to_string());
            entry.completed_at = Some(clock::unix_now_millis());
        }

        log::error!("Batch '{batch_id}' failed: {error}");
    }

    fn emit_callback(&self, batch_id: &str, events: &WebhookDispatcher) {
        let Some(batch) = self.batches.get(batch_id) else {
            return;
        };

        if batch.state != BatchState::Completed || batch.callback_url.is_none() {
            return;
        }

        events.trigger_event(&batch.owner, WebhookEventType::BatchCompleted, batch.summary());
    }
}
