//! Usage analytics: synchronous recording, filtered queries, aggregates.
//!
//! The rest of the gateway only sees the narrow [`Recorder`] capability,
//! which keeps the dependency graph acyclic: the pipeline, cache, batch
//! processor, and webhook dispatcher all record through the same trait
//! object without knowing the store behind it.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::catalog::ModelCatalog;
use crate::clock;
use crate::messages::{RouteStrategy, TokenUsage};

/// Requested vs. actually-served model for one request.
#[derive(Debug, Clone, Serialize)]
pub struct ModelUsage {
    pub requested: String,
    /// Set when a model served the request; `None` for failures before
    /// dispatch.
    pub actual: Option<String>,
}

impl ModelUsage {
    /// Whether the request was served by a different model than requested.
    pub fn is_fallback(&self) -> bool {
        self.actual.as_ref().is_some_and(|actual| *actual != self.requested)
    }
}

/// Cache outcome attached to a usage record.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheOutcome {
    pub hit: bool,
    /// Remaining TTL of the entry that served a hit, in seconds.
    pub ttl_secs: Option<u64>,
}

/// Per-request audit record.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub id: String,
    /// Unix milliseconds.
    pub ts: u64,
    pub owner: String,
    pub model: ModelUsage,
    pub tokens: TokenUsage,
    /// Computed at record time from the actual model's catalog prices;
    /// zero for cache hits.
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub success: bool,
    pub error_kind: Option<String>,
    pub routing_strategy: Option<RouteStrategy>,
    pub endpoint_id: Option<String>,
    pub cache: CacheOutcome,
}

impl UsageRecord {
    /// Fresh record with a generated id and current timestamp. Cost is
    /// filled in by the store at record time.
    pub fn new(owner: impl Into<String>, model: ModelUsage) -> Self {
        Self {
            id: format!("usage_{}", uuid::Uuid::new_v4().simple()),
            ts: clock::unix_now_millis(),
            owner: owner.into(),
            model,
            tokens: TokenUsage::default(),
            cost_usd: 0.0,
            latency_ms: 0,
            success: false,
            error_kind: None,
            routing_strategy: None,
            endpoint_id: None,
            cache: CacheOutcome::default(),
        }
    }
}

/// Narrow recording capability injected into the request plane.
pub trait Recorder: Send + Sync {
    /// Append a usage record. Must not suspend.
    fn log_usage(&self, record: UsageRecord);
}

/// Query filter for usage records. All fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct UsageFilter {
    pub owner: Option<String>,
    /// Inclusive lower bound, unix milliseconds.
    pub start: Option<u64>,
    /// Inclusive upper bound, unix milliseconds.
    pub end: Option<u64>,
    /// Match records whose requested or actual model is in this set.
    pub models: Option<Vec<String>>,
    pub endpoint_id: Option<String>,
}

impl UsageFilter {
    fn matches(&self, record: &UsageRecord) -> bool {
        if let Some(owner) = &self.owner
            && record.owner != *owner
        {
            return false;
        }

        if let Some(start) = self.start
            && record.ts < start
        {
            return false;
        }

        if let Some(end) = self.end
            && record.ts > end
        {
            return false;
        }

        if let Some(models) = &self.models {
            let actual_matches = record.model.actual.as_ref().is_some_and(|m| models.contains(m));
            if !actual_matches && !models.contains(&record.model.requested) {
                return false;
            }
        }

        if let Some(endpoint_id) = &self.endpoint_id
            && record.endpoint_id.as_deref() != Some(endpoint_id.as_str())
        {
            return false;
        }

        true
    }
}

/// Pagination window for usage queries.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { limit: 50, offset: 0 }
    }
}

/// One page of usage records plus the total match count.
#[derive(Debug, Clone, Serialize)]
pub struct UsagePage {
    pub records: Vec<UsageRecord>,
    pub total: usize,
}

/// Token totals wide enough for long-lived aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenTotals {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

/// Aggregates over the matching records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageMetrics {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub tokens: TokenTotals,
    pub total_cost_usd: f64,
    pub average_latency_ms: f64,
    /// Request counts keyed by the model that served (or would have
    /// served) each request.
    pub requests_by_model: BTreeMap<String, u64>,
    /// Records whose actual model differs from the requested one.
    pub fallbacks: u64,
    pub cache_hits: u64,
}

/// In-memory analytics store.
pub struct AnalyticsStore {
    records: RwLock<Vec<UsageRecord>>,
    catalog: Arc<ModelCatalog>,
    config: config::AnalyticsConfig,
}

impl AnalyticsStore {
    pub fn new(catalog: Arc<ModelCatalog>, config: config::AnalyticsConfig) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            catalog,
            config,
        }
    }

    /// Cost in USD for serving `tokens` with `model`, using catalog prices
    /// or the configured fallback rates for unknown models.
    pub fn cost_for(&self, model: &str, tokens: TokenUsage) -> f64 {
        let (input_price, output_price) = match self.catalog.get(model) {
            Some(info) => (info.input_price, info.output_price),
            None => (self.config.default_input_price, self.config.default_output_price),
        };

        (f64::from(tokens.prompt_tokens) * input_price + f64::from(tokens.completion_tokens) * output_price) / 1e6
    }

    /// Usage records matching the filter, newest first.
    pub fn query(&self, filter: &UsageFilter, page: Pagination) -> UsagePage {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());

        let mut matching: Vec<UsageRecord> = records.iter().filter(|r| filter.matches(r)).cloned().collect();
        matching.sort_by(|a, b| b.ts.cmp(&a.ts).then_with(|| b.id.cmp(&a.id)));

        let total = matching.len();
        let records = matching.into_iter().skip(page.offset).take(page.limit).collect();

        UsagePage { records, total }
    }

    /// Aggregate metrics over the matching records.
    pub fn metrics(&self, filter: &UsageFilter) -> UsageMetrics {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());

        let mut metrics = UsageMetrics::default();
        let mut latency_sum: u64 = 0;

        for record in records.iter().filter(|r| filter.matches(r)) {
            metrics.total_requests += 1;

            if record.success {
                metrics.successful += 1;
            } else {
                metrics.failed += 1;
            }

            metrics.tokens.input += u64::from(record.tokens.prompt_tokens);
            metrics.tokens.output += u64::from(record.tokens.completion_tokens);
            metrics.tokens.total += u64::from(record.tokens.total_tokens);
            metrics.total_cost_usd += record.cost_usd;
            latency_sum += record.latency_ms;

            let model = record.model.actual.as_ref().unwrap_or(&record.model.requested);
            *metrics.requests_by_model.entry(model.clone()).or_default() += 1;

            if record.model.is_fallback() {
                metrics.fallbacks += 1;
            }

            if record.cache.hit {
                metrics.cache_hits += 1;
            }
        }

        if metrics.total_requests > 0 {
            metrics.average_latency_ms = latency_sum as f64 / metrics.total_requests as f64;
        }

        metrics
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Recorder for AnalyticsStore {
    fn log_usage(&self, mut record: UsageRecord) {
        record.cost_usd = if record.cache.hit {
            0.0
        } else {
            match &record.model.actual {
                Some(model) => self.cost_for(model, record.tokens),
                None => 0.0,
            }
        };

        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::AnalyticsConfig;

    fn store() -> AnalyticsStore {
        AnalyticsStore::new(Arc::new(ModelCatalog::builtin()), AnalyticsConfig::default())
    }

    fn record(owner: &str, requested: &str, actual: Option<&str>) -> UsageRecord {
        let mut record = UsageRecord::new(
            owner,
            ModelUsage {
                requested: requested.into(),
                actual: actual.map(Into::into),
            },
        );
        record.tokens = TokenUsage::new(1000, 500);
        record.latency_ms = 100;
        record.success = actual.is_some();
        record
    }

    #[test]
    fn cost_uses_actual_model_prices() {
        let store = store();

        // gpt-4o: 5.0 in / 15.0 out per million tokens.
        let cost = store.cost_for("openai/gpt-4o", TokenUsage::new(1000, 500));
        let expected = (1000.0 * 5.0 + 500.0 * 15.0) / 1e6;
        assert!((cost - expected).abs() < 1e-12);
    }

    #[test]
    fn unknown_models_fall_back_to_configured_rates() {
        let store = store();

        let cost = store.cost_for("acme/unknown", TokenUsage::new(1_000_000, 1_000_000));
        // Defaults: 0.5 in, 1.5 out.
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn cache_hits_record_zero_cost() {
        let store = store();

        let mut hit = record("alice", "openai/gpt-4o", Some("openai/gpt-4o"));
        hit.cache = CacheOutcome {
            hit: true,
            ttl_secs: Some(60),
        };
        store.log_usage(hit);

        let page = store.query(&UsageFilter::default(), Pagination::default());
        assert_eq!(page.records[0].cost_usd, 0.0);
        assert!(page.records[0].cache.hit);
    }

    #[test]
    fn query_sorts_newest_first_and_paginates() {
        let store = store();

        for i in 0..5 {
            let mut r = record("alice", "openai/gpt-4o", Some("openai/gpt-4o"));
            r.ts = 1000 + i;
            store.log_usage(r);
        }

        let page = store.query(
            &UsageFilter::default(),
            Pagination { limit: 2, offset: 0 },
        );
        assert_eq!(page.total, 5);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].ts, 1004);
        assert_eq!(page.records[1].ts, 1003);

        let next = store.query(
            &UsageFilter::default(),
            Pagination { limit: 2, offset: 2 },
        );
        assert_eq!(next.records[0].ts, 1002);
    }

    #[test]
    fn filters_are_conjunctive() {
        let store = store();
        store.log_usage(record("alice", "openai/gpt-4o", Some("openai/gpt-4o")));
        store.log_usage(record("bob", "openai/gpt-4o", Some("openai/gpt-4o")));
        store.log_usage(record("alice", "anthropic/claude-3-haiku", Some("anthropic/claude-3-haiku")));

        let filter = UsageFilter {
            owner: Some("alice".into()),
            models: Some(vec!["openai/gpt-4o".into()]),
            ..UsageFilter::default()
        };

        let page = store.query(&filter, Pagination::default());
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].owner, "alice");
    }

    #[test]
    fn metrics_aggregate_fallbacks_and_cache_hits() {
        let store = store();

        store.log_usage(record("alice", "openai/gpt-4o", Some("openai/gpt-4o")));
        // Fallback: requested opus, served gpt-4o.
        store.log_usage(record("alice", "anthropic/claude-3-opus", Some("openai/gpt-4o")));
        // Failure before dispatch.
        let mut failed = record("alice", "openai/gpt-4o", None);
        failed.error_kind = Some("no_model_available".into());
        store.log_usage(failed);
        // Cache hit.
        let mut hit = record("alice", "openai/gpt-4o", Some("openai/gpt-4o"));
        hit.cache.hit = true;
        store.log_usage(hit);

        let metrics = store.metrics(&UsageFilter::default());

        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.successful, 3);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.fallbacks, 1);
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.requests_by_model["openai/gpt-4o"], 4);
        assert_eq!(metrics.tokens.input, 4000);
        assert_eq!(metrics.average_latency_ms, 100.0);
        assert_eq!(store.len(), 4);
    }
}
