//! Fingerprint-keyed response cache.
//!
//! Keys are SHA-256 hashes of a canonicalized request: `stream` is always
//! dropped, sampling knobs are dropped per policy, and messages are either
//! sorted into a canonical order (`exact` keying) or reduced to normalized
//! user text (`semantic` keying). Canonical JSON comes from serde_json's
//! sorted object maps, so two requests that differ only in field order or
//! whitespace produce the same fingerprint.
//!
//! Concurrent misses on the same fingerprint are allowed to race; the last
//! writer wins. Responses for one fingerprint are interchangeable, so no
//! single-flight deduplication is needed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use config::{CacheConfig, CacheKeyStrategy};
use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::messages::{ModelRequest, ModelResponse, Role, TokenUsage};

/// A stored response plus bookkeeping.
#[derive(Debug, Clone)]
struct CacheEntry {
    /// The model that actually produced the response.
    model_id: String,
    response: ModelResponse,
    created_at: Instant,
    expires_at: Instant,
    token_usage: TokenUsage,
}

/// Cache lookup result handed back to the pipeline.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub response: ModelResponse,
    pub model_id: String,
    pub token_usage: TokenUsage,
    /// Time the entry has left to live, recorded on analytics hits.
    pub ttl_remaining: Duration,
}

/// Invalidation selector. An empty selector clears the whole cache.
#[derive(Debug, Clone, Default)]
pub struct InvalidateFilter {
    /// Remove entries whose stored (actual) model id matches.
    pub model: Option<String>,
}

impl InvalidateFilter {
    fn is_empty(&self) -> bool {
        self.model.is_none()
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Process-wide response cache.
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    policy: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(policy: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &CacheConfig {
        &self.policy
    }

    /// Look up a response for this request.
    ///
    /// Streaming requests never hit the cache. Expired entries are removed
    /// on access and reported as misses.
    pub fn get(&self, request: &ModelRequest) -> Option<CacheHit> {
        if !self.policy.enabled || request.is_streaming() {
            return None;
        }

        let key = fingerprint(request, &self.policy);
        let now = Instant::now();

        if let Some(entry) = self.entries.get(&key) {
            if entry.expires_at > now {
                self.hits.fetch_add(1, Ordering::Relaxed);

                return Some(CacheHit {
                    response: entry.response.clone(),
                    model_id: entry.model_id.clone(),
                    token_usage: entry.token_usage,
                    ttl_remaining: entry.expires_at - now,
                });
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // Expired: drop the read guard before removing.
        self.entries.remove(&key);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a response. No-op when caching is disabled or the request was
    /// streamed.
    pub fn set(&self, request: &ModelRequest, response: &ModelResponse, usage: TokenUsage) {
        if !self.policy.enabled || request.is_streaming() {
            return;
        }

        let key = fingerprint(request, &self.policy);
        let now = Instant::now();

        let entry = CacheEntry {
            model_id: response.routed_through.clone(),
            response: response.clone(),
            created_at: now,
            expires_at: now + self.policy.ttl,
            token_usage: usage,
        };

        debug_assert!(entry.expires_at > entry.created_at);
        self.entries.insert(key, entry);
    }

    /// Remove entries matching the selector; an empty selector clears
    /// everything. Returns the number of entries removed.
    pub fn invalidate(&self, filter: &InvalidateFilter) -> usize {
        if filter.is_empty() {
            let removed = self.entries.len();
            self.entries.clear();
            log::debug!("Cache cleared, {removed} entries removed");
            return removed;
        }

        let before = self.entries.len();
        if let Some(model) = &filter.model {
            self.entries.retain(|_, entry| entry.model_id != *model);
        }

        before - self.entries.len()
    }

    /// Drop expired entries. Called by the background sweeper; safe to call
    /// from anywhere since each removal is a single map operation.
    pub fn remove_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - self.entries.len();

        if removed > 0 {
            log::debug!("Cache sweep removed {removed} expired entries");
        }

        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

/// Compute the 256-bit fingerprint for a request under the given policy.
pub fn fingerprint(request: &ModelRequest, policy: &CacheConfig) -> String {
    let canonical = canonical_json(request, policy);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Canonical JSON form of a request.
///
/// serde_json's object map is a BTreeMap, so keys serialize in sorted
/// order with no insignificant whitespace. `skip_serializing_if` on the
/// request type keeps absent knobs out of the map entirely.
fn canonical_json(request: &ModelRequest, policy: &CacheConfig) -> String {
    let value = serde_json::to_value(request).unwrap_or(Value::Null);

    let Value::Object(mut root) = value else {
        return value.to_string();
    };

    root.remove("stream");

    if policy.ignore_temperature {
        root.remove("temperature");
    }

    if policy.ignore_top_p {
        root.remove("top_p");
    }

    match policy.key_strategy {
        CacheKeyStrategy::Exact => {
            if let Some(Value::Array(messages)) = root.get_mut("messages") {
                messages.sort_by_key(|message| {
                    let role = message
                        .get("role")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    (role, message.to_string())
                });
            }
        }
        CacheKeyStrategy::Semantic => {
            let user_texts: Vec<Value> = request
                .messages
                .iter()
                .filter(|message| message.role == Role::User)
                .map(|message| Value::String(message.content.text().trim().to_lowercase()))
                .collect();

            root.insert("messages".to_string(), Value::Array(user_texts));
        }
    }

    Value::Object(root).to_string()
}

/// Spawn the background sweeper for a shared cache.
///
/// The task holds only a weak reference: when the gateway drops the cache,
/// the sweeper exits on its next tick.
pub(crate) fn spawn_sweeper(cache: &std::sync::Arc<ResponseCache>) -> tokio::task::JoinHandle<()> {
    let weak = std::sync::Arc::downgrade(cache);
    let interval = cache.policy.sweep_interval;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Some(cache) = weak.upgrade() else {
                break;
            };

            cache.remove_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ChatMessage, FinishReason};

    fn policy() -> CacheConfig {
        CacheConfig::default()
    }

    fn request(text: &str) -> ModelRequest {
        ModelRequest::new("openai/gpt-4o", vec![ChatMessage::user(text)])
    }

    fn response(model: &str) -> ModelResponse {
        ModelResponse::new(model, "answer", FinishReason::Stop, TokenUsage::new(2, 3))
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = ResponseCache::new(policy());
        let req = request("Hi");

        assert!(cache.get(&req).is_none());
        cache.set(&req, &response("openai/gpt-4o"), TokenUsage::new(2, 3));

        let hit = cache.get(&req).expect("cache hit");
        assert_eq!(hit.model_id, "openai/gpt-4o");
        assert_eq!(hit.response.choices[0].message.content, "answer");
        assert!(hit.ttl_remaining > Duration::ZERO);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn expired_entries_are_removed_on_access() {
        let mut config = policy();
        config.ttl = Duration::from_millis(5);
        let cache = ResponseCache::new(config);
        let req = request("Hi");

        cache.set(&req, &response("openai/gpt-4o"), TokenUsage::default());
        std::thread::sleep(Duration::from_millis(10));

        assert!(cache.get(&req).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn streaming_requests_bypass_the_cache() {
        let cache = ResponseCache::new(policy());
        let mut req = request("Hi");
        req.stream = Some(true);

        cache.set(&req, &response("openai/gpt-4o"), TokenUsage::default());
        assert_eq!(cache.stats().entries, 0);
        assert!(cache.get(&req).is_none());
    }

    #[test]
    fn disabled_cache_is_a_no_op() {
        let mut config = policy();
        config.enabled = false;
        let cache = ResponseCache::new(config);
        let req = request("Hi");

        cache.set(&req, &response("openai/gpt-4o"), TokenUsage::default());
        assert!(cache.get(&req).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn stream_flag_does_not_change_the_fingerprint() {
        let config = policy();
        let plain = request("Hi");
        let mut streaming = request("Hi");
        streaming.stream = Some(false);

        assert_eq!(fingerprint(&plain, &config), fingerprint(&streaming, &config));
    }

    #[test]
    fn exact_keying_is_stable_under_message_order() {
        let config = policy();

        let forward = ModelRequest::new(
            "openai/gpt-4o",
            vec![ChatMessage::system("persona"), ChatMessage::user("Hi")],
        );
        let reversed = ModelRequest::new(
            "openai/gpt-4o",
            vec![ChatMessage::user("Hi"), ChatMessage::system("persona")],
        );

        assert_eq!(fingerprint(&forward, &config), fingerprint(&reversed, &config));
    }

    #[test]
    fn different_content_produces_different_fingerprints() {
        let config = policy();
        assert_ne!(
            fingerprint(&request("Hi"), &config),
            fingerprint(&request("Bye"), &config)
        );
    }

    #[test]
    fn ignore_temperature_policy_collapses_keys() {
        let mut config = policy();
        config.ignore_temperature = true;

        let mut hot = request("Hi");
        hot.temperature = Some(1.8);
        let mut cold = request("Hi");
        cold.temperature = Some(0.1);

        assert_eq!(fingerprint(&hot, &config), fingerprint(&cold, &config));

        // Without the policy the knob is part of the key.
        assert_ne!(fingerprint(&hot, &policy()), fingerprint(&cold, &policy()));
    }

    #[test]
    fn semantic_keying_normalizes_user_text_and_ignores_assistant_turns() {
        let mut config = policy();
        config.key_strategy = CacheKeyStrategy::Semantic;

        let noisy = ModelRequest::new(
            "openai/gpt-4o",
            vec![
                ChatMessage::user("  What Is Rust?  "),
                ChatMessage::assistant("a language"),
            ],
        );
        let clean = ModelRequest::new("openai/gpt-4o", vec![ChatMessage::user("what is rust?")]);

        assert_eq!(fingerprint(&noisy, &config), fingerprint(&clean, &config));
    }

    #[test]
    fn invalidate_by_model_only_removes_matching_entries() {
        let cache = ResponseCache::new(policy());

        cache.set(&request("a"), &response("openai/gpt-4o"), TokenUsage::default());
        cache.set(&request("b"), &response("anthropic/claude-3-haiku"), TokenUsage::default());

        let removed = cache.invalidate(&InvalidateFilter {
            model: Some("openai/gpt-4o".into()),
        });

        assert_eq!(removed, 1);
        assert_eq!(cache.stats().entries, 1);
        assert!(cache.get(&request("b")).is_some());
    }

    #[test]
    fn empty_invalidate_clears_everything() {
        let cache = ResponseCache::new(policy());

        cache.set(&request("a"), &response("openai/gpt-4o"), TokenUsage::default());
        cache.set(&request("b"), &response("openai/gpt-4o"), TokenUsage::default());

        let removed = cache.invalidate(&InvalidateFilter::default());
        assert_eq!(removed, 2);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn remove_expired_only_drops_dead_entries() {
        let mut config = policy();
        config.ttl = Duration::from_millis(5);
        let cache = ResponseCache::new(config);

        cache.set(&request("short"), &response("openai/gpt-4o"), TokenUsage::default());
        std::thread::sleep(Duration::from_millis(10));

        // A fresh entry inserted under a longer-lived cache would survive;
        // here everything is expired.
        assert_eq!(cache.remove_expired(), 1);
        assert_eq!(cache.stats().entries, 0);
    }
}
