//! Post-response usage accounting: per-service statistics and durable
//! usage records.
//!
//! Stats are keyed globally by (provider uuid, model) so two rules that
//! share a service share its counters. All updates for one key are
//! serialized by the map's per-entry locking; readers take copies.

use std::sync::Arc;

use dashmap::DashMap;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::UsageRepository;

/// Terminal status of one forwarded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
    /// The request completed normally.
    Success,
    /// The request failed.
    Error,
    /// The client went away mid-stream; counts cover what was delivered.
    Partial,
}

/// Immutable row describing one completed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Provider that served the request.
    pub provider: Uuid,
    /// Upstream model name.
    pub model: String,
    /// Scenario tag.
    pub scenario: String,
    /// Rule that routed the request.
    pub rule: Uuid,
    /// Client-visible request model.
    pub request_model: String,
    /// When the request completed.
    pub timestamp: Timestamp,
    /// Input tokens, observed or estimated.
    pub input_tokens: u32,
    /// Output tokens, observed or estimated.
    pub output_tokens: u32,
    /// Sum of the two.
    pub total_tokens: u32,
    /// Terminal status.
    pub status: UsageStatus,
    /// Error code from the taxonomy, for error/partial records.
    pub error_code: Option<String>,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: u64,
    /// Whether the response was streamed.
    pub streamed: bool,
}

/// Map an error message onto the usage error-code taxonomy by substring.
pub fn categorize_error(message: &str) -> &'static str {
    let lower = message.to_lowercase();

    if lower.contains("invalid api key") || lower.contains("invalid_api_key") {
        "INVALID_API_KEY"
    } else if lower.contains("authentication") || lower.contains("unauthorized") || lower.contains("401") {
        "AUTHENTICATION_FAILED"
    } else if lower.contains("rate limit") || lower.contains("429") {
        "RATE_LIMIT_EXCEEDED"
    } else if lower.contains("model not") || lower.contains("not found") || lower.contains("404") {
        "MODEL_NOT_AVAILABLE"
    } else if lower.contains("timed out") || lower.contains("timeout") {
        "CONNECTION_TIMEOUT"
    } else if lower.contains("canceled") || lower.contains("cancelled") {
        "context_canceled"
    } else if lower.contains("panic") {
        "panic"
    } else if lower.contains("stream creation") {
        "stream_creation_failed"
    } else if lower.contains("stream") {
        "stream_error"
    } else if lower.contains("connection") || lower.contains("forward") || lower.contains("dns") {
        "forward_failed"
    } else {
        "PROBE_FAILED"
    }
}

/// Windowed counters for one (provider, model) key.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ServiceStats {
    /// Requests over the lifetime of the process.
    pub lifetime_requests: u64,
    /// Requests in the current window.
    pub window_requests: u64,
    /// Input tokens in the current window.
    pub window_input_tokens: u64,
    /// Output tokens in the current window.
    pub window_output_tokens: u64,
    /// Total tokens in the current window.
    pub window_total_tokens: u64,
    /// Last time this key served a request.
    pub last_used: Option<Timestamp>,
    /// When the current window started.
    pub window_start: Timestamp,
}

impl ServiceStats {
    fn new(now: Timestamp) -> Self {
        ServiceStats {
            lifetime_requests: 0,
            window_requests: 0,
            window_input_tokens: 0,
            window_output_tokens: 0,
            window_total_tokens: 0,
            last_used: None,
            window_start: now,
        }
    }

    fn roll_if_elapsed(&mut self, now: Timestamp, window_seconds: u64) {
        let elapsed = now.as_second() - self.window_start.as_second();

        if elapsed >= window_seconds as i64 {
            self.window_requests = 0;
            self.window_input_tokens = 0;
            self.window_output_tokens = 0;
            self.window_total_tokens = 0;
            self.window_start = now;
        }
    }
}

/// Key of the global stats map.
pub type StatsKey = (Uuid, String);

/// Process-wide per-service statistics registry.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    stats: DashMap<StatsKey, ServiceStats>,
}

impl StatsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request for the key, rolling the window first.
    pub fn record(&self, provider: Uuid, model: &str, window_seconds: u64, input_tokens: u32, output_tokens: u32) {
        let now = Timestamp::now();
        let mut entry = self
            .stats
            .entry((provider, model.to_string()))
            .or_insert_with(|| ServiceStats::new(now));

        entry.roll_if_elapsed(now, window_seconds);
        entry.lifetime_requests += 1;
        entry.window_requests += 1;
        entry.window_input_tokens += u64::from(input_tokens);
        entry.window_output_tokens += u64::from(output_tokens);
        entry.window_total_tokens += u64::from(input_tokens) + u64::from(output_tokens);
        entry.last_used = Some(now);
    }

    /// Snapshot one key by copy, rolling the window first so readers never
    /// see counters from an expired window.
    pub fn snapshot(&self, provider: Uuid, model: &str, window_seconds: u64) -> Option<ServiceStats> {
        let now = Timestamp::now();

        self.stats.get_mut(&(provider, model.to_string())).map(|mut entry| {
            entry.roll_if_elapsed(now, window_seconds);
            *entry
        })
    }

    /// Snapshot every key by copy.
    pub fn all(&self) -> Vec<(StatsKey, ServiceStats)> {
        self.stats
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Drop all counters.
    pub fn clear(&self) {
        self.stats.clear();
    }
}

/// Post-response accounting: in-memory stats plus a persisted record.
pub struct UsageTracker {
    stats: Arc<StatsRegistry>,
    repository: Arc<dyn UsageRepository>,
}

impl UsageTracker {
    /// Create a tracker over the given registry and repository.
    pub fn new(stats: Arc<StatsRegistry>, repository: Arc<dyn UsageRepository>) -> Self {
        UsageTracker { stats, repository }
    }

    /// The shared stats registry.
    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    /// Most recent usage records, newest first.
    pub async fn recent(&self, limit: usize) -> anyhow::Result<Vec<UsageRecord>> {
        self.repository.list(limit).await
    }

    /// Record one completed request: update stats, then persist. The
    /// repository write is best-effort; failures are logged, never
    /// propagated into the response path.
    pub async fn record(&self, record: UsageRecord, window_seconds: u64) {
        self.stats.record(
            record.provider,
            &record.model,
            window_seconds,
            record.input_tokens,
            record.output_tokens,
        );

        if let Err(error) = self.repository.append(record).await {
            log::error!("Failed to persist usage record: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryUsageRepository;

    fn record(provider: Uuid, status: UsageStatus) -> UsageRecord {
        UsageRecord {
            provider,
            model: "claude-3-5-haiku-latest".to_string(),
            scenario: "default".to_string(),
            rule: Uuid::new_v4(),
            request_model: "alpha".to_string(),
            timestamp: Timestamp::now(),
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
            status,
            error_code: None,
            latency_ms: 120,
            streamed: false,
        }
    }

    #[test]
    fn categorization_matches_substrings() {
        assert_eq!(categorize_error("401 Unauthorized"), "AUTHENTICATION_FAILED");
        assert_eq!(categorize_error("Rate limit exceeded, retry later"), "RATE_LIMIT_EXCEEDED");
        assert_eq!(categorize_error("model not available"), "MODEL_NOT_AVAILABLE");
        assert_eq!(categorize_error("operation timed out"), "CONNECTION_TIMEOUT");
        assert_eq!(categorize_error("context canceled"), "context_canceled");
        assert_eq!(categorize_error("panicked at stream handler"), "panic");
        assert_eq!(categorize_error("stream creation failed"), "stream_creation_failed");
        assert_eq!(categorize_error("error on stream"), "stream_error");
        assert_eq!(categorize_error("connection refused"), "forward_failed");
        assert_eq!(categorize_error("something else entirely"), "PROBE_FAILED");
    }

    #[test]
    fn stats_are_shared_per_provider_model_key() {
        let registry = StatsRegistry::new();
        let provider = Uuid::new_v4();

        registry.record(provider, "m", 60, 10, 5);
        registry.record(provider, "m", 60, 20, 10);

        let stats = registry.snapshot(provider, "m", 60).unwrap();
        assert_eq!(stats.lifetime_requests, 2);
        assert_eq!(stats.window_requests, 2);
        assert_eq!(stats.window_input_tokens, 30);
        assert_eq!(stats.window_output_tokens, 15);
        assert_eq!(stats.window_total_tokens, 45);
        assert!(stats.last_used.is_some());
    }

    #[test]
    fn window_rolls_but_lifetime_survives() {
        let registry = StatsRegistry::new();
        let provider = Uuid::new_v4();

        // Zero-width window: the next touch always rolls.
        registry.record(provider, "m", 0, 10, 5);
        let stats = registry.snapshot(provider, "m", 0).unwrap();

        assert_eq!(stats.lifetime_requests, 1);
        assert_eq!(stats.window_requests, 0);
        assert_eq!(stats.window_output_tokens, 0);
    }

    #[tokio::test]
    async fn tracker_updates_stats_and_persists_exactly_one_record() {
        let repository = Arc::new(MemoryUsageRepository::default());
        let tracker = UsageTracker::new(Arc::new(StatsRegistry::new()), repository.clone());
        let provider = Uuid::new_v4();

        tracker.record(record(provider, UsageStatus::Partial), 60).await;

        let rows = repository.list(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, UsageStatus::Partial);

        let stats = tracker.stats().snapshot(provider, "claude-3-5-haiku-latest", 60).unwrap();
        assert_eq!(stats.lifetime_requests, 1);
    }
}
