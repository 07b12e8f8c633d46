//! Metrics Collector.
//!
//! Per-provider counters and a generic named-metric store with bounded
//! retention, plus rate-limit header parsing. Publishing to the
//! analytics sink is modeled as a trait so the composition root can wire
//! in whatever event bus it has; this crate ships a no-op and an
//! in-memory recorder for tests.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::HeaderMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::models::{MetricAggregate, MetricEntry};

const MAX_ENTRIES_PER_NAME: usize = 500;
const RETENTION: ChronoDuration = ChronoDuration::hours(1);

/// `{metricName, metricValue, metricType, labels}` analytics contract
/// (spec §6). Implementations publish non-blocking: a failure to publish
/// must never fail the caller's request.
pub trait AnalyticsSink: Send + Sync {
    fn publish_metric(&self, name: &str, value: f64, tags: &HashMap<String, String>);
    fn publish_invocation(&self, event: &InvocationEvent);
}

#[derive(Debug, Clone)]
pub struct InvocationEvent {
    pub provider_id: String,
    pub provider_name: String,
    pub operation: String,
    pub success: bool,
    pub duration_ms: u64,
    pub tokens_used: Option<u64>,
    pub cost: Option<f64>,
    pub error: Option<String>,
}

/// No-op sink for deployments that have not wired an event bus.
#[derive(Default)]
pub struct NullAnalyticsSink;

impl AnalyticsSink for NullAnalyticsSink {
    fn publish_metric(&self, _name: &str, _value: f64, _tags: &HashMap<String, String>) {}
    fn publish_invocation(&self, _event: &InvocationEvent) {}
}

struct NamedMetricSeries {
    entries: VecDeque<MetricEntry>,
    aggregate: MetricAggregate,
}

impl NamedMetricSeries {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            aggregate: MetricAggregate::default(),
        }
    }

    fn push(&mut self, entry: MetricEntry) {
        if self.entries.len() >= MAX_ENTRIES_PER_NAME {
            self.entries.pop_front();
        }
        self.aggregate.count += 1;
        self.aggregate.sum += entry.value;
        self.aggregate.min = if self.aggregate.count == 1 {
            entry.value
        } else {
            self.aggregate.min.min(entry.value)
        };
        self.aggregate.max = if self.aggregate.count == 1 {
            entry.value
        } else {
            self.aggregate.max.max(entry.value)
        };
        self.aggregate.avg = self.aggregate.sum / self.aggregate.count as f64;
        self.aggregate.last_updated = Some(entry.timestamp);
        self.entries.push_back(entry);
    }

    fn within_window(&self, since: DateTime<Utc>) -> impl Iterator<Item = &MetricEntry> {
        self.entries.iter().filter(move |e| e.timestamp >= since)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderStats {
    pub request_count: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub total_cost: f64,
}

pub struct MetricsCollector {
    series: Mutex<HashMap<String, NamedMetricSeries>>,
    sink: std::sync::Arc<dyn AnalyticsSink>,
}

impl MetricsCollector {
    pub fn new(sink: std::sync::Arc<dyn AnalyticsSink>) -> Self {
        Self {
            series: Mutex::new(HashMap::new()),
            sink,
        }
    }

    pub fn noop() -> Self {
        Self::new(std::sync::Arc::new(NullAnalyticsSink))
    }

    pub fn record_metric(&self, name: &str, value: f64, tags: HashMap<String, String>) {
        let entry = MetricEntry {
            name: name.to_string(),
            value,
            timestamp: Utc::now(),
            tags: tags.clone(),
        };
        self.series
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(NamedMetricSeries::new)
            .push(entry);
        self.sink.publish_metric(name, value, &tags);
    }

    pub fn record_provider_request(
        &self,
        provider_id: &str,
        operation: &str,
        success: bool,
        latency_ms: f64,
        cost: Option<f64>,
    ) {
        let tags = HashMap::from([
            ("providerId".to_string(), provider_id.to_string()),
            ("operation".to_string(), operation.to_string()),
        ]);
        self.record_metric("provider.request.count", 1.0, tags.clone());
        if success {
            self.record_metric("provider.request.success", 1.0, tags.clone());
        } else {
            self.record_metric("provider.request.failure", 1.0, tags.clone());
        }
        self.record_metric("provider.request.latency", latency_ms, tags.clone());
        if let Some(cost) = cost {
            self.record_metric("provider.request.cost", cost, tags);
        }
    }

    pub fn record_circuit_breaker_event(&self, provider_id: &str, event: &str) {
        let tags = HashMap::from([
            ("providerId".to_string(), provider_id.to_string()),
            ("event".to_string(), event.to_string()),
        ]);
        self.record_metric("provider.circuit_breaker.event", 1.0, tags);
    }

    pub fn publish_invocation(&self, event: InvocationEvent) {
        self.sink.publish_invocation(&event);
    }

    /// Sums tagged metrics for `provider_id` within `window` (default 1h),
    /// returning request count, success rate, average latency, and total
    /// cost.
    pub fn provider_stats(&self, provider_id: &str, window: ChronoDuration) -> ProviderStats {
        let since = Utc::now() - window;
        let series = self.series.lock().unwrap();

        let count_in_window = |name: &str| -> Vec<f64> {
            series
                .get(name)
                .map(|s| {
                    s.within_window(since)
                        .filter(|e| e.tags.get("providerId").map(|p| p == provider_id).unwrap_or(false))
                        .map(|e| e.value)
                        .collect()
                })
                .unwrap_or_default()
        };

        let requests = count_in_window("provider.request.count");
        let successes = count_in_window("provider.request.success");
        let latencies = count_in_window("provider.request.latency");
        let costs = count_in_window("provider.request.cost");

        let request_count = requests.len() as u64;
        let success_rate = if request_count > 0 {
            successes.len() as f64 / request_count as f64
        } else {
            0.0
        };
        let avg_latency_ms = if !latencies.is_empty() {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        } else {
            0.0
        };
        let total_cost = costs.iter().sum();

        ProviderStats {
            request_count,
            success_rate,
            avg_latency_ms,
            total_cost,
        }
    }

    /// Sweep every series older than the 1-hour retention window.
    pub fn sweep_expired(&self) {
        let cutoff = Utc::now() - RETENTION;
        let mut series = self.series.lock().unwrap();
        for s in series.values_mut() {
            s.entries.retain(|e| e.timestamp >= cutoff);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RateLimitHeaders {
    pub remaining: Option<i64>,
    pub reset_at: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

/// Extract `x-ratelimit-remaining/-reset/-limit` (with non-prefixed
/// fallback variants) from a provider's response headers.
pub fn parse_rate_limit_headers(headers: &HeaderMap) -> RateLimitHeaders {
    let remaining = header_i64(headers, "x-ratelimit-remaining").or_else(|| header_i64(headers, "ratelimit-remaining"));
    let limit = header_i64(headers, "x-ratelimit-limit").or_else(|| header_i64(headers, "ratelimit-limit"));
    let reset_seconds = header_i64(headers, "x-ratelimit-reset").or_else(|| header_i64(headers, "ratelimit-reset"));
    let reset_at = reset_seconds.map(|secs| Utc::now() + ChronoDuration::seconds(secs));

    RateLimitHeaders {
        remaining,
        reset_at,
        limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_stats_aggregate_within_window() {
        let collector = MetricsCollector::noop();
        collector.record_provider_request("p1", "text_generation", true, 100.0, Some(0.01));
        collector.record_provider_request("p1", "text_generation", false, 200.0, None);
        let stats = collector.provider_stats("p1", ChronoDuration::hours(1));
        assert_eq!(stats.request_count, 2);
        assert_eq!(stats.success_rate, 0.5);
        assert_eq!(stats.avg_latency_ms, 150.0);
    }

    #[test]
    fn series_trims_to_max_entries() {
        let collector = MetricsCollector::noop();
        for _ in 0..(MAX_ENTRIES_PER_NAME + 10) {
            collector.record_metric("custom.metric", 1.0, HashMap::new());
        }
        let series = collector.series.lock().unwrap();
        assert_eq!(series.get("custom.metric").unwrap().entries.len(), MAX_ENTRIES_PER_NAME);
    }

    #[test]
    fn parses_rate_limit_headers_with_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "42".parse().unwrap());
        headers.insert("x-ratelimit-limit", "100".parse().unwrap());
        headers.insert("x-ratelimit-reset", "60".parse().unwrap());
        let parsed = parse_rate_limit_headers(&headers);
        assert_eq!(parsed.remaining, Some(42));
        assert_eq!(parsed.limit, Some(100));
        assert!(parsed.reset_at.is_some());
    }
}
