//! Prometheus Metrics Definitions
//!
//! Every metric lives in a registry owned by [`OrderflowMetrics`], so tests
//! can build as many independent instances as they like.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Result of a cache read on the lookup path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit,
    Miss,
    Corrupt,
    Error,
}

impl CacheLookup {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLookup::Hit => "hit",
            CacheLookup::Miss => "miss",
            CacheLookup::Corrupt => "corrupt",
            CacheLookup::Error => "error",
        }
    }
}

/// Container for all ORDERFLOW metrics.
#[derive(Clone)]
pub struct OrderflowMetrics {
    registry: Registry,

    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Ingested messages by terminal outcome - labels: outcome
    pub ingest_messages_total: CounterVec,

    /// Individual persist attempts - labels: result (success/transient/permanent)
    pub ingest_persist_attempts_total: CounterVec,

    /// Rejected dead-letter publishes; each one is a retry of a stalled message
    pub dead_letter_publish_failures_total: Counter,

    /// Cache reads on the lookup path - labels: result
    pub cache_lookups_total: CounterVec,

    /// Order submissions - labels: result
    pub submissions_total: CounterVec,
}

impl OrderflowMetrics {
    /// Create all metrics and register them with a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("orderflow_http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "orderflow_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(HTTP_LATENCY_BUCKETS.to_vec()),
            &["method", "path"],
        )?;
        let ingest_messages_total = CounterVec::new(
            Opts::new(
                "orderflow_ingest_messages_total",
                "Messages handled by the ingestion worker",
            ),
            &["outcome"],
        )?;
        let ingest_persist_attempts_total = CounterVec::new(
            Opts::new(
                "orderflow_ingest_persist_attempts_total",
                "Attempts to persist an ingested order",
            ),
            &["result"],
        )?;
        let dead_letter_publish_failures_total = Counter::new(
            "orderflow_dead_letter_publish_failures_total",
            "Dead-letter publishes that failed and are being retried",
        )?;
        let cache_lookups_total = CounterVec::new(
            Opts::new("orderflow_cache_lookups_total", "Cache reads on the lookup path"),
            &["result"],
        )?;
        let submissions_total = CounterVec::new(
            Opts::new("orderflow_submissions_total", "Order submissions"),
            &["result"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(ingest_messages_total.clone()))?;
        registry.register(Box::new(ingest_persist_attempts_total.clone()))?;
        registry.register(Box::new(dead_letter_publish_failures_total.clone()))?;
        registry.register(Box::new(cache_lookups_total.clone()))?;
        registry.register(Box::new(submissions_total.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            ingest_messages_total,
            ingest_persist_attempts_total,
            dead_letter_publish_failures_total,
            cache_lookups_total,
            submissions_total,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status_str.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_ingest_outcome(&self, outcome: &str) {
        self.ingest_messages_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_persist_attempt(&self, result: &str) {
        self.ingest_persist_attempts_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn record_dead_letter_publish_failure(&self) {
        self.dead_letter_publish_failures_total.inc();
    }

    pub fn record_cache_lookup(&self, result: CacheLookup) {
        self.cache_lookups_total
            .with_label_values(&[result.as_str()])
            .inc();
    }

    pub fn record_submission(&self, result: &str) {
        self.submissions_total.with_label_values(&[result]).inc();
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn render(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler(State(metrics): State<Arc<OrderflowMetrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_are_independent() -> prometheus::Result<()> {
        let a = OrderflowMetrics::new()?;
        let b = OrderflowMetrics::new()?;
        a.record_submission("accepted");
        assert_eq!(a.submissions_total.with_label_values(&["accepted"]).get(), 1.0);
        assert_eq!(b.submissions_total.with_label_values(&["accepted"]).get(), 0.0);
        Ok(())
    }

    #[test]
    fn test_render_contains_recorded_metrics() -> prometheus::Result<()> {
        let metrics = OrderflowMetrics::new()?;
        metrics.record_http_request("GET", "/api/v1/orders/:order_uid", 200, 0.015);
        metrics.record_ingest_outcome("persisted");
        metrics.record_cache_lookup(CacheLookup::Corrupt);
        metrics.record_dead_letter_publish_failure();

        let text = String::from_utf8(metrics.render()?).unwrap();
        assert!(text.contains("orderflow_http_requests_total"));
        assert!(text.contains("orderflow_ingest_messages_total{outcome=\"persisted\"} 1"));
        assert!(text.contains("orderflow_cache_lookups_total{result=\"corrupt\"} 1"));
        assert!(text.contains("orderflow_dead_letter_publish_failures_total 1"));
        Ok(())
    }
}
