//! Metrics implementation using Prometheus.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use geocache_core::{Error, Result};
use std::time::Duration;

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let builder = PrometheusBuilder::new();

    let handle = builder
        .install_recorder()
        .map_err(|e| Error::governance(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// Helper to track HTTP request metrics (latency, count).
pub fn track_request(method: &str, path: &str, status: u16, latency_sec: f64) {
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(latency_sec);
}

/// Count a cache lookup by outcome.
pub fn track_cache_lookup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    metrics::counter!("geocache_requests_total", "outcome" => outcome).increment(1);
}

/// Count an upstream call by response status.
pub fn track_upstream_call(status: u16) {
    metrics::counter!("geocache_upstream_calls_total", "status" => status.to_string()).increment(1);
}

/// Record how long a miss waited on the throttle gate.
pub fn track_throttle_wait(wait: Duration) {
    metrics::histogram!("geocache_throttle_wait_seconds").record(wait.as_secs_f64());
}

pub fn track_persist_failure() {
    metrics::counter!("geocache_persist_failures_total").increment(1);
}
