//! Prometheus metrics for the control plane.
//!
//! Exposed at `GET /metrics` in Prometheus text format.
//!
//! # Metrics Exposed
//!
//! - `wafden_http_requests_total` - HTTP requests (labels: method, path, status)
//! - `wafden_http_request_duration_seconds` - Request duration histogram
//! - `wafden_ban_operations_total` - Ban operations (labels: operation)
//! - `wafden_ban_cache_failures_total` - Best-effort cache mirror failures

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder.
///
/// Idempotent: repeated calls reuse the first handle, so tests that spin up
/// multiple servers in one process do not fight over the global recorder.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    if PROMETHEUS_HANDLE.get().is_none() {
        if let Ok(handle) = PrometheusBuilder::new().install_recorder() {
            register_metrics();
            let _ = PROMETHEUS_HANDLE.set(handle);
        }
    }
    PROMETHEUS_HANDLE.get()
}

/// Renders current metrics in Prometheus text format.
pub fn render_metrics() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

fn register_metrics() {
    describe_counter!(
        "wafden_http_requests_total",
        "Total HTTP requests by method, path, and status"
    );
    describe_histogram!(
        "wafden_http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "wafden_ban_operations_total",
        "Ban operations by type (create, delete, check, bulk_create, bulk_delete, stats)"
    );
    describe_counter!(
        "wafden_ban_cache_failures_total",
        "Best-effort ban cache operations that failed and were absorbed"
    );
}

/// Records one HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    counter!(
        "wafden_http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
    histogram!("wafden_http_request_duration_seconds").record(duration.as_secs_f64());
}

/// Records one ban operation.
pub fn record_ban_operation(operation: &'static str) {
    counter!("wafden_ban_operations_total", "operation" => operation).increment(1);
}

/// Records an absorbed cache failure.
pub fn record_cache_failure(operation: &'static str) {
    counter!("wafden_ban_cache_failures_total", "operation" => operation).increment(1);
}
