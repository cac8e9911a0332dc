//! Metrics for access-service.
//!
//! Counters go through the `metrics` facade and are no-ops until
//! [`init_metrics`] installs the Prometheus recorder.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder.
pub fn init_metrics() {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if METRICS_HANDLE.set(handle).is_err() {
        panic!("failed to set metrics handle: already initialized");
    }
}

/// Metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

/// `result` is one of `hit`, `miss`, `error`.
pub fn record_cache_lookup(result: &'static str) {
    counter!("access_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_upstream_call(source: &'static str, status: &'static str) {
    counter!("access_upstream_calls_total", "source" => source, "status" => status).increment(1);
}

pub fn record_registry_refresh(status: &'static str) {
    counter!("access_registry_refresh_total", "status" => status).increment(1);
}

pub fn record_aggregation(duration: Duration, is_error: bool) {
    let outcome = if is_error { "error" } else { "ok" };
    histogram!("access_aggregation_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}
