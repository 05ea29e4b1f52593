//! Request, cache and upstream metrics.
//!
//! Everything goes through the `metrics` facade. Without an installed
//! recorder the calls are no-ops, which is what unit tests run against.

use std::time::Duration;

use telemetry_metrics::{counter, gauge, histogram};

/// Count a finished request and its latency
pub fn record_request(method: &str, status: u16, elapsed: Duration) {
    counter!(
        "elastauth_requests_total",
        "method" => method.to_string(),
        "status" => status_class(status)
    )
    .increment(1);
    histogram!("elastauth_request_duration_seconds").record(elapsed.as_secs_f64());
}

/// Count an identity-provider outcome
pub fn record_authentication(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("elastauth_authentication_total", "result" => result).increment(1);
}

/// Count a credential cache lookup
pub fn record_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("elastauth_cache_total", "result" => result).increment(1);
}

/// Count a failed request by error kind
pub fn record_error(kind: &'static str) {
    counter!("elastauth_errors_total", "kind" => kind).increment(1);
}

/// Time spent waiting on the proxied Elasticsearch call
pub fn record_upstream(elapsed: Duration) {
    histogram!("elastauth_upstream_duration_seconds").record(elapsed.as_secs_f64());
}

/// Keeps `elastauth_active_requests` raised while alive
#[derive(Debug)]
pub struct ActiveRequest(());

impl ActiveRequest {
    /// Raise the gauge
    #[must_use]
    pub fn start() -> Self {
        gauge!("elastauth_active_requests").increment(1.0);
        Self(())
    }
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        gauge!("elastauth_active_requests").decrement(1.0);
    }
}

fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

/// Prometheus text rendering of the installed recorder
#[cfg(feature = "metrics")]
pub type MetricsHandle = metrics_exporter_prometheus::PrometheusHandle;

/// Install the global Prometheus recorder.
///
/// Only one recorder may be installed per process.
#[cfg(feature = "metrics")]
pub fn install_recorder() -> crate::Result<MetricsHandle> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| crate::Error::Internal(format!("failed to install metrics recorder: {e}")))
}
