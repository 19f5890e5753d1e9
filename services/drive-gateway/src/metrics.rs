//! Prometheus metrics exposition
//!
//! Gateway metrics served on `/metrics`:
//!
//! - `gateway_requests_total` (counter): labels `status`, `method`
//! - `gateway_request_duration_seconds` (histogram): label `status`
//! - `gateway_rate_limited_total` (counter)
//! - `gateway_token_refresh_total` (counter, recorded by the auth library):
//!   label `outcome` (success | rejected | transport)

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering.
///
/// Explicit histogram buckets make `gateway_request_duration_seconds`
/// render `_bucket` lines (usable with `histogram_quantile()`) instead of
/// the default summary.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "gateway_request_duration_seconds".to_string(),
            ),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request with status code and HTTP method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("gateway_requests_total", "status" => status_str.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Record a request rejected by the rate limiter.
pub fn record_rate_limited() {
    metrics::counter!("gateway_rate_limited_total").increment(1);
}
