//! Metrics collection and exposition.
//!
//! # Metrics
//! - `nextstep_requests_total` (counter): requests by method, status
//! - `nextstep_request_duration_seconds` (histogram): latency distribution
//! - `nextstep_guard_rejections_total` (counter): rejections by guard
//! - `nextstep_rate_limited_total` (counter): 429s by scope
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "nextstep_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("nextstep_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_guard_rejection(guard: &'static str) {
    counter!("nextstep_guard_rejections_total", "guard" => guard).increment(1);
}

pub fn record_rate_limited(scope: &'static str) {
    counter!("nextstep_rate_limited_total", "scope" => scope).increment(1);
}

/// Install the Prometheus recorder with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}
