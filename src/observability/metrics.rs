//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_upstream_errors_total` (counter): failed upstream exchanges by kind
//! - `audit_records_enqueued_total` (counter)
//! - `audit_records_dropped_total` (counter): by reason (full, closed)
//! - `audit_records_published_total` (counter)
//! - `audit_publish_failures_total` (counter)
//! - `audit_invalid_bodies_total` (counter): non-JSON bodies by side
//!
//! # Design Decisions
//! - The Prometheus exporter is optional; without it every call is a no-op

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record a completed proxied request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    let method = method.to_string();
    let status = status.to_string();
    ::metrics::counter!("proxy_requests_total", "method" => method.clone(), "status" => status.clone())
        .increment(1);
    ::metrics::histogram!("proxy_request_duration_seconds", "method" => method, "status" => status)
        .record(start.elapsed().as_secs_f64());
}

/// Record a failed upstream exchange (`connect`, `timeout`, ...).
pub fn record_upstream_error(kind: &'static str) {
    ::metrics::counter!("proxy_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn record_audit_enqueued() {
    ::metrics::counter!("audit_records_enqueued_total").increment(1);
}

pub fn record_audit_dropped(reason: &'static str) {
    ::metrics::counter!("audit_records_dropped_total", "reason" => reason).increment(1);
}

pub fn record_audit_published() {
    ::metrics::counter!("audit_records_published_total").increment(1);
}

pub fn record_publish_failure() {
    ::metrics::counter!("audit_publish_failures_total").increment(1);
}

/// Record a captured body that was not JSON (`request` or `response`).
pub fn record_invalid_body(side: &'static str) {
    ::metrics::counter!("audit_invalid_bodies_total", "side" => side).increment(1);
}
