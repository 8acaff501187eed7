//! Metrics collection and exposition.
//!
//! # Metrics
//! - `router_requests_total` (counter): proxied requests by method, status
//! - `router_request_duration_seconds` (histogram): latency distribution
//! - `router_requests_in_flight` (gauge): requests currently being served
//! - `router_routes` (gauge): hosts present in the route table
//! - `router_registry_messages_total` (counter): bus events by action
//! - `router_malformed_messages_total` (counter): dropped bus payloads
//! - `router_pruned_endpoints_total` (counter): stale evictions
//! - `router_route_polls_total` (counter): poll cycles by result
//!
//! All recorders are no-ops until [`init_metrics`] installs the exporter.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    counter!(
        "router_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);
    histogram!("router_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn set_in_flight(count: usize) {
    gauge!("router_requests_in_flight").set(count as f64);
}

pub fn set_route_count(count: usize) {
    gauge!("router_routes").set(count as f64);
}

pub fn record_registry_message(action: &'static str) {
    counter!("router_registry_messages_total", "action" => action).increment(1);
}

pub fn record_malformed_message(subject: &str) {
    counter!("router_malformed_messages_total", "subject" => subject.to_string()).increment(1);
}

pub fn record_pruned(count: usize) {
    counter!("router_pruned_endpoints_total").increment(count as u64);
}

pub fn record_poll(result: &'static str) {
    counter!("router_route_polls_total", "result" => result).increment(1);
}
