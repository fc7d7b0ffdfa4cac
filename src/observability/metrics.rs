//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, kind
//! - `gateway_request_duration_seconds` (histogram): latency by kind
//! - `gateway_tunnels_total` (counter): tunnel attempts by outcome
//! - `gateway_active_tunnels` (gauge): currently open tunnels
//! - `gateway_tunnel_bytes_total` (counter): relayed bytes by direction
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished request. `kind` is `http` or `websocket`.
pub fn record_request(method: &str, status: u16, kind: &'static str, start: Instant) {
    counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "kind" => kind,
    )
    .increment(1);
    histogram!("gateway_request_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

/// Record a tunnel attempt outcome (`established` or a failure reason).
pub fn record_tunnel(outcome: &'static str) {
    counter!("gateway_tunnels_total", "outcome" => outcome).increment(1);
}

pub fn set_active_tunnels(count: u64) {
    gauge!("gateway_active_tunnels").set(count as f64);
}

pub fn record_tunnel_bytes(direction: &'static str, bytes: u64) {
    counter!("gateway_tunnel_bytes_total", "direction" => direction).increment(bytes);
}
