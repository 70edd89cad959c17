//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, errors, connections, tunnels)
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, class
//! - `proxy_request_duration_seconds` (histogram): time to response headers
//! - `proxy_active_connections` (gauge): open client connections
//! - `proxy_open_tunnels` (gauge): live WebSocket tunnels
//! - `proxy_upstream_errors_total` (counter): failures by error kind
//! - `proxy_media_bytes_total` (counter): bytes relayed on media routes
//! - `proxy_tunnel_frames_total` (counter): relayed frames by direction
//!
//! # Design Decisions
//! - Without an installed recorder every call is a no-op
//! - Labels are low-cardinality: never the path or the client address

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, class: &'static str, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "class" => class
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "class" => class)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error(kind: &'static str) {
    counter!("proxy_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn connection_opened() {
    gauge!("proxy_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("proxy_active_connections").decrement(1.0);
}

pub fn tunnel_opened() {
    gauge!("proxy_open_tunnels").increment(1.0);
}

pub fn tunnel_closed() {
    gauge!("proxy_open_tunnels").decrement(1.0);
}

pub fn record_tunnel_frame(direction: &'static str) {
    counter!("proxy_tunnel_frames_total", "direction" => direction).increment(1);
}

pub fn record_media_bytes(len: usize) {
    counter!("proxy_media_bytes_total").increment(len as u64);
}
