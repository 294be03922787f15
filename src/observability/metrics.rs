//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_exchanges_total` (counter): request/response exchanges by side and outcome
//! - `proxy_tunnels_total` (counter): finished tunnels by side and end reason
//! - `proxy_tunnel_bytes_total` (counter): bytes relayed through tunnels by direction
//! - `proxy_target_connects_total` (counter): outbound dials by result
//! - `proxy_active_connections` (gauge): open connections by role
//!
//! Recording is a no-op until an exporter is installed.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::net::ConnectionRole;
use crate::tunnel::TunnelSummary;

/// Install the Prometheus exporter with an HTTP scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Which half of the proxy recorded a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxySide {
    Client,
    Server,
}

impl ProxySide {
    fn as_str(&self) -> &'static str {
        match self {
            ProxySide::Client => "client",
            ProxySide::Server => "server",
        }
    }
}

/// Result of one request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// A real response was relayed.
    Relayed,
    /// A synthesized 502 was sent.
    BadGateway,
    /// A synthesized 400 was sent.
    BadRequest,
}

impl ExchangeOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ExchangeOutcome::Relayed => "relayed",
            ExchangeOutcome::BadGateway => "bad_gateway",
            ExchangeOutcome::BadRequest => "bad_request",
        }
    }
}

pub fn record_exchange(side: ProxySide, outcome: ExchangeOutcome) {
    metrics::counter!(
        "proxy_exchanges_total",
        "side" => side.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

pub fn record_tunnel(side: ProxySide, summary: &TunnelSummary) {
    metrics::counter!(
        "proxy_tunnels_total",
        "side" => side.as_str(),
        "end" => summary.end.as_str()
    )
    .increment(1);
    metrics::counter!("proxy_tunnel_bytes_total", "side" => side.as_str(), "direction" => "a_to_b")
        .increment(summary.a_to_b);
    metrics::counter!("proxy_tunnel_bytes_total", "side" => side.as_str(), "direction" => "b_to_a")
        .increment(summary.b_to_a);
}

pub fn record_target_connect(success: bool) {
    let result = if success { "ok" } else { "failed" };
    metrics::counter!("proxy_target_connects_total", "result" => result).increment(1);
}

pub fn set_active_connections(role: ConnectionRole, active: u64) {
    metrics::gauge!("proxy_active_connections", "role" => role.as_str()).set(active as f64);
}
