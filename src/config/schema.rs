//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Every field
//! has a default, so an empty file is a valid configuration (client mode
//! still needs `client.server_address`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::FrameLimits;
use crate::tunnel::TunnelRelay;

/// Root configuration for both halves of the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Browser-facing multiplexer.
    pub client: ClientConfig,

    /// Upstream-facing dispatcher.
    pub server: ServerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Framing and relay size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ProxyConfig {
    /// Framer limits derived from `limits`.
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_header_bytes: self.limits.max_header_bytes,
            max_body_bytes: self.limits.max_body_bytes,
        }
    }

    /// Tunnel relay derived from `timeouts` and `limits`.
    pub fn tunnel_relay(&self) -> TunnelRelay {
        TunnelRelay::new(
            Duration::from_secs(self.timeouts.tunnel_idle_secs),
            self.limits.relay_buffer_bytes,
        )
    }
}

/// Client multiplexer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Local bind address for browsers (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Server dispatcher endpoint (`host:port`). Required in client mode.
    pub server_address: Option<String>,

    /// Maximum concurrent browser connections.
    pub max_connections: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            server_address: None,
            max_connections: 1024,
        }
    }
}

/// What the dispatcher tells the client when a CONNECT target is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectFailurePolicy {
    /// Reply `502 Bad Gateway`.
    #[default]
    BadGateway,
    /// Send nothing and wait for the next forwarded request.
    Silent,
}

/// Server dispatcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for upstream links (e.g., "0.0.0.0:8888").
    pub bind_address: String,

    /// Maximum concurrently served upstream links.
    pub max_links: usize,

    /// Wrap CONNECT target connections in TLS.
    pub connect_tls: bool,

    /// Reply sent when a CONNECT target cannot be reached.
    pub connect_failure: ConnectFailurePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8888".to_string(),
            max_links: 1,
            connect_tls: true,
            connect_failure: ConnectFailurePolicy::BadGateway,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Tunnel idle timeout in seconds.
    pub tunnel_idle_secs: u64,

    /// Target connect (TCP + TLS handshake) timeout in seconds.
    pub connect_secs: u64,

    /// Bound on reading one complete message, in seconds. Unset waits forever.
    pub read_secs: Option<u64>,

    /// How long shutdown waits for in-flight connections, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            tunnel_idle_secs: 60,
            connect_secs: 10,
            read_secs: None,
            shutdown_grace_secs: 5,
        }
    }
}

impl TimeoutConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_secs.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

/// Size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted header block, terminator included.
    pub max_header_bytes: usize,

    /// Largest accepted (de-chunked) body.
    pub max_body_bytes: usize,

    /// Tunnel relay read buffer.
    pub relay_buffer_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let frame = FrameLimits::default();
        Self {
            max_header_bytes: frame.max_header_bytes,
            max_body_bytes: frame.max_body_bytes,
            relay_buffer_bytes: 4096,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
