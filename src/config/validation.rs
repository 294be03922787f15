//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges (timeouts > 0, limits > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Pure function: &ProxyConfig → Result<(), Vec<ValidationError>>
//! - Mode-specific requirements (the client's server address) are checked
//!   where the mode is chosen, not here

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a loaded configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_socket_addr(&mut errors, "client.bind_address", &config.client.bind_address);
    check_socket_addr(&mut errors, "server.bind_address", &config.server.bind_address);
    if config.observability.metrics_enabled {
        check_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if let Some(server) = &config.client.server_address {
        if let Err(message) = check_endpoint(server) {
            errors.push(ValidationError::new("client.server_address", message));
        }
    }

    check_positive(&mut errors, "client.max_connections", config.client.max_connections as u64);
    check_positive(&mut errors, "server.max_links", config.server.max_links as u64);
    check_positive(&mut errors, "timeouts.tunnel_idle_secs", config.timeouts.tunnel_idle_secs);
    check_positive(&mut errors, "timeouts.connect_secs", config.timeouts.connect_secs);
    if let Some(read_secs) = config.timeouts.read_secs {
        check_positive(&mut errors, "timeouts.read_secs", read_secs);
    }
    check_positive(&mut errors, "limits.relay_buffer_bytes", config.limits.relay_buffer_bytes as u64);
    check_positive(&mut errors, "limits.max_body_bytes", config.limits.max_body_bytes as u64);

    // Room for at least a request line and the terminator.
    if config.limits.max_header_bytes < 16 {
        errors.push(ValidationError::new(
            "limits.max_header_bytes",
            format!("must be at least 16, got {}", config.limits.max_header_bytes),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check a `host:port` endpoint the client dials.
pub fn check_endpoint(endpoint: &str) -> Result<(), String> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got {:?}", endpoint))?;
    if host.is_empty() {
        return Err(format!("missing host in {:?}", endpoint));
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("invalid port in {:?}", endpoint)),
        Ok(_) => Ok(()),
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("invalid socket address {:?}", value),
        ));
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::new(field, "must be greater than zero"));
    }
}
