//! Split forward HTTP/HTTPS proxy.
//!
//! The client half accepts browser connections and multiplexes their
//! requests over one persistent upstream link. The server half reads those
//! requests, dials the real targets (TLS where needed) and relays the
//! responses or CONNECT tunnels back.

// Proxy halves
pub mod client;
pub mod server;

// Wire handling
pub mod http;
pub mod net;
pub mod tunnel;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use client::ClientMultiplexer;
pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use http::{HttpMessage, MessageFramer};
pub use lifecycle::Shutdown;
pub use server::ServerDispatcher;
pub use tunnel::TunnelRelay;
