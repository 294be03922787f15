//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! client multiplexer, server dispatcher, tunnel relay
//!     → logging.rs (structured tracing events, connection_id fields)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape endpoint (optional)
//! ```

pub mod logging;
pub mod metrics;
