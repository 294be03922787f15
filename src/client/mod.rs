//! Client half: local browsers multiplexed onto one upstream link.
//!
//! # Data Flow
//! ```text
//! browser connections (many)
//!     → multiplexer.rs (accept, frame requests, one task per browser)
//!     → upstream.rs (link task: one exchange or tunnel at a time)
//!     → server dispatcher
//! ```
//!
//! # Design Decisions
//! - Strict one-exchange-at-a-time ordering on the upstream wire
//! - A CONNECT tunnel holds the link for its whole lifetime; every other
//!   browser waits behind it

pub mod multiplexer;
pub mod upstream;

pub use multiplexer::ClientMultiplexer;
pub use upstream::{TunnelHandback, TunnelOutcome, UpstreamHandle, UpstreamLink};
