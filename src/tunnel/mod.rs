//! CONNECT tunnel support.
//!
//! # Data Flow
//! ```text
//! client side:  browser ⇄ relay.rs ⇄ shared upstream link
//! server side:  upstream link ⇄ relay.rs ⇄ target (TLS or TCP)
//! ```
//!
//! # Design Decisions
//! - Opaque byte pipe once `200 Connection established` has been sent
//! - A session ends on the first close, error, or idle timeout from either side

pub mod relay;

pub use relay::{Side, TunnelEnd, TunnelRelay, TunnelSummary};
