//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (connection ID, per-role tracking)
//!     → stream.rs (boxed as a ProxyStream)
//!     → hand off to the client multiplexer or server dispatcher
//!
//! Outgoing target connection
//!     → tls.rs (optional rustls handshake, native roots)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - TLS is only used outbound; the proxy never terminates client TLS

pub mod connection;
pub mod listener;
pub mod stream;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionRole, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use stream::{buffered, BoxedStream, BufferedStream, ProxyStream};
