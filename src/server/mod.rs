//! Server half: performs the real outbound connections.
//!
//! # Data Flow
//! ```text
//! upstream link (from a client multiplexer)
//!     → dispatcher.rs (frame forwarded request, branch on method)
//!         CONNECT → target.rs (dial, TLS) → tunnel relay
//!         other   → target.rs (dial, TLS for https) → one response back
//! ```
//!
//! # Design Decisions
//! - Each accepted link gets its own dispatcher task; `server.max_links`
//!   caps how many are served at once (default 1)
//! - No connection pooling to origins

pub mod dispatcher;
pub mod target;

pub use dispatcher::ServerDispatcher;
pub use target::{Connector, TargetConnector};
