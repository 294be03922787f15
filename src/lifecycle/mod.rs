//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Init logging/metrics → Dial upstream (client) → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Wait for in-flight connections (bounded) → Exit
//!
//! Signals (signals.rs):
//!     SIGINT → Trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
