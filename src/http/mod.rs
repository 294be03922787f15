//! HTTP/1.x handling on raw byte streams.
//!
//! # Data Flow
//! ```text
//! byte stream (browser, upstream link, or target)
//!     → framer.rs (one complete message: head + buffered body)
//!     → message.rs (HttpMessage, header lookup, start line)
//!     → request.rs (request line, CONNECT authority / URL → Target)
//!     → response.rs (canned 200/400/502 replies)
//! ```
//!
//! # Design Decisions
//! - Messages are relayed byte-for-byte; headers are never rewritten
//! - One message is fully buffered before it is forwarded

pub mod framer;
pub mod message;
pub mod request;
pub mod response;

pub use framer::{BodyFraming, FrameLimits, MessageFramer};
pub use message::HttpMessage;
pub use request::{RequestLine, Target};
