//! Error taxonomy shared by the client and server halves.
//!
//! Every variant is terminal for the connection or exchange it occurred on,
//! never for the process.

use std::io;
use thiserror::Error;

/// Errors raised while framing, dialing, or relaying.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Peer closed before a complete header block or body arrived.
    #[error("stream closed before the message was complete")]
    StreamClosed,

    /// Connect or TLS handshake to a target failed.
    #[error("target {target} unreachable: {source}")]
    TargetUnreachable {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Unparsable chunk size, Content-Length, request line, or an oversize message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Abrupt reset, abort, or broken pipe.
    #[error("connection reset by peer")]
    PeerReset,

    /// A read exceeded the configured accumulation timeout.
    #[error("read timed out after {0} seconds")]
    ReadTimeout(u64),

    /// Outbound TLS could not be configured.
    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl ProxyError {
    /// Convenience constructor for [`ProxyError::MalformedMessage`].
    pub fn malformed(reason: impl Into<String>) -> Self {
        ProxyError::MalformedMessage(reason.into())
    }

    /// True for errors that mean the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProxyError::StreamClosed | ProxyError::PeerReset)
    }
}

impl From<io::Error> for ProxyError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => ProxyError::StreamClosed,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ProxyError::PeerReset,
            _ => ProxyError::Io(e),
        }
    }
}

pub type Result<T, E = ProxyError> = std::result::Result<T, E>;
