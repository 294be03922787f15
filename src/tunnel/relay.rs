//! Bidirectional byte relay with an idle deadline.
//!
//! # Responsibilities
//! - Shuttle bytes verbatim between two connected streams
//! - End the session on orderly close, I/O error, or idle timeout
//! - Report which side ended the session and how much moved each way
//!
//! # Design Decisions
//! - The relay borrows both streams; closing is up to whoever owns them,
//!   so a shared upstream link can outlive the tunnel it carried
//! - Reads are bounded by a fixed buffer; writes complete before the next
//!   readiness wait

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// One of the two relayed streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

impl Side {
    fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// Why a tunnel session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelEnd {
    /// Zero-length read: the side closed its write half.
    Closed(Side),
    /// No traffic in either direction for the idle timeout.
    IdleTimeout,
    /// Read or write failure on the side.
    Failed(Side),
}

impl TunnelEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelEnd::Closed(_) => "closed",
            TunnelEnd::IdleTimeout => "idle_timeout",
            TunnelEnd::Failed(_) => "error",
        }
    }
}

impl fmt::Display for TunnelEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelEnd::Closed(side) => write!(f, "closed by {:?}", side),
            TunnelEnd::IdleTimeout => f.write_str("idle timeout"),
            TunnelEnd::Failed(side) => write!(f, "I/O error on {:?}", side),
        }
    }
}

/// Outcome of one tunnel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelSummary {
    pub end: TunnelEnd,
    pub a_to_b: u64,
    pub b_to_a: u64,
}

/// Relays bytes between two streams until one side closes or goes idle.
#[derive(Debug, Clone, Copy)]
pub struct TunnelRelay {
    idle_timeout: Duration,
    buffer_size: usize,
}

impl Default for TunnelRelay {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT, DEFAULT_BUFFER_SIZE)
    }
}

impl TunnelRelay {
    pub fn new(idle_timeout: Duration, buffer_size: usize) -> Self {
        Self {
            idle_timeout,
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Run the session to completion.
    pub async fn run<A, B>(&self, a: &mut A, b: &mut B) -> TunnelSummary
    where
        A: AsyncRead + AsyncWrite + Unpin + ?Sized,
        B: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        let mut buf_a = vec![0u8; self.buffer_size];
        let mut buf_b = vec![0u8; self.buffer_size];
        let mut a_to_b = 0u64;
        let mut b_to_a = 0u64;

        let end = loop {
            let ready = tokio::time::timeout(self.idle_timeout, async {
                tokio::select! {
                    read = a.read(&mut buf_a) => (Side::A, read),
                    read = b.read(&mut buf_b) => (Side::B, read),
                }
            })
            .await;

            let (side, read) = match ready {
                Ok(ready) => ready,
                Err(_) => break TunnelEnd::IdleTimeout,
            };

            let n = match read {
                Ok(0) => break TunnelEnd::Closed(side),
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(side = ?side, error = %e, "Tunnel read failed");
                    break TunnelEnd::Failed(side);
                }
            };

            let written = match side {
                Side::A => forward(&mut *b, &buf_a[..n]).await,
                Side::B => forward(&mut *a, &buf_b[..n]).await,
            };
            if let Err(e) = written {
                tracing::debug!(side = ?side.other(), error = %e, "Tunnel write failed");
                break TunnelEnd::Failed(side.other());
            }

            match side {
                Side::A => a_to_b += n as u64,
                Side::B => b_to_a += n as u64,
            }
        };

        tracing::debug!(end = %end, a_to_b, b_to_a, "Tunnel finished");
        TunnelSummary { end, a_to_b, b_to_a }
    }
}

async fn forward<W>(writer: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(data).await?;
    writer.flush().await
}
