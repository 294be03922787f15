//! Type-erased byte streams.
//!
//! Browser connections, the upstream link, and target connections (plain
//! TCP or TLS) all travel through the same code paths as [`BoxedStream`].

use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// A bidirectional async byte stream that can move between tasks.
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ProxyStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedStream = Box<dyn ProxyStream>;

/// A boxed stream with a read buffer, as the framer needs.
///
/// Bytes buffered past the end of one message stay in the buffer and are
/// seen by the next read, including a tunnel relay.
pub type BufferedStream = BufReader<BoxedStream>;

/// Box and buffer a stream.
pub fn buffered<S>(stream: S) -> BufferedStream
where
    S: ProxyStream + 'static,
{
    BufReader::new(Box::new(stream))
}
