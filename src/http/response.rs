//! Canned responses the proxy writes on its own behalf.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;

/// Acknowledges a CONNECT; the connection becomes an opaque tunnel after it.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";

/// Sent for malformed requests.
pub const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

/// Sent when the target or the upstream link produced no response.
pub const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

/// Write a canned response and flush it.
pub async fn send<W>(writer: &mut W, response: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(response).await?;
    writer.flush().await?;
    Ok(())
}
