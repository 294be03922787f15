//! A framed HTTP/1.x message held as raw bytes.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::http::request::RequestLine;

/// One complete request or response: the header block (including the
/// terminating `\r\n\r\n`) followed by its fully buffered body.
///
/// Chunked bodies are available de-chunked through [`HttpMessage::body`],
/// but the message is always written back out exactly as it was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMessage {
    head: Vec<u8>,
    body: Vec<u8>,
    /// Received body bytes when they differ from `body` (chunked encoding).
    wire_body: Option<Vec<u8>>,
}

impl HttpMessage {
    pub fn new(head: Vec<u8>, body: Vec<u8>) -> Self {
        Self {
            head,
            body,
            wire_body: None,
        }
    }

    /// A chunk-encoded message: `body` is the decoded payload, `wire_body`
    /// the chunk framing as received, trailer included.
    pub fn chunked(head: Vec<u8>, body: Vec<u8>, wire_body: Vec<u8>) -> Self {
        Self {
            head,
            body,
            wire_body: Some(wire_body),
        }
    }

    /// Header block, terminator included.
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// Decoded body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    fn wire_body(&self) -> &[u8] {
        self.wire_body.as_deref().unwrap_or(self.body.as_slice())
    }

    /// Total wire length of head and body.
    pub fn len(&self) -> usize {
        self.head.len() + self.wire_body().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First line of the header block without its CRLF.
    pub fn start_line(&self) -> String {
        start_line(&self.head)
    }

    /// Parse the start line as a request line.
    pub fn request_line(&self) -> Result<RequestLine> {
        RequestLine::parse(&self.head)
    }

    /// Status code of a response start line, if it has one.
    pub fn status_code(&self) -> Option<u16> {
        let line = self.start_line();
        let mut parts = line.split_whitespace();
        let version = parts.next()?;
        if !version.starts_with("HTTP/") {
            return None;
        }
        parts.next()?.parse().ok()
    }

    /// The message as it appeared on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.head);
        out.extend_from_slice(self.wire_body());
        out
    }

    /// Write the message verbatim and flush.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        writer.write_all(&self.head).await?;
        let body = self.wire_body();
        if !body.is_empty() {
            writer.write_all(body).await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

pub(crate) fn start_line(head: &[u8]) -> String {
    let end = head
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(head.len());
    String::from_utf8_lossy(&head[..end]).into_owned()
}

/// Header fields after the start line, as trimmed `(name, value)` pairs.
pub(crate) fn header_fields(head: &[u8]) -> Vec<(String, String)> {
    String::from_utf8_lossy(head)
        .split("\r\n")
        .skip(1)
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

pub(crate) fn find_header(head: &[u8], name: &str) -> Option<String> {
    header_fields(head)
        .into_iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
        .last()
}
