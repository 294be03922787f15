//! HTTP/1.x message framing over a buffered byte stream.
//!
//! # Responsibilities
//! - Accumulate the header block up to the `\r\n\r\n` terminator
//! - Resolve body length from Content-Length or chunked encoding
//! - Never hand back a partially received message
//!
//! # Design Decisions
//! - Reads go through `AsyncBufRead`, so nothing past the end of one
//!   message is consumed; the next message on the stream stays intact
//! - Bodies without Content-Length or chunked framing are empty; there is
//!   no read-until-close mode
//! - Header block and body sizes are capped by [`FrameLimits`]

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{ProxyError, Result};
use crate::http::message::{header_fields, HttpMessage};

/// Marks the end of the header fields.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

const CRLF: &[u8] = b"\r\n";

/// Longest chunk-size or trailer line accepted.
const MAX_CHUNK_LINE: usize = 4096;

/// Size caps applied while framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

/// How the body following a header block is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    ContentLength(usize),
    Chunked,
    Empty,
}

impl BodyFraming {
    /// Inspect a header block. A positive Content-Length wins over chunked.
    pub fn from_head(head: &[u8]) -> Result<Self> {
        let mut content_length = None;
        let mut chunked = false;

        for (name, value) in header_fields(head) {
            if name.eq_ignore_ascii_case("content-length") {
                let length = value.parse::<usize>().map_err(|_| {
                    ProxyError::malformed(format!("invalid Content-Length {:?}", value))
                })?;
                content_length = Some(length);
            } else if name.eq_ignore_ascii_case("transfer-encoding")
                && value.to_ascii_lowercase().contains("chunked")
            {
                chunked = true;
            }
        }

        Ok(match content_length {
            Some(n) if n > 0 => BodyFraming::ContentLength(n),
            _ if chunked => BodyFraming::Chunked,
            _ => BodyFraming::Empty,
        })
    }
}

/// Reads one complete HTTP message at a time.
#[derive(Debug, Clone, Default)]
pub struct MessageFramer {
    limits: FrameLimits,
    read_timeout: Option<Duration>,
}

impl MessageFramer {
    pub fn new(limits: FrameLimits) -> Self {
        Self {
            limits,
            read_timeout: None,
        }
    }

    /// Bound the time spent reading a single message. `None` waits forever.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` (end of stream) when the peer closes before the
    /// header block or the declared body is complete.
    pub async fn read_message<R>(&self, reader: &mut R) -> Result<Option<HttpMessage>>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        let result = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.read_complete(reader))
                .await
                .unwrap_or(Err(ProxyError::ReadTimeout(limit.as_secs()))),
            None => self.read_complete(reader).await,
        };

        match result {
            Ok(message) => Ok(Some(message)),
            Err(ProxyError::StreamClosed) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn read_complete<R>(&self, reader: &mut R) -> Result<HttpMessage>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        let head = self.read_head(reader).await?;
        Ok(match BodyFraming::from_head(&head)? {
            BodyFraming::ContentLength(length) => {
                HttpMessage::new(head, self.read_sized(reader, length).await?)
            }
            BodyFraming::Chunked => {
                let (body, wire) = self.read_chunked(reader).await?;
                HttpMessage::chunked(head, body, wire)
            }
            BodyFraming::Empty => HttpMessage::new(head, Vec::new()),
        })
    }

    async fn read_head<R>(&self, reader: &mut R) -> Result<Vec<u8>>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        let max = self.limits.max_header_bytes;
        let mut head = Vec::with_capacity(1024.min(max));

        loop {
            let remaining = max.saturating_sub(head.len());
            if remaining == 0 {
                return Err(ProxyError::malformed(format!(
                    "header block exceeds {} bytes",
                    max
                )));
            }

            let read = (&mut *reader)
                .take(remaining as u64)
                .read_until(b'\n', &mut head)
                .await?;
            if read == 0 {
                return Err(ProxyError::StreamClosed);
            }
            if head.ends_with(HEADER_TERMINATOR) {
                return Ok(head);
            }
        }
    }

    async fn read_sized<R>(&self, reader: &mut R, length: usize) -> Result<Vec<u8>>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        self.check_body_size(length)?;
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await?;
        Ok(body)
    }

    /// Returns the decoded payload and the chunk framing exactly as read.
    async fn read_chunked<R>(&self, reader: &mut R) -> Result<(Vec<u8>, Vec<u8>)>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        let mut body = Vec::new();
        let mut wire = Vec::new();

        loop {
            let line = read_crlf_line(reader).await?;
            let size = parse_chunk_size(&line)?;
            wire.extend_from_slice(&line);
            if size == 0 {
                read_trailer(reader, &mut wire).await?;
                return Ok((body, wire));
            }

            self.check_body_size(body.len().saturating_add(size))?;
            let start = body.len();
            body.resize(start + size, 0);
            reader.read_exact(&mut body[start..]).await?;

            let mut terminator = [0u8; 2];
            reader.read_exact(&mut terminator).await?;
            if terminator != CRLF {
                return Err(ProxyError::malformed("chunk payload not followed by CRLF"));
            }
            wire.extend_from_slice(&body[start..]);
            wire.extend_from_slice(CRLF);
        }
    }

    fn check_body_size(&self, length: usize) -> Result<()> {
        if length > self.limits.max_body_bytes {
            return Err(ProxyError::malformed(format!(
                "body of {} bytes exceeds {} byte limit",
                length, self.limits.max_body_bytes
            )));
        }
        Ok(())
    }
}

/// Read one `\r\n`-terminated line, terminator included.
async fn read_crlf_line<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_CHUNK_LINE as u64)
        .read_until(b'\n', &mut line)
        .await?;

    if read == 0 {
        return Err(ProxyError::StreamClosed);
    }
    if line.ends_with(CRLF) {
        return Ok(line);
    }
    if line.ends_with(b"\n") {
        return Err(ProxyError::malformed("chunk line terminated by bare LF"));
    }
    if line.len() >= MAX_CHUNK_LINE {
        return Err(ProxyError::malformed(format!(
            "chunk line exceeds {} bytes",
            MAX_CHUNK_LINE
        )));
    }
    Err(ProxyError::StreamClosed)
}

/// Consume optional trailer fields and the final empty line into `wire`.
///
/// A peer that closes here has already delivered the whole body, so end of
/// stream is not an error. The missing empty line is supplied so the message
/// stays correctly framed when written onward.
async fn read_trailer<R>(reader: &mut R, wire: &mut Vec<u8>) -> Result<()>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    loop {
        match read_crlf_line(reader).await {
            Ok(line) => {
                wire.extend_from_slice(&line);
                if line == CRLF {
                    return Ok(());
                }
            }
            Err(ProxyError::StreamClosed) => {
                wire.extend_from_slice(CRLF);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

/// Parse a chunk-size line (`1a3f;ext=1\r\n`), ignoring extensions.
pub fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(line)
        .map_err(|_| ProxyError::malformed("chunk size is not valid UTF-8"))?;
    let digits = text
        .trim_end_matches(['\r', '\n'])
        .split(';')
        .next()
        .unwrap_or("")
        .trim();

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ProxyError::malformed(format!("invalid chunk size {:?}", digits)));
    }
    usize::from_str_radix(digits, 16)
        .map_err(|_| ProxyError::malformed(format!("chunk size {:?} out of range", digits)))
}
