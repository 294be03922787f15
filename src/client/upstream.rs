//! The shared upstream link.
//!
//! # Responsibilities
//! - Own the one connection to the server dispatcher for the process lifetime
//! - Run exchanges strictly one at a time, in submission order
//! - Carry CONNECT tunnels, keeping the link busy until the tunnel ends
//!
//! # Design Decisions
//! - A single task owns the stream; browser tasks submit work over a
//!   channel and await their own response on a oneshot, so a response can
//!   never be handed to the wrong browser
//! - For a tunnel the browser stream moves into the link task and is handed
//!   back when the tunnel ends
//! - The link is never reconnected or replaced; a failed exchange only
//!   fails that exchange

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::error::{ProxyError, Result};
use crate::http::{HttpMessage, MessageFramer};
use crate::net::{buffered, BufferedStream, ConnectionRole, ConnectionTracker, ProxyStream};
use crate::observability::metrics::{self, ProxySide};
use crate::tunnel::{Side, TunnelEnd, TunnelRelay, TunnelSummary};

/// Pending exchanges allowed to queue before submitters wait.
const QUEUE_DEPTH: usize = 256;

/// Work submitted to the link task.
enum LinkCommand {
    Exchange {
        request: HttpMessage,
        reply: oneshot::Sender<Option<HttpMessage>>,
    },
    Tunnel {
        request: HttpMessage,
        browser: BufferedStream,
        reply: oneshot::Sender<TunnelHandback>,
    },
}

/// How a CONNECT submitted to the link turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelOutcome {
    /// Establishment response forwarded and the tunnel ran to completion.
    Relayed(TunnelSummary),
    /// The server answered with a non-2xx status; it was forwarded, no tunnel ran.
    Refused(Option<u16>),
    /// No establishment response arrived; nothing was sent to the browser.
    NoResponse,
    /// Forwarding the establishment response to the browser failed.
    BrowserGone,
}

/// The browser stream returned from a tunnel, with the outcome.
pub struct TunnelHandback {
    pub browser: BufferedStream,
    pub outcome: TunnelOutcome,
}

/// Cloneable handle for submitting work to the link task.
#[derive(Debug, Clone)]
pub struct UpstreamHandle {
    tx: mpsc::Sender<LinkCommand>,
}

impl UpstreamHandle {
    /// Send `request` upstream and wait for its response.
    ///
    /// `None` means no response arrived; the caller answers with a 502.
    pub async fn exchange(&self, request: HttpMessage) -> Option<HttpMessage> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(LinkCommand::Exchange { request, reply })
            .await
            .ok()?;
        response.await.ok().flatten()
    }

    /// Send a CONNECT upstream and run the resulting tunnel for `browser`.
    ///
    /// Returns `None` only if the link task went away while holding the
    /// browser stream.
    pub async fn tunnel(&self, request: HttpMessage, browser: BufferedStream) -> Option<TunnelHandback> {
        let (reply, handback) = oneshot::channel();
        let command = LinkCommand::Tunnel {
            request,
            browser,
            reply,
        };
        if let Err(mpsc::error::SendError(command)) = self.tx.send(command).await {
            return match command {
                LinkCommand::Tunnel { browser, .. } => Some(TunnelHandback {
                    browser,
                    outcome: TunnelOutcome::NoResponse,
                }),
                LinkCommand::Exchange { .. } => None,
            };
        }
        handback.await.ok()
    }
}

/// The task that owns the upstream stream.
pub struct UpstreamLink {
    stream: BufferedStream,
    framer: MessageFramer,
    relay: TunnelRelay,
    commands: mpsc::Receiver<LinkCommand>,
    /// Set once a response was only partly consumed; the stream can no
    /// longer be framed.
    desynced: bool,
}

impl UpstreamLink {
    /// Dial the server dispatcher and start the link task.
    pub async fn connect(
        server_address: &str,
        framer: MessageFramer,
        relay: TunnelRelay,
    ) -> Result<UpstreamHandle> {
        let stream = TcpStream::connect(server_address)
            .await
            .map_err(|source| ProxyError::TargetUnreachable {
                target: server_address.to_string(),
                source,
            })?;
        tracing::info!(server = %server_address, "Connected to server dispatcher");
        Ok(Self::spawn(stream, framer, relay))
    }

    /// Start the link task over an already connected stream.
    pub fn spawn<S>(stream: S, framer: MessageFramer, relay: TunnelRelay) -> UpstreamHandle
    where
        S: ProxyStream + 'static,
    {
        let (tx, commands) = mpsc::channel(QUEUE_DEPTH);
        let link = Self {
            stream: buffered(stream),
            framer,
            relay,
            commands,
            desynced: false,
        };

        let guard = ConnectionTracker::new(ConnectionRole::Upstream).track();
        let span = tracing::info_span!("upstream", connection_id = %guard.id());
        tokio::spawn(
            async move {
                let _guard = guard;
                link.run().await;
            }
            .instrument(span),
        );

        UpstreamHandle { tx }
    }

    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                LinkCommand::Exchange { request, reply } => {
                    let response = self.exchange(&request).await;
                    let _ = reply.send(response);
                }
                LinkCommand::Tunnel {
                    request,
                    browser,
                    reply,
                } => {
                    let handback = self.tunnel(&request, browser).await;
                    let _ = reply.send(handback);
                }
            }
        }
        tracing::debug!("All submitters gone, link task exiting");
    }

    async fn exchange(&mut self, request: &HttpMessage) -> Option<HttpMessage> {
        if self.desynced {
            tracing::debug!(request = %request.start_line(), "Upstream link out of sync, not sending");
            return None;
        }
        if let Err(e) = request.write_to(&mut self.stream).await {
            tracing::warn!(error = %e, request = %request.start_line(), "Failed to send request upstream");
            return None;
        }

        match self.framer.read_message(&mut self.stream).await {
            Ok(Some(response)) => {
                tracing::debug!(
                    request = %request.start_line(),
                    status = ?response.status_code(),
                    bytes = response.len(),
                    "Upstream response received"
                );
                Some(response)
            }
            Ok(None) => {
                tracing::warn!(request = %request.start_line(), "Upstream link closed before a response arrived");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, request = %request.start_line(), "Failed to read upstream response");
                if matches!(e, ProxyError::ReadTimeout(_) | ProxyError::MalformedMessage(_)) {
                    tracing::error!("Upstream link out of sync after a partial response; later exchanges will fail");
                    self.desynced = true;
                }
                None
            }
        }
    }

    async fn tunnel(&mut self, request: &HttpMessage, mut browser: BufferedStream) -> TunnelHandback {
        let response = match self.exchange(request).await {
            Some(response) => response,
            None => {
                return TunnelHandback {
                    browser,
                    outcome: TunnelOutcome::NoResponse,
                }
            }
        };

        if let Err(e) = response.write_to(&mut browser).await {
            tracing::debug!(error = %e, "Browser went away before the tunnel started");
            return TunnelHandback {
                browser,
                outcome: TunnelOutcome::BrowserGone,
            };
        }

        let status = response.status_code();
        if !matches!(status, Some(200..=299)) {
            tracing::info!(request = %request.start_line(), status = ?status, "Tunnel refused upstream");
            return TunnelHandback {
                browser,
                outcome: TunnelOutcome::Refused(status),
            };
        }

        tracing::debug!(request = %request.start_line(), "Tunnel established, link held until it ends");
        let summary = self.relay.run(&mut browser, &mut self.stream).await;
        metrics::record_tunnel(ProxySide::Client, &summary);

        match summary.end {
            TunnelEnd::Closed(Side::B) | TunnelEnd::Failed(Side::B) => {
                tracing::warn!(end = %summary.end, "Upstream link ended during tunnel; later exchanges will fail");
            }
            _ => tracing::info!(
                end = %summary.end,
                browser_to_upstream = summary.a_to_b,
                upstream_to_browser = summary.b_to_a,
                "Tunnel closed"
            ),
        }

        TunnelHandback {
            browser,
            outcome: TunnelOutcome::Relayed(summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};

    fn message(raw: &[u8]) -> HttpMessage {
        let split = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        HttpMessage::new(raw[..split].to_vec(), raw[split..].to_vec())
    }

    fn link() -> (UpstreamHandle, BufReader<DuplexStream>) {
        let (ours, theirs) = duplex(64 * 1024);
        let handle = UpstreamLink::spawn(
            ours,
            MessageFramer::default(),
            TunnelRelay::new(Duration::from_secs(5), 4096),
        );
        (handle, BufReader::new(theirs))
    }

    #[tokio::test]
    async fn exchange_round_trip() {
        let (handle, mut server) = link();
        let framer = MessageFramer::default();

        let server_task = tokio::spawn(async move {
            let request = framer.read_message(&mut server).await.unwrap().unwrap();
            assert_eq!(request.start_line(), "GET http://a/ HTTP/1.1");
            server
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await
                .unwrap();
            server
        });

        let response = handle
            .exchange(message(b"GET http://a/ HTTP/1.1\r\nHost: a\r\n\r\n"))
            .await
            .unwrap();
        assert_eq!(response.body(), b"ok");
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_exchanges_never_cross() {
        let (handle, mut server) = link();

        // Echo the request path back as the body, strictly in order.
        tokio::spawn(async move {
            let framer = MessageFramer::default();
            while let Ok(Some(request)) = framer.read_message(&mut server).await {
                let line = request.request_line().unwrap();
                let reply = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                    line.target.len(),
                    line.target
                );
                tokio::task::yield_now().await;
                server.write_all(reply.as_bytes()).await.unwrap();
            }
        });

        let mut tasks = Vec::new();
        for i in 0..32 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                let target = format!("http://host/{}", i);
                let raw = format!("GET {} HTTP/1.1\r\n\r\n", target);
                let response = handle.exchange(message(raw.as_bytes())).await.unwrap();
                assert_eq!(response.body(), target.as_bytes());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn closed_link_yields_no_response_and_stays_usable() {
        let (handle, server) = link();
        drop(server);

        let request = message(b"GET http://a/ HTTP/1.1\r\n\r\n");
        assert!(handle.exchange(request.clone()).await.is_none());
        // The link task is still alive and answering.
        assert!(handle.exchange(request).await.is_none());
    }

    #[tokio::test]
    async fn tunnel_relays_and_returns_browser() {
        let (handle, mut server) = link();
        let (mut browser_outer, browser_inner) = duplex(4096);

        let server_task = tokio::spawn(async move {
            let framer = MessageFramer::default();
            let connect = framer.read_message(&mut server).await.unwrap().unwrap();
            assert!(connect.request_line().unwrap().is_connect());
            server
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();

            let mut hello = [0u8; 5];
            server.read_exact(&mut hello).await.unwrap();
            assert_eq!(&hello, b"hello");
            server.write_all(b"world").await.unwrap();
            server
        });

        let tunnel = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .tunnel(
                        message(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n"),
                        buffered(browser_inner),
                    )
                    .await
            }
        });

        let mut established = [0u8; 39];
        browser_outer.read_exact(&mut established).await.unwrap();
        assert_eq!(&established, b"HTTP/1.1 200 Connection established\r\n\r\n");

        browser_outer.write_all(b"hello").await.unwrap();
        let mut world = [0u8; 5];
        browser_outer.read_exact(&mut world).await.unwrap();
        assert_eq!(&world, b"world");

        drop(browser_outer);
        let handback = tunnel.await.unwrap().unwrap();
        match handback.outcome {
            TunnelOutcome::Relayed(summary) => {
                assert_eq!(summary.end, TunnelEnd::Closed(Side::A));
                assert_eq!(summary.a_to_b, 5);
                assert_eq!(summary.b_to_a, 5);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let _server = server_task.await.unwrap();
    }

    #[tokio::test]
    async fn refused_tunnel_forwards_status_without_relaying() {
        let (handle, mut server) = link();
        let (mut browser_outer, browser_inner) = duplex(4096);

        tokio::spawn(async move {
            let framer = MessageFramer::default();
            let _ = framer.read_message(&mut server).await.unwrap().unwrap();
            server.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await.unwrap();
            // Keep the link open.
            let mut rest = Vec::new();
            let _ = server.read_to_end(&mut rest).await;
        });

        let handback = handle
            .tunnel(message(b"CONNECT nowhere:443 HTTP/1.1\r\n\r\n"), buffered(browser_inner))
            .await
            .unwrap();
        assert_eq!(handback.outcome, TunnelOutcome::Refused(Some(502)));

        let mut reply = [0u8; 28];
        browser_outer.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"HTTP/1.1 502 Bad Gateway\r\n\r\n");
    }

    #[tokio::test]
    async fn partial_response_timeout_poisons_the_link() {
        let (ours, theirs) = duplex(64 * 1024);
        let handle = UpstreamLink::spawn(
            ours,
            MessageFramer::default().with_read_timeout(Some(Duration::from_millis(100))),
            TunnelRelay::default(),
        );
        let mut server = BufReader::new(theirs);

        let request = message(b"GET http://a/ HTTP/1.1\r\n\r\n");
        let first = tokio::spawn({
            let handle = handle.clone();
            let request = request.clone();
            async move { handle.exchange(request).await }
        });

        let framer = MessageFramer::default();
        framer.read_message(&mut server).await.unwrap().unwrap();
        server
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc")
            .await
            .unwrap();
        assert!(first.await.unwrap().is_none());

        // The rest of the stale body followed by a well-formed response
        // must not be handed to the next caller.
        server
            .write_all(b"defghijHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();
        assert!(handle.exchange(request).await.is_none());
    }
}
