//! Browser-facing accept loop.
//!
//! # Responsibilities
//! - Accept browser connections, one task each
//! - Frame browser requests and submit them to the shared upstream link
//! - Relay responses back, or synthesize a 502 when none arrives
//! - Hand CONNECT requests to the link as tunnels
//!
//! # Design Decisions
//! - Browser-side failures end only that browser's loop
//! - The browser connection is shut down on every exit path

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::client::upstream::{TunnelOutcome, UpstreamHandle, UpstreamLink};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::http::{response, HttpMessage, MessageFramer};
use crate::net::{buffered, BufferedStream, ConnectionRole, ConnectionTracker, Listener, ListenerError, ProxyStream};
use crate::observability::metrics::{self, ExchangeOutcome, ProxySide};

/// Accepts browser connections and funnels them onto one upstream link.
#[derive(Debug, Clone)]
pub struct ClientMultiplexer {
    upstream: UpstreamHandle,
    framer: MessageFramer,
    tracker: ConnectionTracker,
    shutdown_grace: Duration,
}

impl ClientMultiplexer {
    pub fn new(upstream: UpstreamHandle, framer: MessageFramer) -> Self {
        Self {
            upstream,
            framer,
            tracker: ConnectionTracker::new(ConnectionRole::Browser),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    /// Open the shared upstream link to `server_address` using `config`'s limits and timeouts.
    pub async fn connect(server_address: &str, config: &ProxyConfig) -> Result<Self> {
        let framer = MessageFramer::new(config.frame_limits())
            .with_read_timeout(config.timeouts.read_timeout());
        let upstream = UpstreamLink::connect(server_address, framer.clone(), config.tunnel_relay()).await?;
        Ok(Self::new(upstream, framer)
            .with_shutdown_grace(Duration::from_secs(config.timeouts.shutdown_grace_secs)))
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Number of browser connections currently being served.
    pub fn active_browsers(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Accept browsers until `shutdown` fires.
    pub async fn serve(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::result::Result<(), ListenerError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, "Proxy client listening");
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let mux = self.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            mux.handle_browser(stream, peer).await;
                        });
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Failed to accept browser connection");
                    }
                    Err(e) => return Err(e),
                },
                _ = shutdown.recv() => break,
            }
        }

        let remaining = self.tracker.wait_idle(self.shutdown_grace).await;
        tracing::info!(remaining, "Proxy client stopped");
        Ok(())
    }

    /// Serve one browser connection until it closes.
    pub async fn handle_browser<S>(&self, stream: S, peer: SocketAddr)
    where
        S: ProxyStream + 'static,
    {
        let guard = self.tracker.track();
        let span = tracing::info_span!("browser", connection_id = %guard.id(), peer_addr = %peer);

        async move {
            tracing::debug!("Browser connected");
            if let Some(mut browser) = self.browser_loop(buffered(stream)).await {
                let _ = browser.shutdown().await;
            }
            tracing::debug!("Browser disconnected");
            drop(guard);
        }
        .instrument(span)
        .await
    }

    /// Returns the browser stream if this task still owns it.
    async fn browser_loop(&self, mut browser: BufferedStream) -> Option<BufferedStream> {
        loop {
            let request = match self.framer.read_message(&mut browser).await {
                Ok(Some(request)) => request,
                Ok(None) => return Some(browser),
                Err(e @ ProxyError::MalformedMessage(_)) => {
                    tracing::warn!(error = %e, "Rejecting malformed browser request");
                    metrics::record_exchange(ProxySide::Client, ExchangeOutcome::BadRequest);
                    let _ = response::send(&mut browser, response::BAD_REQUEST).await;
                    return Some(browser);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Browser read ended");
                    return Some(browser);
                }
            };

            if is_connect(&request) {
                let handback = self.upstream.tunnel(request, browser).await?;
                browser = handback.browser;
                match handback.outcome {
                    TunnelOutcome::NoResponse => {
                        metrics::record_exchange(ProxySide::Client, ExchangeOutcome::BadGateway);
                        if response::send(&mut browser, response::BAD_GATEWAY).await.is_err() {
                            return Some(browser);
                        }
                    }
                    // The browser connection carried opaque bytes; it ends with the tunnel.
                    TunnelOutcome::BrowserGone | TunnelOutcome::Relayed(_) => return Some(browser),
                    TunnelOutcome::Refused(_) => {}
                }
                continue;
            }

            let request_line = request.start_line();
            let sent = match self.upstream.exchange(request).await {
                Some(reply) => {
                    metrics::record_exchange(ProxySide::Client, ExchangeOutcome::Relayed);
                    reply.write_to(&mut browser).await
                }
                None => {
                    tracing::info!(request = %request_line, "No upstream response, answering 502");
                    metrics::record_exchange(ProxySide::Client, ExchangeOutcome::BadGateway);
                    response::send(&mut browser, response::BAD_GATEWAY).await
                }
            };
            if let Err(e) = sent {
                tracing::debug!(error = %e, "Failed to write response to browser");
                return Some(browser);
            }
        }
    }
}

fn is_connect(request: &HttpMessage) -> bool {
    request
        .request_line()
        .map(|line| line.is_connect())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::TunnelRelay;
    use tokio::io::{duplex, AsyncReadExt, BufReader};

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn answers_502_when_upstream_is_gone_and_keeps_browser() {
        let (link, server) = duplex(4096);
        drop(server);
        let mux = ClientMultiplexer::new(
            UpstreamLink::spawn(link, MessageFramer::default(), Default::default()),
            MessageFramer::default(),
        );

        let (mut browser, inner) = duplex(4096);
        let task = tokio::spawn(async move { mux.handle_browser(inner, peer()).await });

        for _ in 0..2 {
            browser
                .write_all(b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n")
                .await
                .unwrap();
            let mut reply = [0u8; 28];
            browser.read_exact(&mut reply).await.unwrap();
            assert_eq!(&reply, response::BAD_GATEWAY);
        }

        drop(browser);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_request_gets_400_and_close() {
        let (link, _server) = duplex(4096);
        let mux = ClientMultiplexer::new(
            UpstreamLink::spawn(link, MessageFramer::default(), Default::default()),
            MessageFramer::default(),
        );

        let (mut browser, inner) = duplex(4096);
        let task = tokio::spawn(async move { mux.handle_browser(inner, peer()).await });

        browser
            .write_all(b"POST http://a/ HTTP/1.1\r\nContent-Length: lots\r\n\r\n")
            .await
            .unwrap();
        let mut reply = Vec::new();
        browser.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, response::BAD_REQUEST);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn relays_upstream_response_verbatim() {
        let (link, server) = duplex(4096);
        let mux = ClientMultiplexer::new(
            UpstreamLink::spawn(link, MessageFramer::default(), Default::default()),
            MessageFramer::default(),
        );

        tokio::spawn(async move {
            let mut server = BufReader::new(server);
            let framer = MessageFramer::default();
            while let Ok(Some(request)) = framer.read_message(&mut server).await {
                assert_eq!(request.body(), b"abc");
                server
                    .write_all(b"HTTP/1.1 201 Created\r\nContent-Length: 4\r\n\r\ndone")
                    .await
                    .unwrap();
            }
        });

        let (mut browser, inner) = duplex(4096);
        let mux_task = mux.clone();
        tokio::spawn(async move { mux_task.handle_browser(inner, peer()).await });

        browser
            .write_all(b"PUT http://a/x HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc")
            .await
            .unwrap();
        let expected = b"HTTP/1.1 201 Created\r\nContent-Length: 4\r\n\r\ndone";
        let mut reply = vec![0u8; expected.len()];
        browser.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, expected);
        assert_eq!(mux.active_browsers(), 1);
    }

    #[tokio::test]
    async fn browser_is_closed_when_tunnel_goes_idle() {
        let (link, server) = duplex(4096);
        let mux = ClientMultiplexer::new(
            UpstreamLink::spawn(
                link,
                MessageFramer::default(),
                TunnelRelay::new(Duration::from_millis(200), 4096),
            ),
            MessageFramer::default(),
        );

        // Acknowledge the CONNECT, then go quiet without closing the link.
        tokio::spawn(async move {
            let mut server = BufReader::new(server);
            let _connect = MessageFramer::default()
                .read_message(&mut server)
                .await
                .unwrap()
                .unwrap();
            server.write_all(response::CONNECTION_ESTABLISHED).await.unwrap();
            let mut rest = Vec::new();
            let _ = server.read_to_end(&mut rest).await;
        });

        let (mut browser, inner) = duplex(4096);
        tokio::spawn(async move { mux.handle_browser(inner, peer()).await });

        browser
            .write_all(b"CONNECT secure.example:443 HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), browser.read_to_end(&mut seen))
            .await
            .expect("browser connection must close once the tunnel ends")
            .unwrap();
        assert_eq!(seen, response::CONNECTION_ESTABLISHED);
    }
}
