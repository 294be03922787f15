//! Upstream-link dispatcher.
//!
//! # Responsibilities
//! - Accept upstream links from client multiplexers
//! - Read forwarded requests one at a time from each link
//! - Plain requests: dial the target, forward verbatim, relay one response
//! - CONNECT: dial the target, acknowledge, run the tunnel relay
//!
//! # Design Decisions
//! - One target connection per request, closed after the response (no pooling)
//! - Target failures become a 502 and the link keeps going
//! - Broken framing on the link answers 400 and closes that link, since the
//!   byte stream cannot be resynchronised

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::config::{ConnectFailurePolicy, ProxyConfig};
use crate::error::{ProxyError, Result};
use crate::http::{response, HttpMessage, MessageFramer, Target};
use crate::net::{buffered, BufferedStream, ConnectionRole, ConnectionTracker, Listener, ListenerError, ProxyStream};
use crate::observability::metrics::{self, ExchangeOutcome, ProxySide};
use crate::server::target::{Connector, TargetConnector};
use crate::tunnel::TunnelRelay;

/// Serves forwarded requests arriving on upstream links.
pub struct ServerDispatcher<C = TargetConnector> {
    connector: Arc<C>,
    framer: MessageFramer,
    relay: TunnelRelay,
    connect_tls: bool,
    connect_failure: ConnectFailurePolicy,
    tracker: ConnectionTracker,
    targets: ConnectionTracker,
    shutdown_grace: Duration,
}

impl<C> Clone for ServerDispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            framer: self.framer.clone(),
            relay: self.relay,
            connect_tls: self.connect_tls,
            connect_failure: self.connect_failure,
            tracker: self.tracker.clone(),
            targets: self.targets.clone(),
            shutdown_grace: self.shutdown_grace,
        }
    }
}

impl ServerDispatcher<TargetConnector> {
    /// Dispatcher dialing real targets with the platform trust store.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let connector = TargetConnector::with_native_roots(config.timeouts.connect_timeout())?;
        Ok(Self::new(connector, config))
    }
}

impl<C: Connector> ServerDispatcher<C> {
    pub fn new(connector: C, config: &ProxyConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            framer: MessageFramer::new(config.frame_limits())
                .with_read_timeout(config.timeouts.read_timeout()),
            relay: config.tunnel_relay(),
            connect_tls: config.server.connect_tls,
            connect_failure: config.server.connect_failure,
            tracker: ConnectionTracker::new(ConnectionRole::Upstream),
            targets: ConnectionTracker::new(ConnectionRole::Target),
            shutdown_grace: Duration::from_secs(config.timeouts.shutdown_grace_secs),
        }
    }

    /// Number of upstream links currently being served.
    pub fn active_links(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Accept upstream links until `shutdown` fires.
    ///
    /// The listener's connection limit caps concurrently served links.
    pub async fn serve(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::result::Result<(), ListenerError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, max_links = listener.max_connections(), "Proxy server listening");
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let dispatcher = self.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            dispatcher.dispatch(stream, peer).await;
                        });
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Failed to accept upstream link");
                    }
                    Err(e) => return Err(e),
                },
                _ = shutdown.recv() => break,
            }
        }

        let remaining = self.tracker.wait_idle(self.shutdown_grace).await;
        tracing::info!(remaining, "Proxy server stopped");
        Ok(())
    }

    /// Serve one upstream link until it closes or breaks.
    pub async fn dispatch<S>(&self, link: S, peer: SocketAddr)
    where
        S: ProxyStream + 'static,
    {
        let guard = self.tracker.track();
        let span = tracing::info_span!("link", connection_id = %guard.id(), peer_addr = %peer);

        async move {
            tracing::info!("Upstream link connected");
            let mut link = buffered(link);
            match self.dispatch_loop(&mut link).await {
                Ok(()) => tracing::info!("Upstream link closed"),
                Err(e) if e.is_disconnect() => tracing::info!("Upstream link closed"),
                Err(e) => tracing::warn!(error = %e, "Upstream link terminated"),
            }
            let _ = link.shutdown().await;
            drop(guard);
        }
        .instrument(span)
        .await
    }

    /// Returns `Err` only when the link itself is unusable.
    async fn dispatch_loop(&self, link: &mut BufferedStream) -> Result<()> {
        loop {
            let request = match self.framer.read_message(link).await {
                Ok(Some(request)) => request,
                Ok(None) => return Ok(()),
                Err(e @ ProxyError::MalformedMessage(_)) => {
                    metrics::record_exchange(ProxySide::Server, ExchangeOutcome::BadRequest);
                    response::send(link, response::BAD_REQUEST).await?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            let resolved = request.request_line().and_then(|line| {
                let target = Target::for_request(&line, request.head(), self.connect_tls)?;
                Ok((line, target))
            });
            let (line, target) = match resolved {
                Ok(resolved) => resolved,
                Err(e) => {
                    tracing::warn!(error = %e, request = %request.start_line(), "Rejecting forwarded request");
                    metrics::record_exchange(ProxySide::Server, ExchangeOutcome::BadRequest);
                    response::send(link, response::BAD_REQUEST).await?;
                    continue;
                }
            };

            if line.is_connect() {
                self.handle_connect(link, &target).await?;
            } else {
                self.handle_forward(link, &request, &target).await?;
            }
        }
    }

    async fn handle_connect(&self, link: &mut BufferedStream, target: &Target) -> Result<()> {
        let mut upstream = match self.connector.connect(target).await {
            Ok(stream) => {
                metrics::record_target_connect(true);
                stream
            }
            Err(e) => {
                metrics::record_target_connect(false);
                tracing::warn!(target = %target, error = %e, "CONNECT target unreachable");
                if self.connect_failure == ConnectFailurePolicy::BadGateway {
                    metrics::record_exchange(ProxySide::Server, ExchangeOutcome::BadGateway);
                    response::send(link, response::BAD_GATEWAY).await?;
                }
                return Ok(());
            }
        };

        let target_guard = self.targets.track();
        response::send(link, response::CONNECTION_ESTABLISHED).await?;
        tracing::debug!(
            target = %target,
            target_connection_id = %target_guard.id(),
            idle_timeout = ?self.relay.idle_timeout(),
            "Tunnel established"
        );

        let summary = self.relay.run(link, &mut upstream).await;
        let _ = upstream.shutdown().await;
        drop(target_guard);
        metrics::record_tunnel(ProxySide::Server, &summary);
        tracing::info!(
            target = %target,
            end = %summary.end,
            link_to_target = summary.a_to_b,
            target_to_link = summary.b_to_a,
            "Tunnel closed"
        );
        Ok(())
    }

    async fn handle_forward(
        &self,
        link: &mut BufferedStream,
        request: &HttpMessage,
        target: &Target,
    ) -> Result<()> {
        match self.fetch(request, target).await {
            Ok(Some(reply)) => {
                tracing::debug!(
                    target = %target,
                    request = %request.start_line(),
                    status = ?reply.status_code(),
                    bytes = reply.len(),
                    "Relaying target response"
                );
                metrics::record_exchange(ProxySide::Server, ExchangeOutcome::Relayed);
                reply.write_to(link).await
            }
            Ok(None) => {
                tracing::info!(target = %target, "Target closed without a response, answering 502");
                metrics::record_exchange(ProxySide::Server, ExchangeOutcome::BadGateway);
                response::send(link, response::BAD_GATEWAY).await
            }
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "Target request failed, answering 502");
                metrics::record_exchange(ProxySide::Server, ExchangeOutcome::BadGateway);
                response::send(link, response::BAD_GATEWAY).await
            }
        }
    }

    /// One request on a fresh target connection, closed afterwards.
    async fn fetch(&self, request: &HttpMessage, target: &Target) -> Result<Option<HttpMessage>> {
        let stream = match self.connector.connect(target).await {
            Ok(stream) => stream,
            Err(source) => {
                metrics::record_target_connect(false);
                return Err(ProxyError::TargetUnreachable {
                    target: target.authority(),
                    source,
                });
            }
        };
        metrics::record_target_connect(true);
        let _target_guard = self.targets.track();

        let mut stream = BufReader::new(stream);
        request.write_to(&mut stream).await?;
        let reply = self.framer.read_message(&mut stream).await;
        let _ = stream.shutdown().await;
        reply
    }
}
