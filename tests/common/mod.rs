//! Shared utilities for end-to-end tests.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use split_proxy::config::ProxyConfig;
use split_proxy::http::{HttpMessage, MessageFramer, Target};
use split_proxy::net::{BoxedStream, Listener};
use split_proxy::server::Connector;
use split_proxy::{ClientMultiplexer, ServerDispatcher, Shutdown};

/// Start a mock origin that answers every request with `200 OK` and `body`.
///
/// Each connection serves one request, like the dispatcher expects.
pub async fn start_mock_origin(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut socket = BufReader::new(socket);
                if let Ok(Some(_request)) = MessageFramer::default().read_message(&mut socket).await {
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });
        }
    });

    addr
}

/// Start a server that writes back whatever it reads.
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// Start a mock origin that answers every request with the fixed `response` bytes.
pub async fn start_raw_origin(response: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut socket = BufReader::new(socket);
                if let Ok(Some(_request)) = MessageFramer::default().read_message(&mut socket).await {
                    let _ = socket.write_all(response).await;
                    let _ = socket.shutdown().await;
                }
            });
        }
    });

    addr
}

/// Start a mock origin that answers with the decoded request body and
/// reports each request exactly as it arrived on `requests`.
pub async fn start_body_echo_origin() -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, requests) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut socket = BufReader::new(socket);
                if let Ok(Some(request)) = MessageFramer::default().read_message(&mut socket).await {
                    let _ = tx.send(request.to_bytes());
                    let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", request.body().len());
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(request.body()).await;
                    let _ = socket.shutdown().await;
                }
            });
        }
    });

    (addr, requests)
}

/// Echo server for a single connection; `closed` fires once that connection ends.
pub async fn start_watched_echo_server() -> (SocketAddr, oneshot::Receiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, closed) = oneshot::channel();

    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let (mut reader, mut writer) = socket.split();
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
            let _ = tx.send(());
        }
    });

    (addr, closed)
}

/// A local address nothing listens on.
pub async fn dead_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Dials every target at one fixed address over plain TCP.
pub struct RedirectConnector(pub SocketAddr);

impl Connector for RedirectConnector {
    async fn connect(&self, _target: &Target) -> io::Result<BoxedStream> {
        Ok(Box::new(TcpStream::connect(self.0).await?))
    }
}

/// Run `dispatcher` on an ephemeral port.
pub async fn start_server<C: Connector>(
    dispatcher: ServerDispatcher<C>,
    shutdown: &Shutdown,
) -> SocketAddr {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, 1);
    let rx = shutdown.subscribe();
    tokio::spawn(async move { dispatcher.serve(listener, rx).await });
    addr
}

/// Connect a client multiplexer to `server` and serve browsers on an ephemeral port.
pub async fn start_client(server: SocketAddr, config: &ProxyConfig, shutdown: &Shutdown) -> SocketAddr {
    let mux = ClientMultiplexer::connect(&server.to_string(), config)
        .await
        .unwrap();
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, 64);
    let rx = shutdown.subscribe();
    tokio::spawn(async move { mux.serve(listener, rx).await });
    addr
}

/// Read one framed response from a browser-side connection.
pub async fn read_response(stream: &mut BufReader<TcpStream>) -> HttpMessage {
    MessageFramer::default()
        .read_message(stream)
        .await
        .unwrap()
        .expect("proxy closed the connection")
}
