//! Outbound connections to origin servers.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::Result;
use crate::http::Target;
use crate::net::{tls, BoxedStream};

/// Opens connections to targets on behalf of the dispatcher.
pub trait Connector: Send + Sync + 'static {
    /// Connect to `target`, completing the TLS handshake when `target.tls` is set.
    fn connect(&self, target: &Target) -> impl Future<Output = io::Result<BoxedStream>> + Send;
}

/// TCP dialer with optional rustls wrapping and a connect deadline.
#[derive(Clone)]
pub struct TargetConnector {
    tls: TlsConnector,
    connect_timeout: Duration,
}

impl TargetConnector {
    pub fn new(tls: TlsConnector, connect_timeout: Duration) -> Self {
        Self {
            tls,
            connect_timeout,
        }
    }

    /// Connector trusting the platform's native root certificates.
    pub fn with_native_roots(connect_timeout: Duration) -> Result<Self> {
        Ok(Self::new(tls::native_tls_connector()?, connect_timeout))
    }

    async fn dial(&self, target: &Target) -> io::Result<BoxedStream> {
        let tcp = TcpStream::connect((target.host.as_str(), target.port)).await?;
        if !target.tls {
            return Ok(Box::new(tcp));
        }
        let stream = tls::handshake(&self.tls, &target.host, tcp).await?;
        Ok(Box::new(stream))
    }
}

impl Connector for TargetConnector {
    async fn connect(&self, target: &Target) -> io::Result<BoxedStream> {
        match tokio::time::timeout(self.connect_timeout, self.dial(target)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {} timed out after {:?}", target, self.connect_timeout),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn connector() -> TargetConnector {
        TargetConnector::with_native_roots(Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn plain_target_connects_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hi").await.unwrap();
        });

        let target = Target {
            host: "127.0.0.1".into(),
            port,
            tls: false,
        };
        let mut stream = connector().connect(&target).await.unwrap();
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn refused_port_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = Target {
            host: "127.0.0.1".into(),
            port,
            tls: false,
        };
        assert!(connector().connect(&target).await.is_err());
    }

    #[tokio::test]
    async fn tls_handshake_failure_is_an_error() {
        // A peer that speaks plain text cannot complete a TLS handshake.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = socket.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        });

        let target = Target {
            host: "localhost".into(),
            port,
            tls: true,
        };
        assert!(connector().connect(&target).await.is_err());
    }
}
