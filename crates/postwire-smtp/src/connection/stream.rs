//! Stream types for SMTP connections.

#![allow(clippy::missing_errors_doc)]

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::error::{Error, Result};

/// Anything a connection can run over: TCP, an in-memory duplex, a proxy tunnel.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// A stream that can be either plaintext or TLS.
pub enum SmtpStream {
    /// Plaintext stream.
    Plain(Box<dyn Transport>),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<Box<dyn Transport>>>),
    /// Shut down, or lost during a failed upgrade.
    Closed,
}

impl SmtpStream {
    /// Wraps a plaintext transport.
    pub fn plain(transport: impl Transport + 'static) -> Self {
        Self::Plain(Box::new(transport))
    }

    /// Upgrades a plaintext stream to TLS in place (STARTTLS).
    ///
    /// On failure the stream is left [`SmtpStream::Closed`].
    pub async fn upgrade_to_tls(&mut self, connector: &TlsConnector, host: &str) -> Result<()> {
        match std::mem::replace(self, Self::Closed) {
            Self::Plain(transport) => {
                let server_name = ServerName::try_from(host.to_string())?;
                let tls = connector.connect(server_name, transport).await?;
                *self = Self::Tls(Box::new(tls));
                Ok(())
            }
            other => {
                let already_tls = other.is_tls();
                *self = other;
                Err(Error::Protocol(if already_tls {
                    "Stream is already TLS".to_string()
                } else {
                    "Stream is closed".to_string()
                }))
            }
        }
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Returns true once the stream has been shut down.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Debug for SmtpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Plain(_) => "SmtpStream::Plain",
            Self::Tls(_) => "SmtpStream::Tls",
            Self::Closed => "SmtpStream::Closed",
        })
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream is closed")
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Closed => Poll::Ready(Err(closed())),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Closed => Poll::Ready(Err(closed())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
            Self::Closed => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Closed => Poll::Ready(Ok(())),
        }
    }
}

/// Creates a TLS connector, defaulting to the webpki root certificates.
///
/// The default configuration uses the `ring` provider explicitly, so it does
/// not depend on a process-level default being installed.
pub fn create_tls_connector(config: Option<Arc<ClientConfig>>) -> Result<TlsConnector> {
    let config = match config {
        Some(config) => config,
        None => {
            let root_store = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            let provider = Arc::new(rustls::crypto::ring::default_provider());
            Arc::new(
                ClientConfig::builder_with_provider(provider)
                    .with_safe_default_protocol_versions()?
                    .with_root_certificates(root_store)
                    .with_no_client_auth(),
            )
        }
    };

    Ok(TlsConnector::from(config))
}

/// Connects to a server without TLS (for STARTTLS or plaintext).
pub async fn connect(host: &str, port: u16) -> Result<SmtpStream> {
    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|source| Error::Connect {
            host: host.to_string(),
            port,
            source,
        })?;
    tcp.set_nodelay(true)?;
    tracing::debug!(host, port, "connected");
    Ok(SmtpStream::plain(tcp))
}

/// Connects to a server with TLS from the start.
pub async fn connect_tls(host: &str, port: u16, connector: &TlsConnector) -> Result<SmtpStream> {
    let mut stream = connect(host, port).await?;
    stream.upgrade_to_tls(connector, host).await?;
    Ok(stream)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_plain_round_trip() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = SmtpStream::plain(client);
        stream.write_all(b"EHLO x\r\n").await.unwrap();

        let mut buf = [0u8; 8];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"EHLO x\r\n");
        assert!(!stream.is_tls());
    }

    #[tokio::test]
    async fn test_closed_stream_errors() {
        let mut stream = SmtpStream::Closed;
        assert!(stream.write_all(b"x").await.is_err());
        let mut buf = [0u8; 1];
        assert!(stream.read(&mut buf).await.is_err());
        stream.shutdown().await.unwrap();
    }

    #[test]
    fn test_default_connector_without_installed_provider() {
        assert!(rustls::crypto::CryptoProvider::get_default().is_none());
        assert!(create_tls_connector(None).is_ok());
    }

    #[tokio::test]
    async fn test_upgrade_rejects_bad_server_name() {
        let (client, _server) = tokio::io::duplex(64);
        let mut stream = SmtpStream::plain(client);
        let connector = create_tls_connector(None).unwrap();
        let err = stream.upgrade_to_tls(&connector, "").await.unwrap_err();
        assert!(matches!(err, Error::InvalidDnsName(_)));
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn test_upgrade_closed_stream() {
        let mut stream = SmtpStream::Closed;
        let connector = create_tls_connector(None).unwrap();
        assert!(matches!(
            stream.upgrade_to_tls(&connector, "localhost").await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, Error::Connect { port: p, .. } if p == port));
    }

    #[tokio::test]
    async fn test_connect_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let stream = connect("127.0.0.1", port).await.unwrap();
        assert!(!stream.is_tls());
        assert!(!stream.is_closed());
    }
}
