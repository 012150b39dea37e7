//! TLS termination for the HTTP listener.

use axum::serve::Listener;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Timeout;
use tokio_rustls::server::TlsStream;
use tokio_rustls::{Accept, TlsAcceptor};
use tracing::{info, warn};

use crate::config::TlsConfig;
use crate::error::{GatekeeperError, Result};

/// Upper bound on a single handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a rustls server configuration from PEM certificate chain and key.
pub fn load_server_config(tls: &TlsConfig) -> Result<Arc<rustls::ServerConfig>> {
    let cert_pem = tls.read_cert_pem()?;
    let key_pem = tls.read_key_pem()?;
    server_config_from_pem(cert_pem.as_bytes(), key_pem.as_bytes())
}

/// Build a rustls server configuration from PEM bytes.
pub fn server_config_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<rustls::ServerConfig>> {
    let certs = CertificateDer::pem_slice_iter(cert_pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GatekeeperError::Tls(format!("Invalid certificate PEM: {}", e)))?;
    if certs.is_empty() {
        return Err(GatekeeperError::Tls(
            "No certificates found in certificate PEM".to_string(),
        ));
    }

    let key = PrivateKeyDer::from_pem_slice(key_pem)
        .map_err(|e| GatekeeperError::Tls(format!("Invalid private key PEM: {}", e)))?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    info!("TLS configuration loaded");
    Ok(Arc::new(config))
}

/// A TCP listener whose connections speak TLS.
///
/// `accept` returns as soon as the TCP connection is established. The
/// handshake is driven by the first read or write on the returned
/// [`TlsConnection`], inside the task serving that connection, so a peer
/// that never completes it only holds up itself.
pub struct TlsListener {
    inner: TcpListener,
    acceptor: TlsAcceptor,
}

impl TlsListener {
    pub fn new(inner: TcpListener, config: Arc<rustls::ServerConfig>) -> Self {
        Self {
            inner,
            acceptor: TlsAcceptor::from(config),
        }
    }
}

impl Listener for TlsListener {
    type Io = TlsConnection;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        let (stream, peer) = Listener::accept(&mut self.inner).await;
        (TlsConnection::new(self.acceptor.accept(stream), peer), peer)
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

/// A server-side TLS connection whose handshake completes on first use.
pub struct TlsConnection {
    peer: SocketAddr,
    state: ConnectionState,
}

enum ConnectionState {
    Handshaking(Pin<Box<Timeout<Accept<TcpStream>>>>),
    Established(TlsStream<TcpStream>),
    Failed,
}

impl TlsConnection {
    fn new(accept: Accept<TcpStream>, peer: SocketAddr) -> Self {
        Self {
            peer,
            state: ConnectionState::Handshaking(Box::pin(tokio::time::timeout(
                HANDSHAKE_TIMEOUT,
                accept,
            ))),
        }
    }

    /// Whether the handshake has completed.
    pub fn is_established(&self) -> bool {
        matches!(self.state, ConnectionState::Established(_))
    }

    fn poll_established(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<&mut TlsStream<TcpStream>>> {
        if let ConnectionState::Handshaking(handshake) = &mut self.state {
            let outcome = ready!(handshake.as_mut().poll(cx));
            self.state = match outcome {
                Ok(Ok(stream)) => ConnectionState::Established(stream),
                Ok(Err(e)) => {
                    warn!(peer = %self.peer, error = %e, "TLS handshake failed");
                    ConnectionState::Failed
                }
                Err(_) => {
                    warn!(peer = %self.peer, "TLS handshake timed out");
                    ConnectionState::Failed
                }
            };
        }

        match &mut self.state {
            ConnectionState::Established(stream) => Poll::Ready(Ok(stream)),
            _ => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "TLS handshake did not complete",
            ))),
        }
    }
}

impl AsyncRead for TlsConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let stream = ready!(self.get_mut().poll_established(cx))?;
        Pin::new(stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let stream = ready!(self.get_mut().poll_established(cx))?;
        Pin::new(stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().state {
            ConnectionState::Established(stream) => Pin::new(stream).poll_flush(cx),
            _ => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Nothing to close cleanly before the handshake is done
        match &mut self.get_mut().state {
            ConnectionState::Established(stream) => Pin::new(stream).poll_shutdown(cx),
            _ => Poll::Ready(Ok(())),
        }
    }
}
