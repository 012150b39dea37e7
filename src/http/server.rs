//! HTTP(S) server implementation.

use axum::serve::ListenerExt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::service::{router, SharedBackend};
use super::tls::TlsListener;
use crate::error::{GatekeeperError, Result};

/// HTTP server fronted by the admission middleware.
pub struct HttpServer {
    /// Bound listener
    listener: TcpListener,
    /// TLS configuration; plain HTTP when `None`
    tls: Option<Arc<rustls::ServerConfig>>,
    /// Admission decisions for every request
    backend: SharedBackend,
}

impl HttpServer {
    /// Bind the listener.
    pub async fn bind(addr: SocketAddr, backend: SharedBackend) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!(addr = %addr, error = %e, "Failed to bind listener");
            GatekeeperError::Io(e)
        })?;

        Ok(Self {
            listener,
            tls: None,
            backend,
        })
    }

    /// Terminate TLS on accepted connections.
    pub fn with_tls(mut self, config: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the provided signal resolves, then drain connections.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        let app = router(self.backend).into_make_service_with_connect_info::<SocketAddr>();

        let served = match self.tls {
            Some(config) => {
                info!(addr = %addr, "Starting HTTPS server");
                // `TapIo` is what gives custom listeners `ConnectInfo<SocketAddr>`
                let listener = TlsListener::new(self.listener, config).tap_io(|_| {});
                axum::serve(listener, app)
                    .with_graceful_shutdown(signal)
                    .await
            }
            None => {
                info!(addr = %addr, "Starting HTTP server");
                axum::serve(self.listener, app)
                    .with_graceful_shutdown(signal)
                    .await
            }
        };

        served.map_err(|e| {
            error!(error = %e, "HTTP server failed");
            GatekeeperError::Io(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tls::tests::{test_client_config, TEST_CERT_PEM, TEST_KEY_PEM};
    use crate::http::tls::server_config_from_pem;
    use crate::ratelimit::{Registry, Rule};
    use rustls::pki_types::ServerName;
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;
    use tokio_rustls::TlsConnector;

    async fn exchange<S>(mut stream: S, path: &str) -> String
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        stream.flush().await.unwrap();

        let mut response = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => response.extend_from_slice(&buf[..n]),
            }
        }
        String::from_utf8_lossy(&response).into_owned()
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        exchange(TcpStream::connect(addr).await.unwrap(), path).await
    }

    async fn https_get(addr: SocketAddr, path: &str) -> String {
        let stream = TcpStream::connect(addr).await.unwrap();
        let domain = ServerName::try_from("localhost").unwrap();
        let tls = TlsConnector::from(test_client_config())
            .connect(domain, stream)
            .await
            .unwrap();
        exchange(tls, path).await
    }

    async fn start(
        registry: Arc<Registry>,
        tls: bool,
    ) -> (SocketAddr, oneshot::Sender<()>, JoinHandle<Result<()>>) {
        let mut server = HttpServer::bind("127.0.0.1:0".parse().unwrap(), registry)
            .await
            .unwrap();
        if tls {
            server = server.with_tls(server_config_from_pem(TEST_CERT_PEM, TEST_KEY_PEM).unwrap());
        }
        let addr = server.local_addr().unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_with_shutdown(async move {
            let _ = stop_rx.await;
        }));
        (addr, stop_tx, handle)
    }

    #[tokio::test]
    async fn test_server_limits_by_peer_address() {
        let registry = Arc::new(Registry::new(vec![Rule::new("/", 60, 1)]));
        let (addr, stop_tx, handle) = start(registry.clone(), false).await;

        let first = get(addr, "/").await;
        assert!(first.starts_with("HTTP/1.1 200"), "unexpected response: {}", first);
        assert!(first.ends_with("Success"));

        let second = get(addr, "/").await;
        assert!(second.starts_with("HTTP/1.1 423"), "unexpected response: {}", second);
        assert!(registry.get("127.0.0.1", "/").unwrap().is_locked());

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_https_server_limits_by_peer_address() {
        let registry = Arc::new(Registry::new(vec![Rule::new("/", 60, 1)]));
        let (addr, stop_tx, handle) = start(registry.clone(), true).await;

        let first = https_get(addr, "/").await;
        assert!(first.starts_with("HTTP/1.1 200"), "unexpected response: {}", first);
        assert!(first.ends_with("Success"));

        let second = https_get(addr, "/").await;
        assert!(second.starts_with("HTTP/1.1 423"), "unexpected response: {}", second);
        assert!(second.ends_with("Rate limit error"));
        assert!(registry.get("127.0.0.1", "/").unwrap().is_locked());

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stalled_handshake_does_not_block_other_clients() {
        let registry = Arc::new(Registry::new(vec![Rule::new("/", 60, 10)]));
        let (addr, stop_tx, handle) = start(registry, true).await;

        // Opens TCP and never starts the handshake
        let silent = TcpStream::connect(addr).await.unwrap();

        let started = Instant::now();
        let response = tokio::time::timeout(Duration::from_secs(2), https_get(addr, "/"))
            .await
            .expect("HTTPS client blocked behind a stalled handshake");
        assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {}", response);
        assert!(started.elapsed() < Duration::from_secs(2));

        drop(silent);
        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failed_handshake_does_not_stop_server() {
        let registry = Arc::new(Registry::new(vec![Rule::new("/", 60, 10)]));
        let (addr, stop_tx, handle) = start(registry.clone(), true).await;

        // Plaintext against the TLS port is dropped without a response
        let plaintext = tokio::time::timeout(Duration::from_secs(2), get(addr, "/"))
            .await
            .unwrap();
        assert!(!plaintext.starts_with("HTTP/1.1"));
        assert!(registry.is_empty());

        let response = https_get(addr, "/").await;
        assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {}", response);

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let registry = Arc::new(Registry::new(Vec::<Rule>::new()));
        let server = HttpServer::bind("127.0.0.1:0".parse().unwrap(), registry)
            .await
            .unwrap();

        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }
}
