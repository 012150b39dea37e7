//! HTTP front end: listener, optional TLS, and the admission middleware.

mod server;
mod service;
mod tls;

pub use server::HttpServer;
pub use service::{client_id, router, SharedBackend, REJECTED_BODY};
pub use tls::{load_server_config, server_config_from_pem, TlsConnection, TlsListener};
