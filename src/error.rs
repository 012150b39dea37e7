//! Error types for the Gatekeeper service.
//!
//! Admission decisions themselves never fail; these cover startup and I/O.

use thiserror::Error;

/// Main error type for Gatekeeper operations.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Certificate or key loading errors
    #[error("TLS error: {0}")]
    Tls(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for GatekeeperError {
    fn from(err: ::config::ConfigError) -> Self {
        GatekeeperError::Config(err.to_string())
    }
}

impl From<rustls::Error> for GatekeeperError {
    fn from(err: rustls::Error) -> Self {
        GatekeeperError::Tls(err.to_string())
    }
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
