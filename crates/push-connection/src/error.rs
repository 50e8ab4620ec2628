//! Connection error types.

use push_config_and_utils::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Connection error type.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Invalid settings (missing or unreadable certificate, bad endpoint)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Certificate, private key or CA bundle could not be loaded
    #[error("Unable to load {kind} from {}: {source}", .path.display())]
    Certificate {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: openssl::error::ErrorStack,
    },

    /// OpenSSL context setup failed
    #[error("TLS error: {0}")]
    Tls(#[from] openssl::error::ErrorStack),

    /// TLS handshake failed
    #[error("TLS handshake with {endpoint} failed: {reason}")]
    Handshake { endpoint: String, reason: String },

    /// IO error (DNS, TCP connect, socket options)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Every connect attempt failed
    #[error("Unable to connect to {endpoint} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        endpoint: String,
        attempts: u32,
        last_error: String,
    },
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;
