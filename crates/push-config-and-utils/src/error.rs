//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Error raised while building or validating client configuration.
///
/// These surface eagerly, before any connection is attempted.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Unknown environment name
    #[error("Invalid environment: {0} (expected 'production' or 'sandbox')")]
    InvalidEnvironment(String),

    /// No provider certificate configured
    #[error("Missing provider certificate path")]
    MissingCertificate,

    /// Certificate or CA file could not be read
    #[error("Unable to read {kind} file {}: {source}", .path.display())]
    UnreadableFile {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A numeric or enumerated setting is out of range
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// Endpoint override is not `host:port`
    #[error("Invalid endpoint '{0}', expected host:port")]
    InvalidEndpoint(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Path error (e.g., home directory not found)
    #[error("Path error: {0}")]
    Path(String),

    /// Tracing subscriber could not be installed
    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type alias using ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;
