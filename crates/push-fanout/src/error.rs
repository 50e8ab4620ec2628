//! Fan-out error types.

use push_connection::ConnectionError;
use push_delivery::{DeliveryError, MessageError};
use thiserror::Error;

/// Fan-out error type.
#[derive(Error, Debug)]
pub enum FanoutError {
    /// `start()` called twice
    #[error("Worker processes already started")]
    AlreadyStarted,

    /// Zero worker processes requested
    #[error("At least one worker process is required")]
    NoProcesses,

    /// fork, waitpid or kill failed
    #[error("System call failed: {0}")]
    Sys(#[from] nix::errno::Errno),

    /// IO error (socket pairs, signal registration)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Worker transport could not be built or connected
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Message rejected before it was queued
    #[error(transparent)]
    Message(#[from] MessageError),

    /// Worker delivery engine could not proceed
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Result type alias using FanoutError.
pub type FanoutResult<T> = Result<T, FanoutError>;
