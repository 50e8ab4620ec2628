//! Feedback error types.

use push_connection::ConnectionError;
use thiserror::Error;

/// Feedback error type.
#[derive(Error, Debug)]
pub enum FeedbackError {
    /// `receive()` called without a connection
    #[error("Not connected to the feedback service")]
    NotConnected,

    /// Connecting to the feedback service failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Result type alias using FeedbackError.
pub type FeedbackResult<T> = Result<T, FeedbackError>;
