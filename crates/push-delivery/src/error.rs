//! Delivery and message error types.

use push_connection::ConnectionError;
use push_wire::WireError;
use thiserror::Error;

/// Raised while building a message, before anything touches the network.
#[derive(Error, Debug)]
pub enum MessageError {
    /// Token or priority failed wire validation
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Message has nobody to go to
    #[error("Message has no recipients")]
    NoRecipients,

    /// Custom property collides with the reserved dictionary
    #[error("Property name '{0}' is reserved")]
    ReservedProperty(String),

    /// Payload over the size limit and could not be shortened
    #[error("Payload is {size} bytes, maximum is {max}")]
    PayloadTooLong { size: usize, max: usize },

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using MessageError.
pub type MessageResult<T> = Result<T, MessageError>;

/// Raised by the delivery engine when it cannot proceed at all.
///
/// Per-notification failures never show up here; they are recorded on the
/// notification and surface through the error container.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// `send()` called without a connection
    #[error("Not connected to the gateway")]
    NotConnected,

    /// `send()` called with nothing queued
    #[error("No notifications queued")]
    EmptyQueue,

    /// Reconnect after an error failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Message could not be turned into notifications
    #[error(transparent)]
    Message(#[from] MessageError),

    /// Frame encoding failed
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Result type alias using DeliveryError.
pub type DeliveryResult<T> = Result<T, DeliveryError>;
