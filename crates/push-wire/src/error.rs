//! Error types for the wire codec.

use thiserror::Error;

/// Codec error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Device token is not 64 hex characters
    #[error("Invalid device token '{0}': expected 64 hex characters")]
    InvalidToken(String),

    /// Priority byte other than 5 or 10
    #[error("Invalid priority {0}: expected 5 or 10")]
    InvalidPriority(u8),

    /// Payload does not fit the 16-bit item length
    #[error("Payload of {0} bytes does not fit in a frame item")]
    PayloadTooLarge(usize),

    /// Status code cannot be carried in the one-byte status field
    #[error("Status code {0} cannot be encoded on the wire")]
    StatusOutOfRange(u16),

    /// Buffer ends before the structure does
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Structurally invalid frame
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type for codec operations.
pub type WireResult<T> = Result<T, WireError>;
