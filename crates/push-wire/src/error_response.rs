//! Inbound error-response frame (command 8) and the status-code table.
//!
//! Wire format (6 bytes):
//! ```text
//! [1: command=8][1: status][4: sequence id]
//! ```

use crate::{WireError, WireResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Command byte of an error-response frame.
pub const COMMAND_ERROR_RESPONSE: u8 = 8;

/// Size of an error-response frame.
pub const ERROR_RESPONSE_SIZE: usize = 6;

/// How a status code should be treated by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Code 0. Nothing to do.
    Success,
    /// Codes 2-8. The notification itself is wrong; never retried.
    ClientRejection,
    /// Code 1, 999 and anything unknown. Retried up to the configured limit.
    Transient,
}

/// Gateway status code, plus the locally synthesized 999.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const NO_ERROR: StatusCode = StatusCode(0);
    pub const PROCESSING_ERROR: StatusCode = StatusCode(1);
    pub const MISSING_TOKEN: StatusCode = StatusCode(2);
    pub const MISSING_TOPIC: StatusCode = StatusCode(3);
    pub const MISSING_PAYLOAD: StatusCode = StatusCode(4);
    pub const INVALID_TOKEN_SIZE: StatusCode = StatusCode(5);
    pub const INVALID_TOPIC_SIZE: StatusCode = StatusCode(6);
    pub const INVALID_PAYLOAD_SIZE: StatusCode = StatusCode(7);
    pub const INVALID_TOKEN: StatusCode = StatusCode(8);
    /// Local write failure the gateway never reported.
    pub const INTERNAL_ERROR: StatusCode = StatusCode(999);

    pub fn message(self) -> &'static str {
        match self.0 {
            0 => "No errors encountered",
            1 => "Processing error",
            2 => "Missing device token",
            3 => "Missing topic",
            4 => "Missing payload",
            5 => "Invalid token size",
            6 => "Invalid topic size",
            7 => "Invalid payload size",
            8 => "Invalid token",
            999 => "Internal error",
            _ => "None (unknown)",
        }
    }

    pub fn class(self) -> FailureClass {
        match self.0 {
            0 => FailureClass::Success,
            2..=8 => FailureClass::ClientRejection,
            _ => FailureClass::Transient,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.message())
    }
}

/// A delivery failure attributed to one sequence id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub command: u8,
    pub status_code: StatusCode,
    pub sequence_id: u32,
    pub observed_at: DateTime<Utc>,
    pub status_message: String,
}

impl ErrorResponse {
    /// Build an error observed now.
    pub fn new(status_code: StatusCode, sequence_id: u32) -> Self {
        Self {
            command: COMMAND_ERROR_RESPONSE,
            status_code,
            sequence_id,
            observed_at: Utc::now(),
            status_message: status_code.message().to_string(),
        }
    }

    /// Synthesize the error recorded when a write was cut short.
    pub fn internal(sequence_id: u32, written: usize, expected: usize) -> Self {
        Self {
            status_message: format!(
                "internal error ({} bytes written instead of {} bytes)",
                written, expected
            ),
            ..Self::new(StatusCode::INTERNAL_ERROR, sequence_id)
        }
    }

    /// Decode an error frame from the start of `data`.
    ///
    /// Returns `None` when fewer than six bytes are available or the command
    /// byte is not 8; a malformed frame is the same as no signal.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < ERROR_RESPONSE_SIZE || data[0] != COMMAND_ERROR_RESPONSE {
            return None;
        }
        let sequence_id = u32::from_be_bytes([data[2], data[3], data[4], data[5]]);
        Some(Self::new(StatusCode(u16::from(data[1])), sequence_id))
    }

    /// Encode to the six-byte wire form. Only gateway codes (0-255) fit.
    pub fn encode(&self) -> WireResult<[u8; ERROR_RESPONSE_SIZE]> {
        let status = u8::try_from(self.status_code.0)
            .map_err(|_| WireError::StatusOutOfRange(self.status_code.0))?;
        let id = self.sequence_id.to_be_bytes();
        Ok([self.command, status, id[0], id[1], id[2], id[3]])
    }

    pub fn class(&self) -> FailureClass {
        self.status_code.class()
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sequence {}: status {} ({})",
            self.sequence_id, self.status_code.0, self.status_message
        )
    }
}
