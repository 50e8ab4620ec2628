//! Binary wire codec for the legacy push gateway.
//!
//! Three structures travel over the TLS stream, all big-endian:
//!
//! - [`NotificationFrame`]: command 2, outbound, one per notification
//! - [`ErrorResponse`]: command 8, inbound, written once before the gateway
//!   closes the connection
//! - [`FeedbackTuple`]: fixed 38-byte records streamed by the feedback service
//!
//! Everything here is pure; no I/O happens in this crate.

mod error;
mod error_response;
mod feedback;
mod notification;
mod token;

pub use error::{WireError, WireResult};
pub use error_response::{
    ErrorResponse, FailureClass, StatusCode, COMMAND_ERROR_RESPONSE, ERROR_RESPONSE_SIZE,
};
pub use feedback::{FeedbackTuple, FEEDBACK_TUPLE_SIZE};
pub use notification::{
    NotificationFrame, Priority, COMMAND_NOTIFICATION, EXPIRY_DO_NOT_STORE, MAX_PAYLOAD_LEN,
};
pub use token::{DeviceToken, TOKEN_SIZE};
