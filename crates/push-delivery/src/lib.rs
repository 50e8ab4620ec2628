//! Delivery engine for the legacy push gateway.
//!
//! The gateway never acknowledges a notification. It only ever answers with
//! a single error frame naming the sequence id it choked on, and then closes
//! the connection. [`DeliveryEngine`] pipelines writes ahead of that signal
//! and reconciles its queue whenever one shows up: everything before the
//! failing id was accepted, the failing id gets the error recorded, and
//! everything after it is sent again on a fresh connection.

mod engine;
mod error;
mod message;

pub use engine::{DeliveryEngine, DeliverySettings, Notification, SendSummary};
pub use error::{DeliveryError, DeliveryResult, MessageError, MessageResult};
pub use message::{Message, MessagePayload, DEFAULT_EXPIRY_SECONDS, MAX_PAYLOAD_SIZE};
