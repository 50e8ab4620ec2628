//! Connection manager for the legacy push gateway.
//!
//! [`Connection`] owns one TLS socket to either the notification gateway or
//! the feedback service. Connecting retries with a fixed pause; once the
//! handshake completes the socket is switched to non-blocking mode and the
//! layers above talk to it through the [`Transport`] trait.

mod connection;
mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod transport;

pub use connection::Connection;
pub use error::{ConnectionError, ConnectionResult};
pub use transport::Transport;
