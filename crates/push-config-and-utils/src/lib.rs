//! Core configuration and utilities for the pushgate client.
//!
//! Everything here is plain settings or ambient plumbing: the gateway
//! environment table, the client configuration surface, filesystem paths,
//! the injected logging capability and tracing initialisation.

mod config;
mod endpoints;
mod error;
mod logger;
mod logging;
mod paths;

pub use config::{ClientConfig, DEFAULT_LOG_LEVEL};
pub use endpoints::{Endpoint, Environment, Service};
pub use error::{ConfigError, ConfigResult};
pub use logger::{Logger, MemoryLogger, NoopLogger, SharedLogger, TracingLogger};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;

/// Re-export so logger implementors don't need a direct tracing dependency.
pub use tracing::Level;
