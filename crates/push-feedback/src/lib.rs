//! Feedback reader.
//!
//! The feedback service streams fixed-size tuples naming devices that no
//! longer have the app installed, then closes the connection. Reading is
//! destructive on the server side: a second connection yields only tuples
//! recorded since the first one.

mod error;
mod reader;

pub use error::{FeedbackError, FeedbackResult};
pub use reader::{FeedbackReader, READ_CHUNK_SIZE};
