//! Process fan-out server.
//!
//! The parent forks a fixed number of workers, each owning its own gateway
//! connection and delivery engine. Messages added in the parent are dealt
//! round-robin into per-worker mailboxes and shipped to the workers as
//! newline-delimited JSON over a socket pair; failed notifications come back
//! the same way on a second socket pair per worker. Every channel has exactly
//! one writer, so no cross-process locking is needed.
//!
//! Signal handlers only set flags. The parent polls [`FanoutServer::run`] from
//! its own loop, and each worker checks its flags once per iteration.

mod channel;
mod dispatcher;
mod error;
mod server;
mod signals;
mod worker;

pub use channel::{channel_pair, ChannelReceiver, ChannelSender, Drained};
pub use dispatcher::Dispatcher;
pub use error::{FanoutError, FanoutResult};
pub use server::FanoutServer;
pub use signals::SignalContext;
pub use worker::{WorkerExit, WorkerLoop};
