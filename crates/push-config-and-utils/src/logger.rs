//! Injected logging capability.
//!
//! Connections, engines and the fan-out server receive a [`Logger`] at
//! construction instead of reaching for a process-global sink.

use std::sync::{Arc, Mutex};
use tracing::Level;

/// A sink for diagnostic messages.
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }

    fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }
}

/// Reference-counted logger handle shared between components.
pub type SharedLogger = Arc<dyn Logger>;

/// Forwards to `tracing`, tagging every event with the process id so that
/// lines from forked workers can be told apart.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn shared() -> SharedLogger {
        Arc::new(Self)
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        let pid = std::process::id();
        if level == Level::ERROR {
            tracing::error!(pid, "{}", message);
        } else if level == Level::WARN {
            tracing::warn!(pid, "{}", message);
        } else if level == Level::INFO {
            tracing::info!(pid, "{}", message);
        } else if level == Level::DEBUG {
            tracing::debug!(pid, "{}", message);
        } else {
            tracing::trace!(pid, "{}", message);
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl NoopLogger {
    pub fn shared() -> SharedLogger {
        Arc::new(Self)
    }
}

impl Logger for NoopLogger {
    fn log(&self, _level: Level, _message: &str) {}
}

/// Keeps every line in memory. Handy for embedding applications that
/// surface diagnostics themselves, and for tests.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<(Level, String)>>,
}

impl MemoryLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of the recorded lines.
    pub fn lines(&self) -> Vec<(Level, String)> {
        match self.lines.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// True if any recorded message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|(_, line)| line.contains(needle))
    }
}

impl Logger for MemoryLogger {
    fn log(&self, level: Level, message: &str) {
        let mut guard = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push((level, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_logger_records_levels() {
        let logger = MemoryLogger::new();
        logger.info("connected");
        logger.warn("retrying");
        logger.error("gave up");

        let lines = logger.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], (Level::INFO, "connected".to_string()));
        assert_eq!(lines[1].0, Level::WARN);
        assert_eq!(lines[2].0, Level::ERROR);
        assert!(logger.contains("gave"));
        assert!(!logger.contains("missing"));
    }

    #[test]
    fn shared_handles_are_object_safe() {
        let loggers: Vec<SharedLogger> = vec![
            TracingLogger::shared(),
            NoopLogger::shared(),
            MemoryLogger::new(),
        ];
        for logger in loggers {
            logger.debug("no subscriber installed, must not panic");
        }
    }
}
