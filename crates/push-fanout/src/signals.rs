//! Signal flags shared between the handlers and the polling loops.
//!
//! Handlers never do work themselves. They set an atomic that the parent's
//! `run()` or the worker's tick reads on its next pass. Dispositions and the
//! flag memory are inherited across `fork`, so a worker reads its own copy.

use signal_hook::consts::{SIGCHLD, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::SigId;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Signals treated as a request to stop.
pub const TERMINATION_SIGNALS: [i32; 3] = [SIGTERM, SIGINT, SIGQUIT];

/// Cancellation context for the fan-out server and its workers.
///
/// Handlers registered by [`SignalContext::install`] stay in place until the
/// last clone of the context is dropped.
#[derive(Debug, Clone, Default)]
pub struct SignalContext {
    child_exited: Arc<AtomicBool>,
    termination: Arc<AtomicUsize>,
    registration: Option<Arc<Registration>>,
}

/// Handler ids owned by one installed context.
#[derive(Debug)]
struct Registration(Vec<SigId>);

impl Drop for Registration {
    fn drop(&mut self) {
        for id in self.0.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

impl SignalContext {
    /// Flags with no handlers attached. Useful for driving loops by hand.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Register handlers for SIGCHLD and the termination signals.
    ///
    /// Registering replaces the default action of the termination signals,
    /// so the process keeps running until a loop observes the flag.
    pub fn install() -> io::Result<Self> {
        let mut context = Self::default();
        // Ids already registered are released if a later registration fails.
        let mut registration = Registration(Vec::with_capacity(1 + TERMINATION_SIGNALS.len()));
        registration.0.push(signal_hook::flag::register(
            SIGCHLD,
            Arc::clone(&context.child_exited),
        )?);
        for signal in TERMINATION_SIGNALS {
            registration.0.push(signal_hook::flag::register_usize(
                signal,
                Arc::clone(&context.termination),
                signal as usize,
            )?);
        }
        context.registration = Some(Arc::new(registration));
        Ok(context)
    }

    /// True once per batch of SIGCHLD deliveries.
    pub fn take_child_exited(&self) -> bool {
        self.child_exited.swap(false, Ordering::AcqRel)
    }

    /// The most recent termination signal, if any.
    pub fn termination(&self) -> Option<i32> {
        match self.termination.load(Ordering::Acquire) {
            0 => None,
            signal => Some(signal as i32),
        }
    }

    /// Request cancellation as if `signal` had been delivered.
    pub fn cancel(&self, signal: i32) {
        self.termination.store(signal as usize, Ordering::Release);
    }

    /// Forget any pending signal.
    pub fn reset(&self) {
        self.child_exited.store(false, Ordering::Release);
        self.termination.store(0, Ordering::Release);
    }

    pub fn clear_termination(&self) -> Option<i32> {
        match self.termination.swap(0, Ordering::AcqRel) {
            0 => None,
            signal => Some(signal as i32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_cancel_and_reset() {
        let context = SignalContext::detached();
        assert_eq!(context.termination(), None);

        context.cancel(SIGTERM);
        let clone = context.clone();
        assert_eq!(clone.termination(), Some(SIGTERM));

        context.reset();
        assert_eq!(clone.termination(), None);
        assert!(!clone.take_child_exited());
    }

    #[test]
    fn test_handlers_removed_with_last_context() {
        let context = SignalContext::install().unwrap();
        let flag = Arc::clone(&context.child_exited);
        let clone = context.clone();

        signal_hook::low_level::raise(SIGCHLD).unwrap();
        assert!(context.take_child_exited());
        assert!(!context.take_child_exited());

        // A surviving clone keeps the handlers.
        drop(context);
        signal_hook::low_level::raise(SIGCHLD).unwrap();
        assert!(clone.take_child_exited());

        drop(clone);
        signal_hook::low_level::raise(SIGCHLD).unwrap();
        assert!(!flag.load(Ordering::Acquire));
    }
}
