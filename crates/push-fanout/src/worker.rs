//! The loop each forked worker runs.

use crate::{ChannelReceiver, ChannelSender, FanoutResult, SignalContext};
use nix::unistd::{getppid, Pid};
use push_config_and_utils::SharedLogger;
use push_connection::Transport;
use push_delivery::{DeliveryEngine, Message, Notification};
use std::time::Duration;

/// How long a stopping worker keeps trying to hand its last failures over.
const FINAL_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a worker loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The parent process went away.
    Orphaned,
    /// A termination signal arrived.
    Cancelled(i32),
    /// The parent closed the ingest channel and everything was sent.
    ParentClosed,
}

/// Pulls messages from the parent, sends them, and reports failures back.
pub struct WorkerLoop<T: Transport> {
    index: usize,
    engine: DeliveryEngine<T>,
    ingest: ChannelReceiver<Message>,
    failures: ChannelSender<Notification>,
    signals: SignalContext,
    parent: Pid,
    poll_interval: Duration,
    logger: SharedLogger,
}

impl<T: Transport> WorkerLoop<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        engine: DeliveryEngine<T>,
        ingest: ChannelReceiver<Message>,
        failures: ChannelSender<Notification>,
        signals: SignalContext,
        parent: Pid,
        poll_interval: Duration,
        logger: SharedLogger,
    ) -> Self {
        Self {
            index,
            engine,
            ingest,
            failures,
            signals,
            parent,
            poll_interval,
            logger,
        }
    }

    pub fn engine(&self) -> &DeliveryEngine<T> {
        &self.engine
    }

    pub fn connect(&mut self) -> FanoutResult<()> {
        self.engine.connect()?;
        Ok(())
    }

    /// One iteration. Returns `Some` when the loop should stop.
    pub fn tick(&mut self) -> FanoutResult<Option<WorkerExit>> {
        if let Some(signal) = self.signals.termination() {
            self.logger.info(&format!(
                "Worker #{} received signal {}, exiting...",
                self.index, signal
            ));
            return Ok(Some(WorkerExit::Cancelled(signal)));
        }

        if getppid() != self.parent {
            self.logger.error(&format!(
                "Parent process {} died unexpectedly, exiting...",
                self.parent
            ));
            return Ok(Some(WorkerExit::Orphaned));
        }

        self.forward_failures()?;

        let drained = self.ingest.drain()?;
        let mut enqueued = 0;
        for message in &drained.items {
            match self.engine.enqueue(message) {
                Ok(ids) => enqueued += ids.len(),
                Err(e) => self
                    .logger
                    .warn(&format!("Worker #{} dropped a message: {}", self.index, e)),
            }
        }

        if enqueued > 0 {
            self.engine.send()?;
            return Ok(None);
        }

        if drained.closed {
            self.forward_failures()?;
            return Ok(Some(WorkerExit::ParentClosed));
        }

        std::thread::sleep(self.poll_interval);
        Ok(None)
    }

    /// Tick until an exit condition or an error, then report the failures
    /// still held and disconnect.
    ///
    /// Failures recorded before a fatal error (a reconnect that gave up, for
    /// instance) still reach the parent before the error is returned.
    pub fn run(mut self) -> FanoutResult<WorkerExit> {
        let outcome = loop {
            match self.tick() {
                Ok(Some(exit)) => break Ok(exit),
                Ok(None) => {}
                Err(e) => break Err(e),
            }
        };

        if !matches!(outcome, Ok(WorkerExit::Orphaned)) {
            self.report_remaining();
        }
        self.engine.disconnect();
        outcome
    }

    /// Queue every recorded failure for the parent and push out what fits.
    /// Never blocks, so a parent that is busy writing to us cannot stall
    /// the loop.
    fn forward_failures(&mut self) -> FanoutResult<()> {
        for notification in self.engine.take_errors() {
            self.failures.send(&notification)?;
        }
        self.failures.flush()?;
        Ok(())
    }

    /// Best effort: the parent may already be gone.
    fn report_remaining(&mut self) {
        let flushed = self
            .forward_failures()
            .and_then(|()| self.failures.flush_for(FINAL_FLUSH_TIMEOUT));
        match flushed {
            Ok(true) => {}
            Ok(false) => self.logger.warn(&format!(
                "Worker #{} gave up reporting {} bytes of errors",
                self.index,
                self.failures.backlog_len()
            )),
            Err(e) => self
                .logger
                .warn(&format!("Unable to report final errors: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_pair;
    use push_config_and_utils::NoopLogger;
    use push_connection::mock::MockTransport;
    use push_delivery::DeliverySettings;
    use push_wire::StatusCode;
    use signal_hook::consts::SIGTERM;

    const TOKEN: &str = "2222222222222222222222222222222222222222222222222222222222222222";

    struct Harness {
        worker: WorkerLoop<MockTransport>,
        mock: MockTransport,
        ingest: ChannelSender<Message>,
        failures: ChannelReceiver<Notification>,
        signals: SignalContext,
    }

    fn harness(parent: Pid) -> Harness {
        let mock = MockTransport::connected();
        let settings = DeliverySettings {
            write_interval: Duration::ZERO,
            socket_select_timeout: Duration::ZERO,
            ..DeliverySettings::default()
        };
        let engine = DeliveryEngine::new(mock.clone(), settings, NoopLogger::shared());
        let (ingest_tx, ingest_rx) = channel_pair().unwrap();
        let (failures_tx, failures_rx) = channel_pair().unwrap();
        let signals = SignalContext::detached();
        let worker = WorkerLoop::new(
            0,
            engine,
            ingest_rx,
            failures_tx,
            signals.clone(),
            parent,
            Duration::from_millis(1),
            NoopLogger::shared(),
        );
        Harness {
            worker,
            mock,
            ingest: ingest_tx,
            failures: failures_rx,
            signals,
        }
    }

    fn message(text: &str) -> Message {
        let mut message = Message::new().with_text(text);
        message.add_recipient(TOKEN).unwrap();
        message
    }

    #[test]
    fn test_idle_tick_continues() {
        let mut h = harness(getppid());
        assert_eq!(h.worker.tick().unwrap(), None);
        assert!(h.mock.written_sequence_ids().is_empty());
    }

    #[test]
    fn test_ingested_messages_are_sent() {
        let mut h = harness(getppid());
        h.ingest.send(&message("one")).unwrap();
        h.ingest.send(&message("two")).unwrap();

        assert_eq!(h.worker.tick().unwrap(), None);
        assert_eq!(h.mock.written_sequence_ids(), vec![1, 2]);
        assert_eq!(h.worker.engine().queue_len(), 0);
    }

    #[test]
    fn test_failures_reported_on_next_tick() {
        let mut h = harness(getppid());
        h.mock.reject(1, 8);
        h.ingest.send(&message("bad token")).unwrap();

        h.worker.tick().unwrap();
        assert!(h.failures.drain().unwrap().items.is_empty());

        h.worker.tick().unwrap();
        let failed = h.failures.drain().unwrap().items;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].sequence_id, 1);
        assert_eq!(
            failed[0].last_error().map(|e| e.status_code),
            Some(StatusCode::INVALID_TOKEN)
        );
    }

    #[test]
    fn test_cancelled_by_signal() {
        let mut h = harness(getppid());
        h.signals.cancel(SIGTERM);
        assert_eq!(h.worker.tick().unwrap(), Some(WorkerExit::Cancelled(SIGTERM)));
    }

    #[test]
    fn test_orphaned_when_parent_changes() {
        let stranger = Pid::from_raw(getppid().as_raw() + 1);
        let mut h = harness(stranger);
        assert_eq!(h.worker.tick().unwrap(), Some(WorkerExit::Orphaned));
    }

    #[test]
    fn test_parent_closed_after_final_batch() {
        let h = harness(getppid());
        let Harness {
            worker,
            mock,
            mut ingest,
            mut failures,
            ..
        } = h;
        mock.reject(2, 8);
        ingest.send(&message("a")).unwrap();
        ingest.send(&message("b")).unwrap();
        drop(ingest);

        assert_eq!(worker.run().unwrap(), WorkerExit::ParentClosed);

        let failed = failures.drain().unwrap();
        assert_eq!(failed.items.len(), 1);
        assert_eq!(failed.items[0].sequence_id, 2);
        assert!(failed.closed);
        assert!(mock.disconnect_calls() >= 1);
    }

    #[test]
    fn test_reconnect_failure_stops_worker() {
        let mut h = harness(getppid());
        h.mock.reject(1, 1).fail_next_connects(5);
        h.ingest.send(&message("x")).unwrap();
        assert!(h.worker.tick().is_err());
    }

    #[test]
    fn test_failures_before_fatal_error_reach_parent() {
        let Harness {
            worker,
            mock,
            mut ingest,
            mut failures,
            ..
        } = harness(getppid());
        // Token rejection reconnects fine; the processing error after it
        // needs a second reconnect, which never succeeds.
        mock.reject(1, 8).reject(2, 1).fail_connects_after(1, 5);
        let mut two = message("two recipients");
        two.add_recipient(&"3".repeat(64)).unwrap();
        ingest.send(&two).unwrap();

        assert!(worker.run().is_err());

        let reported = failures.drain().unwrap();
        assert_eq!(reported.items.len(), 1);
        assert_eq!(reported.items[0].sequence_id, 1);
        assert_eq!(
            reported.items[0].last_error().map(|e| e.status_code),
            Some(StatusCode::INVALID_TOKEN)
        );
        assert!(reported.closed);
        assert!(mock.disconnect_calls() >= 1);
    }

    #[test]
    fn test_failure_backlog_does_not_block_ingest() {
        const COUNT: u32 = 3000;
        let mut h = harness(getppid());
        for id in 1..=COUNT {
            h.mock.reject(id, 8);
        }

        // Nobody reads the failure channel while the messages go in.
        let mut sent = 0;
        while h.mock.written_sequence_ids().len() < COUNT as usize {
            while sent < COUNT && h.ingest.is_flushed() {
                sent += 1;
                h.ingest.send(&message(&format!("m{}", sent))).unwrap();
            }
            h.ingest.flush().unwrap();
            h.worker.tick().unwrap();
        }

        let mut reported = Vec::new();
        while reported.len() < COUNT as usize {
            h.worker.tick().unwrap();
            reported.extend(h.failures.drain().unwrap().items);
        }
        let ids: Vec<u32> = reported.iter().map(|n| n.sequence_id).collect();
        assert_eq!(ids, (1..=COUNT).collect::<Vec<_>>());
    }
}
