//! Parent side of the fan-out: forking, dispatch, error collection, reaping.

use crate::worker::WorkerLoop;
use crate::{
    channel_pair, ChannelReceiver, ChannelSender, Dispatcher, FanoutError, FanoutResult,
    SignalContext,
};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, getpid, ForkResult, Pid};
use push_config_and_utils::{ClientConfig, SharedLogger};
use push_connection::{ConnectionResult, Transport};
use push_delivery::{
    DeliveryEngine, DeliverySettings, Message, MessageError, MessagePayload, Notification,
};
use std::time::{Duration, Instant};

/// How long a dropped server keeps writing buffered messages to its workers.
const DROP_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Parent's view of one worker.
#[derive(Debug)]
struct WorkerHandle {
    index: usize,
    pid: Pid,
    /// `None` once the parent has closed the channel.
    ingest: Option<ChannelSender<Message>>,
    failures: ChannelReceiver<Notification>,
    running: bool,
    /// Close the ingest channel once the mailbox and backlog are empty.
    closing: bool,
}

/// Forks a fixed pool of workers and feeds them messages round-robin.
///
/// Drive it by calling [`FanoutServer::run`] from the application loop; it
/// returns `false` once every worker has exited.
pub struct FanoutServer {
    processes: usize,
    settings: DeliverySettings,
    poll_interval: Duration,
    logger: SharedLogger,
    signals: SignalContext,
    parent: Pid,
    dispatcher: Dispatcher<Message>,
    workers: Vec<WorkerHandle>,
    errors: Vec<Notification>,
    started: bool,
}

impl FanoutServer {
    pub fn new(config: &ClientConfig, logger: SharedLogger) -> FanoutResult<Self> {
        Self::with_settings(
            config.processes,
            DeliverySettings::from(config),
            config.poll_interval(),
            logger,
        )
    }

    /// Installs the signal handlers for the whole process.
    pub fn with_settings(
        processes: usize,
        settings: DeliverySettings,
        poll_interval: Duration,
        logger: SharedLogger,
    ) -> FanoutResult<Self> {
        if processes == 0 {
            return Err(FanoutError::NoProcesses);
        }
        Ok(Self {
            processes,
            settings,
            poll_interval,
            logger,
            signals: SignalContext::install()?,
            parent: getpid(),
            dispatcher: Dispatcher::new(processes),
            workers: Vec::with_capacity(processes),
            errors: Vec::new(),
            started: false,
        })
    }

    pub fn processes(&self) -> usize {
        self.processes
    }

    pub fn running_processes(&self) -> usize {
        self.workers.iter().filter(|w| w.running).count()
    }

    pub fn worker_pids(&self) -> Vec<Pid> {
        self.workers.iter().map(|w| w.pid).collect()
    }

    // Lifecycle
    // ========================================================================

    /// Fork one worker per configured process.
    ///
    /// `factory` builds each worker's transport in the parent, so a bad
    /// certificate is reported here rather than as a worker exit status. The
    /// worker connects after the fork.
    pub fn start<T, F>(&mut self, mut factory: F) -> FanoutResult<()>
    where
        T: Transport,
        F: FnMut(usize) -> ConnectionResult<T>,
    {
        if self.started {
            return Err(FanoutError::AlreadyStarted);
        }
        self.started = true;

        for index in 0..self.processes {
            let transport = factory(index)?;
            let (ingest_tx, ingest_rx) = channel_pair::<Message>()?;
            let (failures_tx, failures_rx) = channel_pair::<Notification>()?;

            // SAFETY: the child never returns from this match arm. It only
            // runs the worker loop and leaves through `process::exit`.
            match unsafe { fork() }? {
                ForkResult::Child => {
                    drop(ingest_tx);
                    drop(failures_rx);
                    // Siblings' channel ends must not stay open in this child,
                    // or they would never see end-of-stream.
                    self.workers.clear();
                    let code = self.run_worker(index, transport, ingest_rx, failures_tx);
                    std::process::exit(code);
                }
                ForkResult::Parent { child } => {
                    drop(transport);
                    drop(ingest_rx);
                    drop(failures_tx);
                    self.logger.info(&format!("Forked process PID {}", child));
                    self.workers.push(WorkerHandle {
                        index,
                        pid: child,
                        ingest: Some(ingest_tx),
                        failures: failures_rx,
                        running: true,
                        closing: false,
                    });
                }
            }
        }
        Ok(())
    }

    fn run_worker<T: Transport>(
        &self,
        index: usize,
        transport: T,
        ingest: ChannelReceiver<Message>,
        failures: ChannelSender<Notification>,
    ) -> i32 {
        self.signals.reset();
        let engine = DeliveryEngine::new(transport, self.settings.clone(), self.logger.clone());
        let mut worker = WorkerLoop::new(
            index,
            engine,
            ingest,
            failures,
            self.signals.clone(),
            self.parent,
            self.poll_interval,
            self.logger.clone(),
        );

        if let Err(e) = worker.connect() {
            self.logger
                .error(&format!("Worker #{} unable to connect: {}", index, e));
            return 1;
        }
        match worker.run() {
            Ok(exit) => {
                self.logger
                    .info(&format!("Worker #{} stopped: {:?}", index, exit));
                0
            }
            Err(e) => {
                self.logger.error(&format!("Worker #{} failed: {}", index, e));
                1
            }
        }
    }

    /// Ask every running worker to stop with SIGTERM.
    pub fn stop(&mut self) -> FanoutResult<()> {
        for worker in self.workers.iter().filter(|w| w.running) {
            match kill(worker.pid, Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Close every ingest channel once its queued messages are handed out.
    /// Workers send what they have and exit on their own; keep calling
    /// [`Self::run`] or [`Self::wait`] to finish the hand-out and collect
    /// their failures.
    pub fn close(&mut self) {
        for worker in &mut self.workers {
            worker.closing = true;
        }
        self.flush_mailboxes();
    }

    /// Reap until every worker has exited or `timeout` passes. Returns true
    /// if none are left running.
    pub fn wait(&mut self, timeout: Duration) -> FanoutResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            self.reap();
            self.flush_mailboxes();
            self.collect_errors()?;
            if self.running_processes() == 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    // Parent loop
    // ========================================================================

    /// Queue a message for the next worker in rotation. Returns the worker
    /// index.
    ///
    /// A message the workers could never enqueue (no recipients, payload that
    /// does not encode) is rejected here instead of being lost in a worker.
    pub fn add(&mut self, message: Message) -> FanoutResult<usize> {
        if message.recipient_count() == 0 {
            return Err(MessageError::NoRecipients.into());
        }
        message.payload_bytes()?;
        Ok(self.dispatcher.add(message))
    }

    /// One pass of the parent loop: handle signals, hand mailboxes to the
    /// workers, collect their failures. Returns whether any worker is running.
    pub fn run(&mut self) -> FanoutResult<bool> {
        if self.signals.take_child_exited() {
            self.reap();
        }
        if let Some(signal) = self.signals.clear_termination() {
            self.logger.info(&format!("Ignored signal {}", signal));
        }

        self.flush_mailboxes();
        self.collect_errors()?;
        Ok(self.running_processes() > 0)
    }

    /// Messages added but not yet handed to a worker.
    pub fn queue(&self) -> Vec<Message> {
        self.dispatcher.iter().cloned().collect()
    }

    pub fn take_queue(&mut self) -> Vec<Message> {
        self.dispatcher.take_all()
    }

    pub fn pending_for(&self, index: usize) -> &[Message] {
        self.dispatcher.pending(index)
    }

    /// Failed notifications reported by the workers so far.
    pub fn errors(&mut self) -> FanoutResult<Vec<Notification>> {
        self.collect_errors()?;
        Ok(self.errors.clone())
    }

    pub fn take_errors(&mut self) -> FanoutResult<Vec<Notification>> {
        self.collect_errors()?;
        Ok(std::mem::take(&mut self.errors))
    }

    /// Move queued messages into the ingest channels without blocking. What a
    /// channel cannot take yet stays queued for the next pass.
    fn flush_mailboxes(&mut self) {
        for worker in self.workers.iter_mut().filter(|w| w.running) {
            let Some(ingest) = worker.ingest.as_mut() else {
                continue;
            };
            let done = match hand_out(ingest, &mut self.dispatcher, worker.index) {
                Ok(()) => ingest.is_flushed() && self.dispatcher.pending(worker.index).is_empty(),
                Err(e) => {
                    self.logger.warn(&format!(
                        "Unable to hand messages to process PID {}: {}",
                        worker.pid, e
                    ));
                    true
                }
            };
            if worker.closing && done {
                worker.ingest = None;
            }
        }
    }

    fn collect_errors(&mut self) -> FanoutResult<()> {
        for worker in &mut self.workers {
            let drained = worker.failures.drain()?;
            self.errors.extend(drained.items);
        }
        Ok(())
    }

    fn reap(&mut self) {
        for worker in self.workers.iter_mut().filter(|w| w.running) {
            match waitpid(worker.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    worker.running = false;
                    self.logger.info(&format!(
                        "Child process {} exited with status {}.",
                        pid, code
                    ));
                }
                Ok(WaitStatus::Signaled(pid, signal, _)) => {
                    worker.running = false;
                    self.logger.info(&format!(
                        "Child process {} terminated by {}.",
                        pid, signal
                    ));
                }
                Ok(_) => {}
                Err(Errno::ECHILD) => worker.running = false,
                Err(e) => self.logger.warn(&format!(
                    "Unable to wait for process PID {}: {}",
                    worker.pid, e
                )),
            }
        }
    }
}

impl Drop for FanoutServer {
    fn drop(&mut self) {
        if getpid() != self.parent || self.workers.is_empty() {
            return;
        }
        let running = self.running_processes();
        if running > 0 {
            self.logger.info(&format!(
                "Closing channels of {} running worker(s).",
                running
            ));
        }
        for worker in self.workers.iter_mut().filter(|w| w.running) {
            let Some(ingest) = worker.ingest.as_mut() else {
                continue;
            };
            match ingest.flush_for(DROP_FLUSH_TIMEOUT) {
                Ok(true) => {}
                Ok(false) => self.logger.warn(&format!(
                    "Dropping {} unsent bytes for process PID {}",
                    ingest.backlog_len(),
                    worker.pid
                )),
                Err(e) => self.logger.warn(&format!(
                    "Unable to hand messages to process PID {}: {}",
                    worker.pid, e
                )),
            }
        }
        // Workers see end-of-stream, finish their queue and exit.
        self.workers.clear();
    }
}

/// Send `index`'s mailbox down its channel, one message at a time, until the
/// socket stops accepting. At most one message sits in the channel backlog;
/// the rest go back to the mailbox in order.
fn hand_out(
    ingest: &mut ChannelSender<Message>,
    dispatcher: &mut Dispatcher<Message>,
    index: usize,
) -> FanoutResult<()> {
    if !ingest.flush()? {
        return Ok(());
    }
    let mut pending = dispatcher.take(index).into_iter();
    while let Some(message) = pending.next() {
        if let Err(e) = ingest.send(&message) {
            let mut unsent = vec![message];
            unsent.extend(pending);
            dispatcher.restore(index, unsent);
            return Err(e);
        }
        if !ingest.is_flushed() {
            dispatcher.restore(index, pending.collect());
            return Ok(());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use push_config_and_utils::NoopLogger;
    use push_wire::DeviceToken;

    fn server(processes: usize) -> FanoutResult<FanoutServer> {
        FanoutServer::with_settings(
            processes,
            DeliverySettings::default(),
            Duration::from_millis(5),
            NoopLogger::shared(),
        )
    }

    fn message(n: u8) -> Message {
        let mut message = Message::new().with_text(format!("message {}", n));
        message.recipients.push(DeviceToken::from_bytes([n; 32]));
        message
    }

    #[test]
    fn test_zero_processes_rejected() {
        assert!(matches!(server(0), Err(FanoutError::NoProcesses)));
    }

    #[test]
    fn test_add_before_start_fills_mailboxes() {
        let mut server = server(3).unwrap();
        let assigned: Vec<usize> = (1..=6).map(|n| server.add(message(n)).unwrap()).collect();
        assert_eq!(assigned, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(server.queue().len(), 6);
        assert_eq!(server.pending_for(1), &[message(2), message(5)]);

        // No workers yet: run() keeps everything queued and reports none running.
        assert!(!server.run().unwrap());
        assert_eq!(server.queue().len(), 6);
        assert_eq!(server.take_queue().len(), 6);
        assert!(server.queue().is_empty());
        assert!(server.errors().unwrap().is_empty());
        assert!(server.worker_pids().is_empty());
    }

    #[test]
    fn test_add_rejects_message_without_recipients() {
        let mut server = server(2).unwrap();
        let err = server.add(Message::new().with_text("nobody")).unwrap_err();
        assert!(matches!(
            err,
            FanoutError::Message(MessageError::NoRecipients)
        ));
        assert!(server.queue().is_empty());

        assert_eq!(server.add(message(1)).unwrap(), 0);
        assert_eq!(server.queue(), vec![message(1)]);
    }

    #[test]
    fn test_hand_out_stops_when_channel_backs_up() {
        let (mut tx, mut rx) = channel_pair::<Message>().unwrap();
        let mut dispatcher = Dispatcher::new(1);
        let large = "z".repeat(1800);
        for n in 0..500u32 {
            let mut message = Message::new().with_text(large.clone()).with_badge(n);
            message.recipients.push(DeviceToken::from_bytes([1; 32]));
            dispatcher.add(message);
        }

        hand_out(&mut tx, &mut dispatcher, 0).unwrap();
        let queued = dispatcher.len();
        assert!(queued > 0 && queued < 500);
        assert_eq!(dispatcher.pending(0)[0].badge, Some((500 - queued) as u32));

        let mut received = Vec::new();
        while received.len() < 500 {
            hand_out(&mut tx, &mut dispatcher, 0).unwrap();
            received.extend(rx.drain().unwrap().items);
        }
        assert!(dispatcher.is_empty());
        let badges: Vec<u32> = received.iter().filter_map(|m| m.badge).collect();
        assert_eq!(badges, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn test_run_logs_and_clears_termination_signal() {
        let mut server = server(1).unwrap();
        server.signals.cancel(signal_hook::consts::SIGINT);
        server.run().unwrap();
        assert_eq!(server.signals.termination(), None);
    }
}
