//! Pipelined send loop and error reconciliation.

use crate::{DeliveryError, DeliveryResult, MessageError, MessagePayload};
use push_config_and_utils::{ClientConfig, SharedLogger};
use push_connection::Transport;
use push_wire::{
    DeviceToken, ErrorResponse, FailureClass, NotificationFrame, Priority, ERROR_RESPONSE_SIZE,
    EXPIRY_DO_NOT_STORE, MAX_PAYLOAD_LEN,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

/// Engine tuning, usually taken from [`ClientConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Errors a notification may collect before it is given up on.
    pub send_retry_times: u32,
    /// Pause after every write.
    pub write_interval: Duration,
    /// How long the end-of-run check waits for a late error frame.
    pub socket_select_timeout: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for DeliverySettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            send_retry_times: config.send_retry_times,
            write_interval: config.write_interval(),
            socket_select_timeout: config.socket_select_timeout(),
        }
    }
}

/// One queued notification for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub sequence_id: u32,
    pub device_token: DeviceToken,
    pub payload: Vec<u8>,
    /// Absolute expiry in epoch seconds, or 0 for "do not store".
    pub expiry: u32,
    pub priority: Priority,
    pub custom_identifier: Option<String>,
    /// Errors observed for this notification, oldest first.
    pub errors: Vec<ErrorResponse>,
}

impl Notification {
    pub fn frame(&self) -> NotificationFrame {
        NotificationFrame {
            token: self.device_token,
            payload: self.payload.clone(),
            sequence_id: self.sequence_id,
            expiry: self.expiry,
            priority: self.priority,
        }
    }

    pub fn last_error(&self) -> Option<&ErrorResponse> {
        self.errors.last()
    }

    fn label(&self) -> String {
        format!(
            "Message ID {} [custom identifier: {}]",
            self.sequence_id,
            self.custom_identifier.as_deref().unwrap_or("unset")
        )
    }

    /// First recorded error that decides the notification's fate outright.
    fn settling_error(&self) -> Option<&ErrorResponse> {
        self.errors
            .iter()
            .find(|e| e.class() != FailureClass::Transient)
    }
}

/// Outcome counters of one `send()` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendSummary {
    pub runs: u32,
    pub delivered: usize,
    pub failed: usize,
    pub pending: usize,
}

/// Owns the notification queue and the container of failed notifications,
/// and drives them over a [`Transport`].
pub struct DeliveryEngine<T: Transport> {
    transport: T,
    settings: DeliverySettings,
    queue: BTreeMap<u32, Notification>,
    errors: Vec<Notification>,
    next_sequence_id: u32,
    logger: SharedLogger,
}

impl<T: Transport> DeliveryEngine<T> {
    pub fn new(transport: T, settings: DeliverySettings, logger: SharedLogger) -> Self {
        Self {
            transport,
            settings,
            queue: BTreeMap::new(),
            errors: Vec::new(),
            next_sequence_id: 1,
            logger,
        }
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn connect(&mut self) -> DeliveryResult<()> {
        self.transport.connect()?;
        Ok(())
    }

    pub fn disconnect(&mut self) -> bool {
        self.transport.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    // ========================================================================
    // Queue
    // ========================================================================

    /// Queue one notification per recipient. Returns the assigned sequence
    /// ids in recipient order.
    pub fn enqueue<M: MessagePayload + ?Sized>(&mut self, message: &M) -> DeliveryResult<Vec<u32>> {
        let count = message.recipient_count();
        if count == 0 {
            return Err(MessageError::NoRecipients.into());
        }

        let payload = message.payload_bytes()?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(MessageError::PayloadTooLong {
                size: payload.len(),
                max: MAX_PAYLOAD_LEN,
            }
            .into());
        }
        let expiry = absolute_expiry(message.expiry_seconds());

        let mut tokens = Vec::with_capacity(count);
        for index in 0..count {
            let token = message
                .recipient_at(index)
                .copied()
                .ok_or(MessageError::NoRecipients)?;
            tokens.push(token);
        }

        let mut ids = Vec::with_capacity(count);
        for device_token in tokens {
            let sequence_id = self.allocate_sequence_id();

            self.queue.insert(
                sequence_id,
                Notification {
                    sequence_id,
                    device_token,
                    payload: payload.clone(),
                    expiry,
                    priority: message.priority(),
                    custom_identifier: message.custom_identifier().map(str::to_string),
                    errors: Vec::new(),
                },
            );
            ids.push(sequence_id);
        }
        Ok(ids)
    }

    /// Snapshot of the queue in sequence order.
    pub fn queue(&self) -> Vec<Notification> {
        self.queue.values().cloned().collect()
    }

    /// Drain the queue.
    pub fn take_queue(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.queue).into_values().collect()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Notifications that failed for good, in the order they were given up.
    pub fn errors(&self) -> &[Notification] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.errors)
    }

    // ========================================================================
    // Send
    // ========================================================================

    /// Send every queued notification.
    ///
    /// Runs repeat until the queue is empty. Individual failures are not
    /// returned here; they end up in [`Self::errors`].
    pub fn send(&mut self) -> DeliveryResult<SendSummary> {
        if !self.transport.is_connected() {
            return Err(DeliveryError::NotConnected);
        }
        if self.queue.is_empty() {
            return Err(DeliveryError::EmptyQueue);
        }

        let mut summary = SendSummary::default();
        while !self.queue.is_empty() {
            summary.runs += 1;
            self.logger.info(&format!(
                "Sending messages queue, run #{}: {} message(s) left in queue.",
                summary.runs,
                self.queue.len()
            ));

            let mut error_observed = false;
            let ids: Vec<u32> = self.queue.keys().copied().collect();
            for id in ids {
                let Some(notification) = self.queue.get(&id) else {
                    continue;
                };

                if let Some(settled) = notification.settling_error() {
                    let status = settled.status_code;
                    match settled.class() {
                        FailureClass::Success => {
                            self.logger.debug(&format!(
                                "{} has no error ({}), removing from queue...",
                                notification.label(),
                                status.0
                            ));
                            self.queue.remove(&id);
                            summary.delivered += 1;
                        }
                        _ => {
                            self.logger.warn(&format!(
                                "{} has an unrecoverable error ({}), removing from queue without retrying...",
                                notification.label(),
                                status.0
                            ));
                            self.fail(id);
                            summary.failed += 1;
                        }
                    }
                    continue;
                }

                let attempts = notification.errors.len();
                if attempts >= self.settings.send_retry_times as usize {
                    self.logger.warn(&format!(
                        "{} has {} errors, removing from queue...",
                        notification.label(),
                        attempts
                    ));
                    self.fail(id);
                    summary.failed += 1;
                    continue;
                }

                let bytes = notification.frame().encode()?;
                self.logger.debug(&format!(
                    "Sending {} ({}/{}): {} bytes.",
                    notification.label(),
                    attempts + 1,
                    self.settings.send_retry_times,
                    bytes.len()
                ));

                let candidate = match self.transport.write(&bytes) {
                    Ok(written) if written == bytes.len() => None,
                    Ok(written) => Some(ErrorResponse::internal(id, written, bytes.len())),
                    Err(e) => {
                        self.logger
                            .warn(&format!("Write of message ID {} failed: {}", id, e));
                        Some(ErrorResponse::internal(id, 0, bytes.len()))
                    }
                };

                if !self.settings.write_interval.is_zero() {
                    std::thread::sleep(self.settings.write_interval);
                }

                if self.update_queue(candidate, Duration::ZERO, &mut summary)? {
                    error_observed = true;
                    break;
                }
            }

            if !error_observed && !self.queue.is_empty() {
                let wait = self.settings.socket_select_timeout;
                if !self.update_queue(None, wait, &mut summary)? {
                    summary.delivered += self.queue.len();
                    self.queue.clear();
                }
            }
        }

        summary.pending = self.queue.len();
        self.logger.info(&format!(
            "Queue sent in {} run(s): {} delivered, {} failed.",
            summary.runs, summary.delivered, summary.failed
        ));
        Ok(summary)
    }

    /// Reconcile the queue against an observed error.
    ///
    /// Returns `false` when neither `candidate` nor an error frame on the
    /// stream exists. Otherwise the earlier of the two wins (the stream
    /// error on a tie), everything queued before it counts as delivered, it
    /// is recorded on its own notification, and the connection is
    /// re-established.
    fn update_queue(
        &mut self,
        candidate: Option<ErrorResponse>,
        wait: Duration,
        summary: &mut SendSummary,
    ) -> DeliveryResult<bool> {
        let stream_error = self.read_stream_error(wait);
        let error = match (candidate, stream_error) {
            (None, None) => return Ok(false),
            (Some(local), Some(remote)) => {
                if local.sequence_id < remote.sequence_id {
                    local
                } else {
                    remote
                }
            }
            (Some(local), None) => local,
            (None, Some(remote)) => remote,
        };

        self.logger.error(&format!(
            "Unable to send message ID {}: {} ({}).",
            error.sequence_id, error.status_message, error.status_code.0
        ));
        self.transport.disconnect();

        let remaining = self.queue.split_off(&error.sequence_id);
        summary.delivered += self.queue.len();
        self.queue = remaining;
        if let Some(notification) = self.queue.get_mut(&error.sequence_id) {
            notification.errors.push(error);
        }

        self.transport.connect()?;
        Ok(true)
    }

    /// Error frame waiting on the stream, if any. Short, foreign or
    /// unreadable frames count as no error.
    fn read_stream_error(&mut self, wait: Duration) -> Option<ErrorResponse> {
        match self.transport.poll_readable(wait) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                self.logger
                    .warn(&format!("Unable to poll for error frames: {}", e));
                return None;
            }
        }

        let mut buf = [0u8; ERROR_RESPONSE_SIZE];
        match self.transport.read(&mut buf) {
            Ok(0) => {
                self.logger.debug("Gateway closed the connection without an error frame.");
                None
            }
            Ok(n) => ErrorResponse::decode(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                self.logger
                    .warn(&format!("Unable to read error frame: {}", e));
                None
            }
        }
    }

    /// Next free id. Wraps to 1 after `u32::MAX` and skips ids still queued,
    /// so a wrapped counter never overwrites a pending notification.
    fn allocate_sequence_id(&mut self) -> u32 {
        loop {
            let id = self.next_sequence_id;
            self.next_sequence_id = id.checked_add(1).unwrap_or(1);
            if !self.queue.contains_key(&id) {
                return id;
            }
        }
    }

    fn fail(&mut self, id: u32) {
        if let Some(notification) = self.queue.remove(&id) {
            self.errors.push(notification);
        }
    }
}

fn absolute_expiry(seconds: u32) -> u32 {
    if seconds == EXPIRY_DO_NOT_STORE {
        return EXPIRY_DO_NOT_STORE;
    }
    let now = chrono::Utc::now().timestamp();
    u32::try_from(now.saturating_add(i64::from(seconds))).unwrap_or(u32::MAX)
}
