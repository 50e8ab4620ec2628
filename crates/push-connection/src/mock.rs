//! Scripted in-memory transport.
//!
//! Behaves like the gateway as far as the delivery engine and the feedback
//! reader can tell: frames written to it are decoded and accepted, unless a
//! rejection is scripted for their sequence id, in which case an error frame
//! becomes readable (optionally only after more writes) and every later
//! frame on the same connection is silently dropped, as the real gateway
//! does once it has decided to close the connection.
//!
//! Clones share state, so a test keeps one handle and moves the other into
//! the component under test.

use crate::{ConnectionError, ConnectionResult, Transport};
use push_wire::{ErrorResponse, NotificationFrame, StatusCode, ERROR_RESPONSE_SIZE};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Rejection {
    status: u8,
    after_writes: usize,
    after_polls: usize,
    repeat: bool,
}

#[derive(Debug)]
struct PendingError {
    remaining_writes: usize,
    remaining_polls: usize,
    frame: [u8; ERROR_RESPONSE_SIZE],
}

impl PendingError {
    fn ready(&self) -> bool {
        self.remaining_writes == 0 && self.remaining_polls == 0
    }
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    connect_calls: usize,
    disconnect_calls: usize,
    fail_connects: usize,
    connect_grace: usize,
    written: Vec<NotificationFrame>,
    accepted: Vec<u32>,
    dropped: Vec<u32>,
    rejections: HashMap<u32, Rejection>,
    short_writes: HashMap<u32, usize>,
    pending_error: Option<PendingError>,
    closing: bool,
    inbound: VecDeque<Vec<u8>>,
    end_of_stream: bool,
    fail_polls: bool,
}

/// In-memory [`Transport`] driven by a script.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start out connected, as if `connect()` had already succeeded.
    pub fn connected() -> Self {
        let mock = Self::new();
        mock.lock().connected = true;
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ========================================================================
    // Script
    // ========================================================================

    /// Reject the next write of `sequence_id` with `status`; the error frame
    /// is readable immediately.
    pub fn reject(&self, sequence_id: u32, status: u8) -> &Self {
        self.reject_after(sequence_id, status, 0)
    }

    /// Reject the next write of `sequence_id`, but only make the error frame
    /// readable after `after_writes` further writes.
    pub fn reject_after(&self, sequence_id: u32, status: u8, after_writes: usize) -> &Self {
        self.lock().rejections.insert(
            sequence_id,
            Rejection {
                status,
                after_writes,
                after_polls: 0,
                repeat: false,
            },
        );
        self
    }

    /// Reject the next write of `sequence_id`, but let the first `polls`
    /// readiness checks miss the error frame, like a slow network would.
    pub fn reject_after_polls(&self, sequence_id: u32, status: u8, polls: usize) -> &Self {
        self.lock().rejections.insert(
            sequence_id,
            Rejection {
                status,
                after_writes: 0,
                after_polls: polls,
                repeat: false,
            },
        );
        self
    }

    /// Reject every write of `sequence_id`.
    pub fn reject_always(&self, sequence_id: u32, status: u8) -> &Self {
        self.lock().rejections.insert(
            sequence_id,
            Rejection {
                status,
                after_writes: 0,
                after_polls: 0,
                repeat: true,
            },
        );
        self
    }

    /// Report only `bytes` written for the next write of `sequence_id`.
    pub fn short_write(&self, sequence_id: u32, bytes: usize) -> &Self {
        self.lock().short_writes.insert(sequence_id, bytes);
        self
    }

    /// Make the next `count` calls to `connect()` fail.
    pub fn fail_next_connects(&self, count: usize) -> &Self {
        self.fail_connects_after(0, count)
    }

    /// Let `successes` more calls to `connect()` succeed, then fail the
    /// following `count`.
    pub fn fail_connects_after(&self, successes: usize, count: usize) -> &Self {
        let mut state = self.lock();
        state.connect_grace = successes;
        state.fail_connects = count;
        drop(state);
        self
    }

    /// Queue a chunk of bytes to be returned by `read()`.
    pub fn push_inbound(&self, bytes: impl Into<Vec<u8>>) -> &Self {
        self.lock().inbound.push_back(bytes.into());
        self
    }

    /// Signal end-of-stream once inbound chunks are exhausted.
    pub fn finish(&self) -> &Self {
        self.lock().end_of_stream = true;
        self
    }

    /// Make every `poll_readable()` fail.
    pub fn fail_polls(&self) -> &Self {
        self.lock().fail_polls = true;
        self
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Sequence ids of every frame written, in order, including rejected
    /// and dropped ones.
    pub fn written_sequence_ids(&self) -> Vec<u32> {
        self.lock().written.iter().map(|f| f.sequence_id).collect()
    }

    pub fn written_frames(&self) -> Vec<NotificationFrame> {
        self.lock().written.clone()
    }

    /// How many times `sequence_id` was written.
    pub fn write_count(&self, sequence_id: u32) -> usize {
        self.lock()
            .written
            .iter()
            .filter(|f| f.sequence_id == sequence_id)
            .count()
    }

    /// Sequence ids the simulated gateway accepted.
    pub fn accepted(&self) -> Vec<u32> {
        self.lock().accepted.clone()
    }

    /// Sequence ids discarded because they followed a rejection on the same
    /// connection.
    pub fn dropped(&self) -> Vec<u32> {
        self.lock().dropped.clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.lock().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.lock().disconnect_calls
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> ConnectionResult<()> {
        let mut state = self.lock();
        state.connect_calls += 1;
        if state.connect_grace > 0 {
            state.connect_grace -= 1;
        } else if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(ConnectionError::RetriesExhausted {
                endpoint: "mock:0".to_string(),
                attempts: 1,
                last_error: "scripted connect failure".to_string(),
            });
        }
        state.connected = true;
        state.closing = false;
        state.pending_error = None;
        Ok(())
    }

    fn disconnect(&mut self) -> bool {
        let mut state = self.lock();
        if !state.connected {
            return false;
        }
        state.connected = false;
        state.disconnect_calls += 1;
        true
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn write(&mut self, frame: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if !state.connected {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "not connected"));
        }

        let decoded = NotificationFrame::decode(frame)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let sequence_id = decoded.sequence_id;
        state.written.push(decoded);

        if let Some(pending) = state.pending_error.as_mut() {
            pending.remaining_writes = pending.remaining_writes.saturating_sub(1);
        }

        if let Some(bytes) = state.short_writes.remove(&sequence_id) {
            return Ok(bytes.min(frame.len()));
        }

        if state.closing {
            state.dropped.push(sequence_id);
            return Ok(frame.len());
        }

        let rejection = state.rejections.get(&sequence_id).cloned();
        match rejection {
            Some(rejection) => {
                if !rejection.repeat {
                    state.rejections.remove(&sequence_id);
                }
                let error = ErrorResponse::new(StatusCode(u16::from(rejection.status)), sequence_id);
                let frame_bytes = error
                    .encode()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
                state.closing = true;
                state.pending_error = Some(PendingError {
                    remaining_writes: rejection.after_writes,
                    remaining_polls: rejection.after_polls,
                    frame: frame_bytes,
                });
            }
            None => state.accepted.push(sequence_id),
        }
        Ok(frame.len())
    }

    fn poll_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        let mut state = self.lock();
        if state.fail_polls {
            return Err(io::Error::other("scripted poll failure"));
        }
        let mut error_ready = false;
        if let Some(pending) = state.pending_error.as_mut() {
            if pending.remaining_writes == 0 && pending.remaining_polls > 0 {
                pending.remaining_polls -= 1;
            } else {
                error_ready = pending.ready();
            }
        }
        Ok(error_ready || !state.inbound.is_empty() || state.end_of_stream)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();

        if state.pending_error.as_ref().is_some_and(PendingError::ready) {
            if let Some(pending) = state.pending_error.take() {
                let n = buf.len().min(ERROR_RESPONSE_SIZE);
                buf[..n].copy_from_slice(&pending.frame[..n]);
                return Ok(n);
            }
        }

        if let Some(mut chunk) = state.inbound.pop_front() {
            let n = buf.len().min(chunk.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                let rest = chunk.split_off(n);
                state.inbound.push_front(rest);
            }
            return Ok(n);
        }

        if state.end_of_stream {
            return Ok(0);
        }
        Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use push_wire::{DeviceToken, Priority};

    fn frame(sequence_id: u32) -> Vec<u8> {
        NotificationFrame {
            token: DeviceToken::from_bytes([1; 32]),
            payload: b"{}".to_vec(),
            sequence_id,
            expiry: 0,
            priority: Priority::Immediate,
        }
        .encode()
        .unwrap()
    }

    #[test]
    fn test_rejection_poisons_rest_of_connection() {
        let mut mock = MockTransport::connected();
        mock.reject(2, 8);

        for id in 1..=3 {
            assert_eq!(mock.write(&frame(id)).unwrap(), frame(id).len());
        }
        assert_eq!(mock.accepted(), vec![1]);
        assert_eq!(mock.dropped(), vec![3]);

        assert!(mock.poll_readable(Duration::ZERO).unwrap());
        let mut buf = [0u8; ERROR_RESPONSE_SIZE];
        assert_eq!(mock.read(&mut buf).unwrap(), ERROR_RESPONSE_SIZE);
        assert_eq!(buf, [8, 8, 0, 0, 0, 2]);

        mock.connect().unwrap();
        mock.write(&frame(3)).unwrap();
        assert_eq!(mock.accepted(), vec![1, 3]);
    }

    #[test]
    fn test_delayed_error_becomes_readable_later() {
        let mut mock = MockTransport::connected();
        mock.reject_after(1, 1, 2);

        mock.write(&frame(1)).unwrap();
        assert!(!mock.poll_readable(Duration::ZERO).unwrap());
        mock.write(&frame(2)).unwrap();
        assert!(!mock.poll_readable(Duration::ZERO).unwrap());
        mock.write(&frame(3)).unwrap();
        assert!(mock.poll_readable(Duration::ZERO).unwrap());
    }

    #[test]
    fn test_inbound_chunks_then_eof() {
        let mut mock = MockTransport::connected();
        mock.push_inbound(vec![1, 2, 3, 4, 5]).finish();

        let mut buf = [0u8; 3];
        assert_eq!(mock.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(mock.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(mock.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_connect_failures_and_disconnect() {
        let mut mock = MockTransport::new();
        mock.fail_next_connects(1);
        assert!(mock.connect().is_err());
        assert!(!mock.is_connected());
        mock.connect().unwrap();
        assert!(mock.disconnect());
        assert!(!mock.disconnect());
        assert_eq!(mock.connect_calls(), 2);
        assert_eq!(mock.disconnect_calls(), 1);
        assert!(mock.write(&frame(1)).is_err());
    }

    #[test]
    fn test_connect_failures_after_successes() {
        let mut mock = MockTransport::new();
        mock.fail_connects_after(1, 2);
        mock.connect().unwrap();
        assert!(mock.connect().is_err());
        assert!(mock.connect().is_err());
        mock.connect().unwrap();
        assert_eq!(mock.connect_calls(), 4);
    }
}
