//! Newline-delimited JSON over a Unix socket pair.
//!
//! One end writes, the other end reads; a channel is never shared between
//! writers. Neither end ever blocks: a sender keeps what the socket will not
//! take yet in a backlog, so two processes writing to each other cannot
//! stall on full buffers.

use crate::FanoutResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Read, Write};
use std::marker::PhantomData;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};
use tracing::warn;

/// Writing end of a channel.
#[derive(Debug)]
pub struct ChannelSender<T> {
    stream: UnixStream,
    backlog: Vec<u8>,
    _marker: PhantomData<fn(T)>,
}

/// Reading end of a channel. Never blocks.
#[derive(Debug)]
pub struct ChannelReceiver<T> {
    stream: UnixStream,
    buffer: Vec<u8>,
    closed: bool,
    _marker: PhantomData<fn() -> T>,
}

/// Result of draining a receiver.
#[derive(Debug)]
pub struct Drained<T> {
    pub items: Vec<T>,
    /// The writing end has gone away; no more items will arrive.
    pub closed: bool,
}

/// Create a connected sender/receiver pair.
pub fn channel_pair<T>() -> io::Result<(ChannelSender<T>, ChannelReceiver<T>)>
where
    T: Serialize + DeserializeOwned,
{
    let (tx, rx) = UnixStream::pair()?;
    Ok((ChannelSender::from_stream(tx)?, ChannelReceiver::from_stream(rx)?))
}

impl<T: Serialize> ChannelSender<T> {
    pub fn from_stream(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            backlog: Vec::new(),
            _marker: PhantomData,
        })
    }

    /// Append one item as a JSON line and write as much of the backlog as
    /// the socket accepts right now.
    pub fn send(&mut self, item: &T) -> FanoutResult<()> {
        let line = serde_json::to_vec(item)?;
        self.backlog.extend_from_slice(&line);
        self.backlog.push(b'\n');
        self.flush()?;
        Ok(())
    }

    /// Write buffered bytes without blocking. Returns true once the backlog
    /// is empty.
    pub fn flush(&mut self) -> FanoutResult<bool> {
        while !self.backlog.is_empty() {
            match self.stream.write(&self.backlog) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.backlog.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    /// Keep flushing until the backlog is gone or `timeout` passes.
    pub fn flush_for(&mut self, timeout: Duration) -> FanoutResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.flush()? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn is_flushed(&self) -> bool {
        self.backlog.is_empty()
    }

    /// Bytes accepted by `send` but not yet written to the socket.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }
}

impl<T: DeserializeOwned> ChannelReceiver<T> {
    pub fn from_stream(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            buffer: Vec::new(),
            closed: false,
            _marker: PhantomData,
        })
    }

    /// Read everything available and decode the complete lines. Lines that
    /// fail to decode are logged and skipped.
    pub fn drain(&mut self) -> FanoutResult<Drained<T>> {
        let mut chunk = [0u8; 8192];
        while !self.closed {
            match self.stream.read(&mut chunk) {
                Ok(0) => self.closed = true,
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => self.closed = true,
                Err(e) => return Err(e.into()),
            }
        }

        let mut items = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice(line) {
                Ok(item) => items.push(item),
                Err(e) => warn!(error = %e, bytes = line.len(), "Skipping malformed channel line"),
            }
        }

        Ok(Drained {
            items,
            closed: self.closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: u32,
        text: String,
    }

    fn item(id: u32) -> Item {
        Item {
            id,
            text: format!("item {}\nwith newline", id),
        }
    }

    #[test]
    fn test_send_and_drain_in_order() {
        let (mut tx, mut rx) = channel_pair::<Item>().unwrap();
        for id in 1..=3 {
            tx.send(&item(id)).unwrap();
        }

        let drained = rx.drain().unwrap();
        assert_eq!(drained.items, vec![item(1), item(2), item(3)]);
        assert!(!drained.closed);

        let drained = rx.drain().unwrap();
        assert!(drained.items.is_empty());
    }

    #[test]
    fn test_partial_line_waits_for_rest() {
        let (mut raw, theirs) = UnixStream::pair().unwrap();
        let mut rx = ChannelReceiver::<Item>::from_stream(theirs).unwrap();
        let line = serde_json::to_string(&item(9)).unwrap();
        let (head, tail) = line.split_at(5);

        raw.write_all(head.as_bytes()).unwrap();
        assert!(rx.drain().unwrap().items.is_empty());

        raw.write_all(tail.as_bytes()).unwrap();
        raw.write_all(b"\n").unwrap();
        assert_eq!(rx.drain().unwrap().items, vec![item(9)]);
    }

    #[test]
    fn test_malformed_line_skipped() {
        let (mut raw, theirs) = UnixStream::pair().unwrap();
        let mut rx = ChannelReceiver::<Item>::from_stream(theirs).unwrap();
        raw.write_all(b"{not json}\n\n").unwrap();
        raw.write_all(format!("{}\n", serde_json::to_string(&item(2)).unwrap()).as_bytes())
            .unwrap();
        assert_eq!(rx.drain().unwrap().items, vec![item(2)]);
    }

    #[test]
    fn test_closed_after_sender_dropped() {
        let (mut tx, mut rx) = channel_pair::<Item>().unwrap();
        tx.send(&item(1)).unwrap();
        drop(tx);

        let drained = rx.drain().unwrap();
        assert_eq!(drained.items, vec![item(1)]);
        assert!(drained.closed);
        assert!(rx.is_closed());
    }

    #[test]
    fn test_send_never_blocks_on_a_full_socket() {
        let (mut tx, mut rx) = channel_pair::<Item>().unwrap();
        let text = "x".repeat(4096);
        for id in 0..1000 {
            tx.send(&Item {
                id,
                text: text.clone(),
            })
            .unwrap();
        }
        assert!(!tx.is_flushed());
        assert!(tx.backlog_len() > 0);

        let mut received = Vec::new();
        while received.len() < 1000 {
            tx.flush().unwrap();
            received.extend(rx.drain().unwrap().items);
        }
        assert!(tx.is_flushed());
        assert_eq!(
            received.iter().map(|item| item.id).collect::<Vec<_>>(),
            (0..1000).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_flush_for_gives_up_while_nobody_reads() {
        let (mut tx, _rx) = channel_pair::<Item>().unwrap();
        let text = "y".repeat(65536);
        for id in 0..64 {
            tx.send(&Item {
                id,
                text: text.clone(),
            })
            .unwrap();
        }
        assert!(!tx.flush_for(Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn test_send_to_dropped_receiver_fails() {
        let (mut tx, rx) = channel_pair::<Item>().unwrap();
        drop(rx);
        assert!(tx.send(&item(1)).is_err());
    }
}
