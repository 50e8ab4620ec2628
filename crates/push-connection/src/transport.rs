//! The byte-stream seam between the connection manager and its users.

use crate::ConnectionResult;
use std::io;
use std::time::Duration;

/// A reconnectable, non-blocking byte stream to one gateway service.
///
/// The delivery engine, the feedback reader and fan-out workers are generic
/// over this trait; [`crate::Connection`] is the TLS implementation.
pub trait Transport {
    /// Open the stream, retrying as configured.
    fn connect(&mut self) -> ConnectionResult<()>;

    /// Close the stream. Returns whether a close actually happened.
    fn disconnect(&mut self) -> bool;

    fn is_connected(&self) -> bool;

    /// Write a frame. Returns how many bytes went out, which may be fewer
    /// than `frame.len()` if the socket stopped accepting data.
    fn write(&mut self, frame: &[u8]) -> io::Result<usize>;

    /// Wait up to `timeout` for data (or end-of-stream) to become readable.
    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Read available bytes. `Ok(0)` is end-of-stream; `WouldBlock` means
    /// nothing is available yet.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self) -> ConnectionResult<()> {
        (**self).connect()
    }

    fn disconnect(&mut self) -> bool {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn write(&mut self, frame: &[u8]) -> io::Result<usize> {
        (**self).write(frame)
    }

    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        (**self).poll_readable(timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }
}
