//! Reads feedback tuples until the service closes the stream.

use crate::{FeedbackError, FeedbackResult};
use push_config_and_utils::{ClientConfig, Service, SharedLogger};
use push_connection::{Connection, Transport};
use push_wire::FeedbackTuple;
use std::io;
use std::time::Duration;

/// Bytes requested from the socket per read.
pub const READ_CHUNK_SIZE: usize = 8192;

/// Streams [`FeedbackTuple`]s from a feedback connection.
pub struct FeedbackReader<T: Transport> {
    transport: T,
    select_timeout: Duration,
    logger: SharedLogger,
}

impl FeedbackReader<Connection> {
    /// Reader over a TLS connection to the configured feedback endpoint.
    pub fn from_config(config: &ClientConfig, logger: SharedLogger) -> FeedbackResult<Self> {
        let connection = Connection::new(Service::Feedback, config, logger.clone())?;
        Ok(Self::new(connection, config.socket_select_timeout(), logger))
    }
}

impl<T: Transport> FeedbackReader<T> {
    pub fn new(transport: T, select_timeout: Duration, logger: SharedLogger) -> Self {
        Self {
            transport,
            select_timeout,
            logger,
        }
    }

    pub fn connect(&mut self) -> FeedbackResult<()> {
        self.transport.connect()?;
        Ok(())
    }

    pub fn disconnect(&mut self) -> bool {
        self.transport.disconnect()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Read until end-of-stream and return every complete tuple, in order.
    ///
    /// A failing readiness poll ends the read early with whatever was
    /// collected so far. Bytes of an incomplete trailing tuple are dropped.
    pub fn receive(&mut self) -> FeedbackResult<Vec<FeedbackTuple>> {
        if !self.transport.is_connected() {
            return Err(FeedbackError::NotConnected);
        }

        let mut buffer = Vec::new();
        let mut tuples = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            match self.transport.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    for tuple in FeedbackTuple::drain_from(&mut buffer) {
                        self.logger.info(&format!(
                            "New feedback tuple: timestamp={} ({}), tokenLength={}, deviceToken={}.",
                            tuple.timestamp,
                            tuple
                                .observed_at()
                                .map(|t| t.to_rfc3339())
                                .unwrap_or_default(),
                            tuple.token_length,
                            tuple.device_token
                        ));
                        tuples.push(tuple);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.logger
                        .warn(&format!("Unable to read from the feedback stream: {}", e));
                    break;
                }
            }

            if let Err(e) = self.transport.poll_readable(self.select_timeout) {
                self.logger
                    .warn(&format!("Unable to wait for the stream availability: {}", e));
                break;
            }
        }

        if !buffer.is_empty() {
            self.logger.warn(&format!(
                "Discarding {} trailing byte(s) of an incomplete feedback tuple.",
                buffer.len()
            ));
        }
        self.logger
            .info(&format!("Received {} feedback tuple(s).", tuples.len()));
        Ok(tuples)
    }
}
