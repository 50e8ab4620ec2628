//! Feedback tuples.
//!
//! Wire format (38 bytes):
//! ```text
//! [4: timestamp][2: token length][32: device token]
//! ```

use crate::{DeviceToken, WireError, WireResult, TOKEN_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Size of one feedback tuple.
pub const FEEDBACK_TUPLE_SIZE: usize = 4 + 2 + TOKEN_SIZE;

/// A device the feedback service reports as no longer reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackTuple {
    /// Seconds since the epoch at which the gateway found the app gone.
    pub timestamp: u32,
    pub token_length: u16,
    pub device_token: DeviceToken,
}

impl FeedbackTuple {
    /// Decode one tuple from the start of `data`.
    pub fn decode(data: &[u8]) -> WireResult<Self> {
        if data.len() < FEEDBACK_TUPLE_SIZE {
            return Err(WireError::Truncated {
                needed: FEEDBACK_TUPLE_SIZE,
                available: data.len(),
            });
        }
        let timestamp = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let token_length = u16::from_be_bytes([data[4], data[5]]);
        let token: [u8; TOKEN_SIZE] = data[6..FEEDBACK_TUPLE_SIZE]
            .try_into()
            .map_err(|_| WireError::Protocol("Feedback token slice".to_string()))?;

        Ok(Self {
            timestamp,
            token_length,
            device_token: DeviceToken::from_bytes(token),
        })
    }

    pub fn encode(&self) -> [u8; FEEDBACK_TUPLE_SIZE] {
        let mut buf = [0u8; FEEDBACK_TUPLE_SIZE];
        buf[0..4].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[4..6].copy_from_slice(&self.token_length.to_be_bytes());
        buf[6..].copy_from_slice(self.device_token.as_bytes());
        buf
    }

    /// Remove and decode every complete tuple at the front of `buf`,
    /// leaving any trailing partial tuple in place.
    pub fn drain_from(buf: &mut Vec<u8>) -> Vec<Self> {
        let complete = buf.len() / FEEDBACK_TUPLE_SIZE;
        let tuples = buf
            .chunks_exact(FEEDBACK_TUPLE_SIZE)
            .take(complete)
            .filter_map(|chunk| Self::decode(chunk).ok())
            .collect();
        buf.drain(..complete * FEEDBACK_TUPLE_SIZE);
        tuples
    }

    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.timestamp), 0)
    }
}
