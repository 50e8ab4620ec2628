//! Outbound notification frame (command 2).
//!
//! Wire format:
//! ```text
//! [1: command=2][4: frame_len]
//!   [1: item=1][2: len=32][32: device token]
//!   [1: item=2][2: len=N ][N : payload]
//!   [1: item=3][2: len=4 ][4 : sequence id]
//!   [1: item=4][2: len=4 ][4 : expiry]
//!   [1: item=5][2: len=1 ][1 : priority]
//! ```
//! `frame_len` counts the five items only.

use crate::{DeviceToken, WireError, WireResult, TOKEN_SIZE};
use serde::{Deserialize, Serialize};

/// Command byte of a notification frame.
pub const COMMAND_NOTIFICATION: u8 = 2;

/// Expiry value telling the gateway not to store the notification.
pub const EXPIRY_DO_NOT_STORE: u32 = 0;

/// Largest payload a frame item can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

const ITEM_TOKEN: u8 = 1;
const ITEM_PAYLOAD: u8 = 2;
const ITEM_SEQUENCE_ID: u8 = 3;
const ITEM_EXPIRY: u8 = 4;
const ITEM_PRIORITY: u8 = 5;

/// Item header: id + length.
const ITEM_HEADER_SIZE: usize = 1 + 2;

/// Frame header: command + frame length.
const FRAME_HEADER_SIZE: usize = 1 + 4;

/// Delivery priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    /// Send immediately.
    #[default]
    Immediate,
    /// Send at a time that conserves power on the device.
    ConservePower,
}

impl Priority {
    pub fn to_byte(self) -> u8 {
        match self {
            Priority::Immediate => 10,
            Priority::ConservePower => 5,
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(Priority::Immediate),
            5 => Ok(Priority::ConservePower),
            other => Err(WireError::InvalidPriority(other)),
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.to_byte()
    }
}

/// One outbound notification as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFrame {
    pub token: DeviceToken,
    pub payload: Vec<u8>,
    pub sequence_id: u32,
    pub expiry: u32,
    pub priority: Priority,
}

impl NotificationFrame {
    /// Byte length of the five items for a given payload size.
    pub fn items_len(payload_len: usize) -> usize {
        5 * ITEM_HEADER_SIZE + TOKEN_SIZE + payload_len + 4 + 4 + 1
    }

    /// Total encoded size including the frame header.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + Self::items_len(self.payload.len())
    }

    /// Encode the frame to bytes.
    pub fn encode(&self) -> WireResult<Vec<u8>> {
        let payload_len = u16::try_from(self.payload.len())
            .map_err(|_| WireError::PayloadTooLarge(self.payload.len()))?;
        let items_len = Self::items_len(self.payload.len());

        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + items_len);
        buf.push(COMMAND_NOTIFICATION);
        buf.extend_from_slice(&(items_len as u32).to_be_bytes());

        push_item(&mut buf, ITEM_TOKEN, self.token.as_bytes());
        buf.push(ITEM_PAYLOAD);
        buf.extend_from_slice(&payload_len.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        push_item(&mut buf, ITEM_SEQUENCE_ID, &self.sequence_id.to_be_bytes());
        push_item(&mut buf, ITEM_EXPIRY, &self.expiry.to_be_bytes());
        push_item(&mut buf, ITEM_PRIORITY, &[self.priority.to_byte()]);

        Ok(buf)
    }

    /// Decode a complete frame. Items may appear in any order but all five
    /// must be present exactly once.
    pub fn decode(data: &[u8]) -> WireResult<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(WireError::Truncated {
                needed: FRAME_HEADER_SIZE,
                available: data.len(),
            });
        }
        if data[0] != COMMAND_NOTIFICATION {
            return Err(WireError::Protocol(format!(
                "Expected notification command {}, got {}",
                COMMAND_NOTIFICATION, data[0]
            )));
        }

        let frame_len = read_u32(&data[1..5])? as usize;
        let needed = FRAME_HEADER_SIZE + frame_len;
        if data.len() < needed {
            return Err(WireError::Truncated {
                needed,
                available: data.len(),
            });
        }

        let mut token = None;
        let mut payload = None;
        let mut sequence_id = None;
        let mut expiry = None;
        let mut priority = None;

        let mut items = &data[FRAME_HEADER_SIZE..needed];
        while !items.is_empty() {
            if items.len() < ITEM_HEADER_SIZE {
                return Err(WireError::Protocol("Dangling item header".to_string()));
            }
            let id = items[0];
            let len = u16::from_be_bytes([items[1], items[2]]) as usize;
            let body_end = ITEM_HEADER_SIZE + len;
            if items.len() < body_end {
                return Err(WireError::Protocol(format!(
                    "Item {} declares {} bytes but only {} remain",
                    id,
                    len,
                    items.len() - ITEM_HEADER_SIZE
                )));
            }
            let body = &items[ITEM_HEADER_SIZE..body_end];

            match id {
                ITEM_TOKEN => {
                    let bytes: [u8; TOKEN_SIZE] = body.try_into().map_err(|_| {
                        WireError::Protocol(format!("Token item has {} bytes", body.len()))
                    })?;
                    set_once(&mut token, id, DeviceToken::from_bytes(bytes))?;
                }
                ITEM_PAYLOAD => set_once(&mut payload, id, body.to_vec())?,
                ITEM_SEQUENCE_ID => set_once(&mut sequence_id, id, read_u32(body)?)?,
                ITEM_EXPIRY => set_once(&mut expiry, id, read_u32(body)?)?,
                ITEM_PRIORITY => {
                    if body.len() != 1 {
                        return Err(WireError::Protocol(format!(
                            "Priority item has {} bytes",
                            body.len()
                        )));
                    }
                    set_once(&mut priority, id, Priority::try_from(body[0])?)?;
                }
                other => {
                    return Err(WireError::Protocol(format!("Unknown item id {}", other)));
                }
            }

            items = &items[body_end..];
        }

        let missing = |name: &str| WireError::Protocol(format!("Missing {} item", name));
        Ok(Self {
            token: token.ok_or_else(|| missing("token"))?,
            payload: payload.ok_or_else(|| missing("payload"))?,
            sequence_id: sequence_id.ok_or_else(|| missing("sequence id"))?,
            expiry: expiry.ok_or_else(|| missing("expiry"))?,
            priority: priority.ok_or_else(|| missing("priority"))?,
        })
    }
}

fn push_item(buf: &mut Vec<u8>, id: u8, body: &[u8]) {
    buf.push(id);
    buf.extend_from_slice(&(body.len() as u16).to_be_bytes());
    buf.extend_from_slice(body);
}

fn read_u32(bytes: &[u8]) -> WireResult<u32> {
    let array: [u8; 4] = bytes
        .try_into()
        .map_err(|_| WireError::Protocol(format!("Expected 4-byte integer, got {}", bytes.len())))?;
    Ok(u32::from_be_bytes(array))
}

fn set_once<T>(slot: &mut Option<T>, id: u8, value: T) -> WireResult<()> {
    if slot.is_some() {
        return Err(WireError::Protocol(format!("Duplicate item id {}", id)));
    }
    *slot = Some(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> DeviceToken {
        DeviceToken::from_bytes([0xab; TOKEN_SIZE])
    }

    fn frame(payload: &[u8], sequence_id: u32, expiry: u32, priority: Priority) -> NotificationFrame {
        NotificationFrame {
            token: token(),
            payload: payload.to_vec(),
            sequence_id,
            expiry,
            priority,
        }
    }

    #[test]
    fn test_encode_layout() {
        let encoded = frame(b"{}", 7, 1_700_000_000, Priority::ConservePower)
            .encode()
            .unwrap();

        assert_eq!(encoded[0], COMMAND_NOTIFICATION);
        let frame_len = u32::from_be_bytes(encoded[1..5].try_into().unwrap()) as usize;
        assert_eq!(frame_len, encoded.len() - 5);
        assert_eq!(frame_len, 3 + 32 + 3 + 2 + 3 + 4 + 3 + 4 + 3 + 1);

        // token item
        assert_eq!(&encoded[5..8], &[1, 0, 32]);
        assert_eq!(&encoded[8..40], &[0xab; 32]);
        // payload item
        assert_eq!(&encoded[40..43], &[2, 0, 2]);
        assert_eq!(&encoded[43..45], b"{}");
        // sequence id
        assert_eq!(&encoded[45..48], &[3, 0, 4]);
        assert_eq!(&encoded[48..52], &7u32.to_be_bytes());
        // expiry
        assert_eq!(&encoded[52..55], &[4, 0, 4]);
        assert_eq!(&encoded[55..59], &1_700_000_000u32.to_be_bytes());
        // priority
        assert_eq!(&encoded[59..], &[5, 0, 1, 5]);
    }

    #[test]
    fn test_decode_recovers_fixed_items() {
        let large = vec![0x7b; 2048];
        let cases = [
            (b"{\"aps\":{}}".as_slice(), 1, EXPIRY_DO_NOT_STORE, Priority::Immediate),
            (b"".as_slice(), u32::MAX, u32::MAX, Priority::ConservePower),
            (large.as_slice(), 42, 1_800_000_000, Priority::Immediate),
        ];

        for (payload, sequence_id, expiry, priority) in cases {
            let original = frame(payload, sequence_id, expiry, priority);
            let encoded = original.encode().unwrap();
            assert_eq!(encoded.len(), original.encoded_len());

            let decoded = NotificationFrame::decode(&encoded).unwrap();
            assert_eq!(decoded.sequence_id, sequence_id);
            assert_eq!(decoded.expiry, expiry);
            assert_eq!(decoded.priority, priority);
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_payload_too_large() {
        let big = frame(&vec![0u8; MAX_PAYLOAD_LEN + 1], 1, 0, Priority::Immediate);
        assert_eq!(
            big.encode().unwrap_err(),
            WireError::PayloadTooLarge(MAX_PAYLOAD_LEN + 1)
        );
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let encoded = frame(b"{}", 1, 0, Priority::Immediate).encode().unwrap();

        assert!(matches!(
            NotificationFrame::decode(&encoded[..3]),
            Err(WireError::Truncated { .. })
        ));
        assert!(matches!(
            NotificationFrame::decode(&encoded[..encoded.len() - 1]),
            Err(WireError::Truncated { .. })
        ));

        let mut wrong_command = encoded.clone();
        wrong_command[0] = 1;
        assert!(matches!(
            NotificationFrame::decode(&wrong_command),
            Err(WireError::Protocol(_))
        ));

        let mut bad_priority = encoded.clone();
        let last = bad_priority.len() - 1;
        bad_priority[last] = 7;
        assert_eq!(
            NotificationFrame::decode(&bad_priority).unwrap_err(),
            WireError::InvalidPriority(7)
        );
    }

    #[test]
    fn test_priority_bytes() {
        assert_eq!(Priority::Immediate.to_byte(), 10);
        assert_eq!(Priority::ConservePower.to_byte(), 5);
        assert_eq!(Priority::try_from(10).unwrap(), Priority::Immediate);
        assert_eq!(Priority::try_from(5).unwrap(), Priority::ConservePower);
        assert!(Priority::try_from(0).is_err());
        assert_eq!(Priority::default(), Priority::Immediate);
    }
}
