//! Device tokens.

use crate::{WireError, WireResult};
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Binary size of a device token.
pub const TOKEN_SIZE: usize = 32;

/// A 32-byte device token. Rendered and serialized as 64 lowercase hex
/// characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceToken([u8; TOKEN_SIZE]);

impl DeviceToken {
    pub fn from_bytes(bytes: [u8; TOKEN_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a 64-character hex string (case-insensitive).
    pub fn from_hex(hex: &str) -> WireResult<Self> {
        let trimmed = hex.trim();
        if trimmed.len() != TOKEN_SIZE * 2 {
            return Err(WireError::InvalidToken(trimmed.to_string()));
        }
        let decoded = HEXLOWER_PERMISSIVE
            .decode(trimmed.as_bytes())
            .map_err(|_| WireError::InvalidToken(trimmed.to_string()))?;
        let bytes: [u8; TOKEN_SIZE] = decoded
            .try_into()
            .map_err(|_| WireError::InvalidToken(trimmed.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceToken({})", self.to_hex())
    }
}

impl FromStr for DeviceToken {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for DeviceToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DeviceToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_hex_roundtrip_normalizes_case() {
        let token = DeviceToken::from_hex(&HEX.to_uppercase()).unwrap();
        assert_eq!(token.to_hex(), HEX);
        assert_eq!(token.as_bytes()[0], 0x01);
        assert_eq!(token.as_bytes()[31], 0xef);
    }

    #[test]
    fn test_rejects_bad_tokens() {
        assert!(DeviceToken::from_hex("abcd").is_err());
        assert!(DeviceToken::from_hex(&HEX[..63]).is_err());
        let not_hex = format!("zz{}", &HEX[2..]);
        assert!(matches!(
            DeviceToken::from_hex(&not_hex),
            Err(WireError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let token: DeviceToken = HEX.parse().unwrap();
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, format!("\"{}\"", HEX));
        let back: DeviceToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
        assert!(serde_json::from_str::<DeviceToken>("\"short\"").is_err());
    }
}
