//! Message payloads.

use crate::{MessageError, MessageResult};
use push_wire::{DeviceToken, Priority};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum JSON payload the gateway accepts.
pub const MAX_PAYLOAD_SIZE: usize = 2048;

/// Default time the gateway keeps an undeliverable notification (one week).
pub const DEFAULT_EXPIRY_SECONDS: u32 = 604_800;

const RESERVED_PROPERTY: &str = "aps";

/// What the delivery engine needs from a message.
pub trait MessagePayload {
    /// Encoded JSON body, identical for every recipient.
    fn payload_bytes(&self) -> MessageResult<Vec<u8>>;

    fn recipient_count(&self) -> usize;

    fn recipient_at(&self, index: usize) -> Option<&DeviceToken>;

    /// Seconds the gateway should keep trying; 0 means do not store.
    fn expiry_seconds(&self) -> u32;

    fn priority(&self) -> Priority;

    /// Caller-chosen label carried along for logging and error reports.
    fn custom_identifier(&self) -> Option<&str>;
}

/// A notification message for one or more devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub recipients: Vec<DeviceToken>,
    pub text: Option<String>,
    pub badge: Option<u32>,
    pub sound: Option<String>,
    pub category: Option<String>,
    pub content_available: bool,
    pub custom_properties: Map<String, Value>,
    pub expiry_seconds: u32,
    pub priority: Priority,
    pub custom_identifier: Option<String>,
    /// Shorten the alert text instead of failing when the payload is too long.
    pub auto_adjust_long_payload: bool,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            text: None,
            badge: None,
            sound: None,
            category: None,
            content_available: false,
            custom_properties: Map::new(),
            expiry_seconds: DEFAULT_EXPIRY_SECONDS,
            priority: Priority::Immediate,
            custom_identifier: None,
            auto_adjust_long_payload: true,
        }
    }
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a recipient from its 64-character hex form.
    pub fn add_recipient(&mut self, hex: &str) -> MessageResult<&mut Self> {
        self.recipients.push(DeviceToken::from_hex(hex)?);
        Ok(self)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_badge(mut self, badge: u32) -> Self {
        self.badge = Some(badge);
        self
    }

    pub fn with_sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = Some(sound.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_content_available(mut self, available: bool) -> Self {
        self.content_available = available;
        self
    }

    pub fn with_expiry(mut self, seconds: u32) -> Self {
        self.expiry_seconds = seconds;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_custom_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.custom_identifier = Some(identifier.into());
        self
    }

    pub fn with_auto_adjust(mut self, enabled: bool) -> Self {
        self.auto_adjust_long_payload = enabled;
        self
    }

    /// Set a top-level property next to the reserved `aps` dictionary.
    pub fn set_custom_property(&mut self, name: &str, value: Value) -> MessageResult<()> {
        if name == RESERVED_PROPERTY {
            return Err(MessageError::ReservedProperty(name.to_string()));
        }
        self.custom_properties.insert(name.to_string(), value);
        Ok(())
    }

    fn to_value(&self, text: Option<&str>) -> Value {
        let mut aps = Map::new();
        if let Some(text) = text {
            aps.insert("alert".to_string(), Value::from(text));
        }
        if let Some(badge) = self.badge {
            aps.insert("badge".to_string(), Value::from(badge));
        }
        if let Some(sound) = &self.sound {
            aps.insert("sound".to_string(), Value::from(sound.as_str()));
        }
        if let Some(category) = &self.category {
            aps.insert("category".to_string(), Value::from(category.as_str()));
        }
        if self.content_available {
            aps.insert("content-available".to_string(), Value::from(1));
        }

        let mut root = Map::new();
        root.insert(RESERVED_PROPERTY.to_string(), Value::Object(aps));
        for (name, value) in &self.custom_properties {
            if name != RESERVED_PROPERTY {
                root.insert(name.clone(), value.clone());
            }
        }
        Value::Object(root)
    }
}

impl MessagePayload for Message {
    fn payload_bytes(&self) -> MessageResult<Vec<u8>> {
        let mut text = self.text.clone();
        loop {
            let encoded = serde_json::to_vec(&self.to_value(text.as_deref()))?;
            if encoded.len() <= MAX_PAYLOAD_SIZE {
                return Ok(encoded);
            }

            let overflow = encoded.len() - MAX_PAYLOAD_SIZE;
            let shortened = match text.as_deref() {
                Some(current) if self.auto_adjust_long_payload && overflow < current.len() => {
                    truncate_on_char_boundary(current, current.len() - overflow)
                }
                _ => {
                    return Err(MessageError::PayloadTooLong {
                        size: encoded.len(),
                        max: MAX_PAYLOAD_SIZE,
                    })
                }
            };
            text = Some(shortened.to_string());
        }
    }

    fn recipient_count(&self) -> usize {
        self.recipients.len()
    }

    fn recipient_at(&self, index: usize) -> Option<&DeviceToken> {
        self.recipients.get(index)
    }

    fn expiry_seconds(&self) -> u32 {
        self.expiry_seconds
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn custom_identifier(&self) -> Option<&str> {
        self.custom_identifier.as_deref()
    }
}

fn truncate_on_char_boundary(s: &str, max_len: usize) -> &str {
    let mut end = max_len.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
