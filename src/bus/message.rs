//! Messages as they travel through the bus.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::headers;

/// A message on the wire: identifier, headers and an opaque body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportMessage {
    /// Unique message identifier. For control messages this is the session id.
    pub id: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl TransportMessage {
    pub fn new(id: impl Into<String>, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            headers,
            body,
        }
    }

    /// Get a header value by key.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(|v| v.as_str())
    }

    /// Add or replace a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Whether the message carries the control-message marker.
    pub fn is_control_message(&self) -> bool {
        self.header(headers::CONTROL_MESSAGE)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// The logical message type, if stamped by the sender.
    pub fn message_type(&self) -> Option<&str> {
        self.header(headers::MESSAGE_TYPE)
    }

    /// Decode the body from bitcode binary format.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
        bitcode::deserialize(&self.body)
    }

    /// Get the body as a string (if valid UTF-8).
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// A message handed to a session by application code, before routing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Message type (e.g., "OrderAccepted").
    pub message_type: String,
    pub body: Vec<u8>,
    /// Headers supplied by the caller. Standard headers are stamped on top.
    pub headers: HashMap<String, String>,
}

impl OutgoingMessage {
    pub fn new(message_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            message_type: message_type.into(),
            body,
            headers: HashMap::new(),
        }
    }

    /// Create a message with a bitcode-serialized body.
    pub fn encode<T: Serialize>(
        message_type: impl Into<String>,
        body: &T,
    ) -> Result<Self, bitcode::Error> {
        let bytes = bitcode::serialize(body)?;
        Ok(Self::new(message_type, bytes))
    }

    /// Create a message with a string body.
    pub fn with_string_payload(message_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(message_type, body.into().into_bytes())
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}
