//! Payload encoding for publishes.
//!
//! Encoding never fails: anything that cannot be represented becomes an empty
//! body. Decoding is owned by each consumer.

use serde::Serialize;
use tracing::warn;

/// Application payload handed to a producer
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured value, sent as compact JSON
    Structured(serde_json::Value),
    /// Plain text, sent as UTF-8
    Text(String),
    /// Anything else; sent as an empty body
    Unsupported,
}

impl Payload {
    /// Serialize any value into a structured payload.
    ///
    /// Falls back to [`Payload::Unsupported`] when serialization fails.
    pub fn structured<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Self::Structured(value),
            Err(e) => {
                warn!(error = %e, "Payload is not serializable, sending empty body");
                Self::Unsupported
            }
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self)
    }
}

/// Encode a payload into the bytes put on the wire
pub fn encode(payload: &Payload) -> Vec<u8> {
    match payload {
        // serde_json::Map is ordered by key, so output is stable
        Payload::Structured(value) => value.to_string().into_bytes(),
        Payload::Text(text) => text.as_bytes().to_vec(),
        Payload::Unsupported => Vec::new(),
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}
