// Log Record
//
// An audit-log event as delivered by upstream emitters.
// The kernel never interprets its fields; it only needs a structured
// value and the size of its serialized form for memory accounting.

use serde::{Serialize, Serializer};
use serde_json::Value;

/// Reasons an inbound payload cannot become a record.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is a JSON {0}, expected an object")]
    NotStructured(&'static str),
}

/// One decoded audit-log event awaiting persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    value: Value,
    encoded_len: usize,
}

impl LogRecord {
    /// Decode a raw bus payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(payload)?;
        Self::from_value(value)
    }

    /// Wrap an already parsed value.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        let kind = match &value {
            Value::Object(_) => None,
            Value::Null => Some("null"),
            Value::Bool(_) => Some("boolean"),
            Value::Number(_) => Some("number"),
            Value::String(_) => Some("string"),
            Value::Array(_) => Some("array"),
        };
        if let Some(kind) = kind {
            return Err(DecodeError::NotStructured(kind));
        }

        // Compact serialization, the same form the size estimate is based on.
        let encoded_len = value.to_string().len();
        Ok(Self { value, encoded_len })
    }

    /// Size of the compact JSON encoding in bytes.
    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

impl Serialize for LogRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}
