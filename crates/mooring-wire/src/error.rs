//! Error types for message parsing and payload codec operations.

use thiserror::Error;

/// Result type for wire codec operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur while parsing or serializing messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// The wire bytes were not a valid JSON message object.
    #[error("failed to parse message: {reason}, raw: {raw}")]
    Parse {
        /// Underlying parser diagnostic.
        reason: String,
        /// The offending line, for log context.
        raw: String,
    },

    /// The envelope could not be serialized.
    #[error("failed to serialize message: {0}")]
    Serialize(String),

    /// The message carries no `data` payload to decode.
    #[error("message has no data payload")]
    DataMissing,

    /// The `data` payload is structurally incompatible with the target shape.
    #[error("failed to decode data payload: {0}")]
    DataDecode(String),

    /// The value could not be encoded into the `data` payload.
    #[error("failed to encode data payload: {0}")]
    DataEncode(String),

    /// The operation requires the original wire bytes, but the message
    /// was constructed programmatically.
    #[error("message was not parsed from wire bytes")]
    NotParsed,
}

impl WireError {
    /// Create a new parse error from a parser diagnostic and the raw line.
    pub fn parse(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    /// Create a new serialize error.
    pub fn serialize(reason: impl Into<String>) -> Self {
        Self::Serialize(reason.into())
    }

    /// Create a new data decode error.
    pub fn data_decode(reason: impl Into<String>) -> Self {
        Self::DataDecode(reason.into())
    }

    /// Create a new data encode error.
    pub fn data_encode(reason: impl Into<String>) -> Self {
        Self::DataEncode(reason.into())
    }
}
