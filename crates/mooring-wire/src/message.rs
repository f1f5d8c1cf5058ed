//! The message envelope and its line-delimited JSON codec.
//!
//! Every message on the wire is one UTF-8 JSON object terminated by `\n`.
//! A [`Message`] parsed from the wire keeps the exact bytes it was parsed
//! from, so re-emitting an unmodified message reproduces the original
//! line byte for byte. Messages built programmatically serialize field
//! by field, omitting empty fields.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{WireError, WireResult};

/// The routing kind of a message.
///
/// The kind determines which envelope fields are semantically
/// meaningful; routers and handlers must not assume fields outside
/// that set are populated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    /// A spontaneous message that is not part of a request/response
    /// exchange, e.g. process initiation.
    Signal,
    /// A client request expecting a response.
    Request,
    /// A response addressed to a single session.
    Response,
    /// An event broadcast to all sessions.
    Event,
    /// The first message a server sends on a new session, carrying the
    /// assigned session ID.
    Greeting,
    /// Any other type tag, preserved verbatim. `Other("")` represents
    /// an absent `type` key.
    Other(String),
}

impl Kind {
    /// Parse a kind from its wire string.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "signal" => Self::Signal,
            "request" => Self::Request,
            "response" => Self::Response,
            "event" => Self::Event,
            "greeting" => Self::Greeting,
            other => Self::Other(other.to_owned()),
        }
    }

    /// The wire string for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Signal => "signal",
            Self::Request => "request",
            Self::Response => "response",
            Self::Event => "event",
            Self::Greeting => "greeting",
            Self::Other(s) => s,
        }
    }

    /// Whether the `type` key was absent.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Other(s) if s.is_empty())
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_zero(code: &i64) -> bool {
    *code == 0
}

/// JSON shape of the envelope. Key order here is the emitted order.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "sessionID", default, skip_serializing_if = "String::is_empty")]
    session_id: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    signal: String,
    #[serde(rename = "requestID", default, skip_serializing_if = "String::is_empty")]
    request_id: String,
    #[serde(rename = "requestType", default, skip_serializing_if = "String::is_empty")]
    request_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    response: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Box<RawValue>>,
    #[serde(rename = "error", default, skip_serializing_if = "String::is_empty")]
    error: String,
}

/// A message envelope.
///
/// Carries the routing fields recognized by the broker and fan-in
/// queue, plus an opaque `data` payload that stays raw JSON until a
/// consumer asks to decode it into a concrete shape.
///
/// # Example
///
/// ```
/// use mooring_wire::{Kind, Message};
///
/// let m = Message::parse(br#"{"type":"request","requestType":"join"}"#).unwrap();
/// assert_eq!(m.kind(), &Kind::Request);
/// assert_eq!(m.request_type(), "join");
/// // Round-trip fidelity: parsed messages re-emit their exact bytes.
/// assert_eq!(&m.serialize().unwrap()[..], br#"{"type":"request","requestType":"join"}"#);
/// ```
#[derive(Debug, Clone)]
pub struct Message {
    session_id: String,
    kind: Kind,
    signal: String,
    request_id: String,
    request_type: String,
    response: String,
    code: i64,
    error: String,
    data: Option<Box<RawValue>>,
    /// The captured wire bytes, present only for parsed messages.
    raw: Option<Bytes>,
}

impl Message {
    fn empty(kind: Kind) -> Self {
        Self {
            session_id: String::new(),
            kind,
            signal: String::new(),
            request_id: String::new(),
            request_type: String::new(),
            response: String::new(),
            code: 0,
            error: String::new(),
            data: None,
            raw: None,
        }
    }

    /// Parse one JSON object from wire bytes.
    ///
    /// Trailing newlines are stripped before parsing. Unrecognized keys
    /// are ignored and absent keys default to empty/zero. The trimmed
    /// bytes are captured for round-trip re-serialization.
    pub fn parse(bytes: impl AsRef<[u8]>) -> WireResult<Self> {
        let mut bytes = bytes.as_ref();
        while let [head @ .., b'\n'] = bytes {
            bytes = head;
        }
        let wire: WireMessage = serde_json::from_slice(bytes)
            .map_err(|e| WireError::parse(e.to_string(), String::from_utf8_lossy(bytes)))?;
        Ok(Self {
            session_id: wire.session_id,
            kind: Kind::from_wire(&wire.kind),
            signal: wire.signal,
            request_id: wire.request_id,
            request_type: wire.request_type,
            response: wire.response,
            code: wire.code,
            error: wire.error,
            data: wire.data,
            raw: Some(Bytes::copy_from_slice(bytes)),
        })
    }

    /// Parse one JSON object from a wire string.
    pub fn parse_str(s: &str) -> WireResult<Self> {
        Self::parse(s.as_bytes())
    }

    /// Serialize the message to wire bytes (without the trailing newline).
    ///
    /// For a message produced by [`Message::parse`] this returns the
    /// captured bytes verbatim; round-trip fidelity takes precedence
    /// over field-by-field re-serialization. Programmatically built
    /// messages emit a JSON object containing only non-empty fields.
    pub fn serialize(&self) -> WireResult<Bytes> {
        if let Some(raw) = &self.raw {
            return Ok(raw.clone());
        }
        let wire = WireMessage {
            session_id: self.session_id.clone(),
            kind: if self.kind.is_empty() {
                String::new()
            } else {
                self.kind.as_str().to_owned()
            },
            signal: self.signal.clone(),
            request_id: self.request_id.clone(),
            request_type: self.request_type.clone(),
            response: self.response.clone(),
            code: self.code,
            data: self.data.clone(),
            error: self.error.clone(),
        };
        serde_json::to_vec(&wire)
            .map(Bytes::from)
            .map_err(|e| WireError::serialize(e.to_string()))
    }

    /// Create a new signal message.
    pub fn signal(signal: impl Into<String>) -> Self {
        Self {
            signal: signal.into(),
            ..Self::empty(Kind::Signal)
        }
    }

    /// Create a new request.
    pub fn request(request_id: impl Into<String>, request_type: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            request_type: request_type.into(),
            ..Self::empty(Kind::Request)
        }
    }

    /// Create a new response addressed to a single session.
    pub fn response(
        session_id: impl Into<String>,
        request_id: impl Into<String>,
        request_type: impl Into<String>,
        code: i64,
        response: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            request_id: request_id.into(),
            request_type: request_type.into(),
            response: response.into(),
            code,
            ..Self::empty(Kind::Response)
        }
    }

    /// Create a new error response. The kind is still `response`; the
    /// error is carried in the `error` field.
    pub fn error_response(
        session_id: impl Into<String>,
        request_id: impl Into<String>,
        code: i64,
        response: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            request_id: request_id.into(),
            response: response.into(),
            code,
            error: error.into(),
            ..Self::empty(Kind::Response)
        }
    }

    /// Create a new greeting message announcing a session ID.
    pub fn greeting(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::empty(Kind::Greeting)
        }
    }

    /// Create a new broadcast event.
    pub fn event() -> Self {
        Self::empty(Kind::Event)
    }

    /// Create a new message with only a session ID and a kind.
    pub fn simple(session_id: impl Into<String>, kind: Kind) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::empty(kind)
        }
    }

    /// Attach a payload to the message, consuming-builder style.
    pub fn with_data<T: Serialize + ?Sized>(mut self, value: &T) -> WireResult<Self> {
        self.set_data(value)?;
        Ok(self)
    }

    /// Encode a value into the `data` payload.
    ///
    /// Mutating a parsed message drops its captured bytes; it will
    /// re-serialize field by field from then on.
    pub fn set_data<T: Serialize + ?Sized>(&mut self, value: &T) -> WireResult<()> {
        let raw = serde_json::value::to_raw_value(value)
            .map_err(|e| WireError::data_encode(e.to_string()))?;
        self.data = Some(raw);
        self.raw = None;
        Ok(())
    }

    /// Decode the `data` payload into a concrete shape.
    pub fn data_as<T: DeserializeOwned>(&self) -> WireResult<T> {
        let data = self.data.as_ref().ok_or(WireError::DataMissing)?;
        serde_json::from_str(data.get()).map_err(|e| WireError::data_decode(e.to_string()))
    }

    /// Decode the whole captured envelope into a caller-supplied shape.
    ///
    /// Only valid for messages parsed from the wire.
    pub fn decode_as<T: DeserializeOwned>(&self) -> WireResult<T> {
        let raw = self.raw.as_ref().ok_or(WireError::NotParsed)?;
        serde_json::from_slice(raw).map_err(|e| WireError::data_decode(e.to_string()))
    }

    /// The session ID this message belongs to; empty for
    /// session-agnostic messages.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The routing kind of the message.
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// The signal name, meaningful for [`Kind::Signal`].
    pub fn signal_name(&self) -> &str {
        &self.signal
    }

    /// The request ID, meaningful for requests and responses.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The request type, meaningful for requests and responses.
    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    /// The response text, meaningful for [`Kind::Response`].
    pub fn response_text(&self) -> &str {
        &self.response
    }

    /// The response code, meaningful for [`Kind::Response`].
    pub fn code(&self) -> i64 {
        self.code
    }

    /// The error string of an error response; empty otherwise.
    pub fn error_string(&self) -> &str {
        &self.error
    }

    /// Whether the message carries a `data` payload.
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.serialize() {
            Ok(bytes) => f.write_str(&String::from_utf8_lossy(&bytes)),
            Err(_) => f.write_str("<unserializable message>"),
        }
    }
}
