//! Error types for session management and message routing.

use std::fmt;

use thiserror::Error;

use mooring_wire::WireError;

/// Result type for session and routing operations.
pub type CommsResult<T> = Result<T, CommsError>;

/// Errors that can occur during session management and routing.
#[derive(Debug, Error)]
pub enum CommsError {
    /// A codec error from the wire layer.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session was already closed.
    #[error("session closed")]
    SessionClosed,

    /// An inbound line exceeded the configured size limit.
    #[error("message too large: {size} bytes exceeds limit of {limit}")]
    MessageTooLarge {
        /// Bytes read before giving up.
        size: usize,
        /// The configured limit.
        limit: usize,
    },

    /// A session with this ID is already registered.
    #[error("session {id} already exists")]
    SessionExists {
        /// The duplicate session ID.
        id: String,
    },

    /// No registered session has this ID.
    #[error("session {id} not found")]
    SessionNotFound {
        /// The ID that was not found.
        id: String,
    },

    /// The broker does not route this message kind.
    #[error("unsupported message type: {kind}")]
    UnsupportedKind {
        /// The offending kind string.
        kind: String,
    },

    /// One or more sessions failed during a broadcast. The unaffected
    /// sessions still received the message; nothing is rolled back.
    #[error("broadcast partially failed: {0}")]
    Broadcast(ErrorList),

    /// The fan-in queue has been stopped.
    #[error("message queue stopped")]
    QueueStopped,
}

impl CommsError {
    /// Create a new duplicate-session error.
    pub fn session_exists(id: impl Into<String>) -> Self {
        Self::SessionExists { id: id.into() }
    }

    /// Create a new session-not-found error.
    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::SessionNotFound { id: id.into() }
    }

    /// Create a new unsupported-kind error.
    pub fn unsupported_kind(kind: impl Into<String>) -> Self {
        Self::UnsupportedKind { kind: kind.into() }
    }

    /// Whether this error means the session is unusable and its
    /// reading task should terminate.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::SessionClosed | Self::MessageTooLarge { .. } | Self::QueueStopped
        )
    }
}

/// A list of per-recipient errors collected during a broadcast.
///
/// The string form lists every underlying error so a partial failure
/// names each affected session.
#[derive(Debug, Default)]
pub struct ErrorList(Vec<CommsError>);

impl ErrorList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Add an error to the list.
    pub fn push(&mut self, err: CommsError) {
        self.0.push(err);
    }

    /// The number of collected errors.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no errors were collected.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The collected errors.
    pub fn errors(&self) -> &[CommsError] {
        &self.0
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}
