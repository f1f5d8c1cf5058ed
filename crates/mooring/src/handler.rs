//! Handler traits and the per-message context.
//!
//! These are the seams between the routing core and its consumers:
//! game logic implements [`MessageHandler`], the fan-out broker and
//! sessions implement [`MessageWriter`], and whatever registers
//! sessions implements [`SessionHandler`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use mooring_wire::Message;

use crate::collection::SessionCollection;
use crate::error::CommsResult;
use crate::session::{Session, SessionId};

/// Request-scoped data passed to every handler invocation.
///
/// Carries the originating session ID and, when supplied, a handle to
/// the session collection so a handler can run authorization-style
/// queries (`has`/`get`) without owning global state. The context
/// lives only for the duration of one invocation.
#[derive(Clone)]
pub struct MessageContext<S = tokio::net::TcpStream> {
    /// The session the message arrived on; empty for session-agnostic
    /// messages such as client-side signals.
    session_id: SessionId,
    /// The registry of live sessions, when the caller has one.
    sessions: Option<Arc<SessionCollection<S>>>,
}

impl<S> MessageContext<S> {
    /// Create a context with only a session ID.
    pub fn new(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            sessions: None,
        }
    }

    /// Attach a session collection handle.
    pub fn with_sessions(mut self, sessions: Arc<SessionCollection<S>>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// The originating session ID.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The session collection, when one was supplied.
    pub fn sessions(&self) -> Option<&Arc<SessionCollection<S>>> {
        self.sessions.as_ref()
    }
}

impl<S> std::fmt::Debug for MessageContext<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageContext")
            .field("session_id", &self.session_id)
            .field("has_sessions", &self.sessions.is_some())
            .finish()
    }
}

/// A sink for outbound messages.
///
/// Implemented by [`Session`] (direct write to one connection) and by
/// the fan-out broker (routing by message kind).
#[async_trait]
pub trait MessageWriter: Send + Sync {
    /// Write one message.
    async fn write_message(&self, message: &Message) -> CommsResult<()>;
}

#[async_trait]
impl<S> MessageWriter for Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn write_message(&self, message: &Message) -> CommsResult<()> {
        Session::write_message(self, message).await
    }
}

/// Consumer of inbound messages.
///
/// The fan-in queue invokes the handler once per message, strictly
/// serialized; a handler may therefore keep mutable state without its
/// own locking.
#[async_trait]
pub trait MessageHandler<S = tokio::net::TcpStream>: Send + Sync {
    /// Handle one inbound message.
    async fn handle_message(
        &self,
        ctx: &MessageContext<S>,
        message: &Message,
        out: &dyn MessageWriter,
    ) -> CommsResult<()>;
}

/// Receiver of newly accepted sessions.
#[async_trait]
pub trait SessionHandler<S = tokio::net::TcpStream>: Send + Sync {
    /// Take ownership of a new session, typically by registering it
    /// with a session collection.
    async fn handle_session(&self, session: Arc<Session<S>>) -> CommsResult<()>;
}
