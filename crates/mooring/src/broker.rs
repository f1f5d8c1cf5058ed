//! The fan-out message broker.
//!
//! [`MessageBroker`] is the outbound counterpart of the fan-in queue:
//! a [`MessageWriter`] that routes by message kind, unicasting
//! responses to their addressed session and broadcasting events to
//! every registered session.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use mooring_wire::{Kind, Message};

use crate::collection::SessionCollection;
use crate::error::{CommsError, CommsResult, ErrorList};
use crate::handler::MessageWriter;
use crate::session::Session;
use tokio::io::{AsyncRead, AsyncWrite};

/// Routes outbound messages over a session collection.
///
/// Handlers write to the broker without knowing which connection, if
/// any, a message lands on:
///
/// - [`Kind::Response`] is unicast to the session named by the
///   message's `sessionID`; an unknown ID is an error.
/// - [`Kind::Event`] is broadcast concurrently to every registered
///   session; individual write failures are collected and reported as
///   one aggregate [`CommsError::Broadcast`] after every delivery has
///   been attempted.
/// - Every other kind is rejected with
///   [`CommsError::UnsupportedKind`].
pub struct MessageBroker<S = tokio::net::TcpStream> {
    sessions: Arc<SessionCollection<S>>,
}

impl<S> MessageBroker<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create a broker over the given collection.
    pub fn new(sessions: Arc<SessionCollection<S>>) -> Self {
        Self { sessions }
    }

    /// The collection this broker routes over.
    pub fn sessions(&self) -> &Arc<SessionCollection<S>> {
        &self.sessions
    }

    async fn unicast(&self, message: &Message) -> CommsResult<()> {
        let id = message.session_id();
        let session: Arc<Session<S>> = self
            .sessions
            .get(id)
            .ok_or_else(|| CommsError::session_not_found(id))?;
        session.write_message(message).await
    }

    async fn broadcast(&self, message: &Message) -> CommsResult<()> {
        debug!(recipients = self.sessions.len(), "broadcasting event");
        let failures = Arc::new(parking_lot::Mutex::new(ErrorList::new()));
        let template = message.clone();
        {
            let failures = Arc::clone(&failures);
            self.sessions
                .map(move |session| {
                    let message = template.clone();
                    let failures = Arc::clone(&failures);
                    async move {
                        if let Err(err) = session.write_message(&message).await {
                            warn!(session_id = %session.id(), error = %err, "broadcast write failed");
                            failures.lock().push(err);
                        }
                    }
                })
                .await;
        }
        let failures = std::mem::take(&mut *failures.lock());
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CommsError::Broadcast(failures))
        }
    }
}

#[async_trait]
impl<S> MessageWriter for MessageBroker<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn write_message(&self, message: &Message) -> CommsResult<()> {
        match message.kind() {
            Kind::Response => self.unicast(message).await,
            Kind::Event => self.broadcast(message).await,
            other => Err(CommsError::unsupported_kind(other.as_str())),
        }
    }
}

impl<S> std::fmt::Debug for MessageBroker<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBroker")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
