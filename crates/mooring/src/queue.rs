//! The fan-in message queue.
//!
//! [`MessageQueue`] collapses N concurrent per-session read streams
//! into one ordered queue drained by a single consumer task, so the
//! message handler never runs concurrently with itself and may hold
//! mutable state without its own locking.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use mooring_wire::Message;

use crate::collection::SessionCollection;
use crate::config::QueueConfig;
use crate::error::{CommsError, CommsResult};
use crate::handler::{MessageContext, MessageHandler, MessageWriter, SessionHandler};
use crate::session::{Session, SessionId};

/// One inbound message tagged with the session it arrived on.
struct QueuedMessage {
    session_id: SessionId,
    message: Message,
}

/// Fan-in queue from a session collection to a single message handler.
///
/// [`MessageQueue::start`] registers an `on_add` observer that spawns
/// one reading task per registered session, and one consumer task that
/// invokes the handler for each dequeued message in arrival order.
/// Start must finish before any session is added, or early messages
/// are silently lost; do not run it concurrently with registration.
///
/// # Example
///
/// ```ignore
/// use mooring::{MessageBroker, MessageQueue, QueueConfig, SessionCollection};
///
/// let sessions = SessionCollection::new();
/// let queue = MessageQueue::new(std::sync::Arc::clone(&sessions), QueueConfig::default());
/// let broker = std::sync::Arc::new(MessageBroker::new(sessions));
/// queue.start(handler, broker);
/// ```
pub struct MessageQueue<S = tokio::net::TcpStream> {
    /// The registry whose sessions feed this queue.
    sessions: Arc<SessionCollection<S>>,
    /// Producer side; `None` once stopped. The option and the stop
    /// decision share this one lock, so a stop cannot race a
    /// stopped-check.
    sender: parking_lot::Mutex<Option<mpsc::Sender<QueuedMessage>>>,
    /// Consumer side; taken by `start`.
    receiver: parking_lot::Mutex<Option<mpsc::Receiver<QueuedMessage>>>,
}

impl<S> MessageQueue<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create a new queue over the given collection.
    ///
    /// A capacity of 0 requests synchronous handoff; the underlying
    /// channel's minimum capacity is 1, so the producer may get at
    /// most one message ahead. Larger capacities let session readers
    /// run ahead of the handler by that many messages.
    pub fn new(sessions: Arc<SessionCollection<S>>, config: QueueConfig) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        Arc::new(Self {
            sessions,
            sender: parking_lot::Mutex::new(Some(sender)),
            receiver: parking_lot::Mutex::new(Some(receiver)),
        })
    }

    /// The collection feeding this queue.
    pub fn sessions(&self) -> &Arc<SessionCollection<S>> {
        &self.sessions
    }

    /// Wire the queue: one reading task per future session, one
    /// consumer task invoking `handler` for every message.
    ///
    /// The add-observer is registered before this returns, so callers
    /// may add sessions immediately afterwards. Reader tasks end on
    /// EOF or on terminal read errors, closing their session either
    /// way, or when the queue stops; malformed lines are logged and
    /// dropped without ending the session. Handler errors are logged
    /// and the consumer keeps going.
    pub fn start(
        self: &Arc<Self>,
        handler: Arc<dyn MessageHandler<S>>,
        writer: Arc<dyn MessageWriter>,
    ) {
        let queue = Arc::clone(self);
        self.sessions.on_add(Arc::new(move |session| {
            let queue = Arc::clone(&queue);
            let session = Arc::clone(session);
            tokio::spawn(async move {
                queue.read_session(session).await;
            });
        }));

        let receiver = self.receiver.lock().take();
        let Some(mut receiver) = receiver else {
            warn!("message queue already started");
            return;
        };
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            while let Some(item) = receiver.recv().await {
                let ctx = MessageContext::new(item.session_id).with_sessions(Arc::clone(&sessions));
                if let Err(err) = handler
                    .handle_message(&ctx, &item.message, writer.as_ref())
                    .await
                {
                    warn!(session_id = %ctx.session_id(), error = %err, "message handler failed");
                }
            }
            debug!("queue consumer finished");
        });
    }

    /// Per-session reading loop.
    async fn read_session(&self, session: Arc<Session<S>>) {
        debug!(session_id = %session.id(), "session reader started");
        loop {
            match session.read_message().await {
                None => {
                    debug!(session_id = %session.id(), "session reached EOF");
                    if let Err(err) = session.close().await {
                        warn!(session_id = %session.id(), error = %err, "close failed");
                    }
                    return;
                }
                Some(Ok(message)) => {
                    if self.enqueue(session.id().clone(), message).await.is_err() {
                        debug!(session_id = %session.id(), "queue stopped; reader ending");
                        return;
                    }
                }
                Some(Err(err)) if err.is_terminal() => {
                    warn!(session_id = %session.id(), error = %err, "session unusable; reader ending");
                    if let Err(err) = session.close().await {
                        warn!(session_id = %session.id(), error = %err, "close failed");
                    }
                    return;
                }
                Some(Err(err)) => {
                    warn!(session_id = %session.id(), error = %err, "dropping malformed message");
                }
            }
        }
    }

    /// Push one tagged message into the queue.
    ///
    /// Checks the stopped state first; a stopped queue is terminal and
    /// yields [`CommsError::QueueStopped`]. Suspends while the queue
    /// is at capacity.
    pub async fn enqueue(&self, session_id: SessionId, message: Message) -> CommsResult<()> {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return Err(CommsError::QueueStopped);
        };
        sender
            .send(QueuedMessage {
                session_id,
                message,
            })
            .await
            .map_err(|_| CommsError::QueueStopped)
    }

    /// Stop the queue. Idempotent; only the first call releases the
    /// channel. In-flight messages already queued are still consumed.
    pub fn stop(&self) {
        let sender = self.sender.lock().take();
        if sender.is_some() {
            debug!("message queue stopped");
        }
    }

    /// Whether the queue has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.sender.lock().is_none()
    }
}

#[async_trait]
impl<S> SessionHandler<S> for MessageQueue<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Register the session with the queue's collection, which starts
    /// its reading task via the add-observer.
    async fn handle_session(&self, session: Arc<Session<S>>) -> CommsResult<()> {
        debug!(session_id = %session.id(), "queue taking over session");
        self.sessions.add(session)
    }
}

impl<S> std::fmt::Debug for MessageQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("stopped", &self.sender.lock().is_none())
            .finish_non_exhaustive()
    }
}
