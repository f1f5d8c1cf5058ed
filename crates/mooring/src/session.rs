//! Session handling.
//!
//! A [`Session`] owns one bidirectional byte stream and exposes
//! message-level reads and writes over the line-delimited JSON wire
//! format. Reads and writes may run concurrently with each other; the
//! close lifecycle runs exactly once and fires an optional close
//! observer, which the session registry uses to deregister itself.

use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{
    self, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
    BufReader, ReadHalf, WriteHalf,
};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use mooring_wire::Message;

use crate::config::SessionConfig;
use crate::error::{CommsError, CommsResult};

/// A unique identifier for a session, stable for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Observer invoked exactly once when the session closes.
pub type CloseObserver<S> = Box<dyn FnOnce(&Session<S>) + Send>;

/// One logical client connection.
///
/// The session splits its stream into a buffered line reader and a
/// writer, each behind its own async mutex, so one task may read while
/// another writes. Reads among themselves and writes among themselves
/// are serialized by those mutexes.
///
/// # Example
///
/// ```ignore
/// use mooring::Session;
/// use mooring_wire::Message;
///
/// async fn greet(session: &Session) -> mooring::CommsResult<()> {
///     session
///         .write_message(&Message::greeting(session.id().as_str()))
///         .await
/// }
/// ```
pub struct Session<S = tokio::net::TcpStream> {
    /// The unique session ID.
    id: SessionId,
    /// Buffered reader over the read half of the stream.
    reader: Mutex<BufReader<ReadHalf<S>>>,
    /// Write half of the stream.
    writer: Mutex<WriteHalf<S>>,
    /// Whether close has run.
    closed: AtomicBool,
    /// Close notification; unblocks pending reads.
    closed_tx: watch::Sender<bool>,
    /// Observer fired once at close, then released.
    on_close: parking_lot::Mutex<Option<CloseObserver<S>>>,
    /// Per-session configuration.
    config: SessionConfig,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create a new session around a stream with default configuration.
    pub fn new(id: impl Into<SessionId>, stream: S) -> Self {
        Self::with_config(id, stream, SessionConfig::default())
    }

    /// Create a new session with the given configuration.
    pub fn with_config(id: impl Into<SessionId>, stream: S, config: SessionConfig) -> Self {
        let (read_half, write_half) = io::split(stream);
        let (closed_tx, _) = watch::channel(false);
        Self {
            id: id.into(),
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(write_half),
            closed: AtomicBool::new(false),
            closed_tx,
            on_close: parking_lot::Mutex::new(None),
            config,
        }
    }

    /// Create a session from a freshly dialed stream, adopting the
    /// session ID announced by the peer's first message.
    ///
    /// Returns the session together with that greeting message.
    pub async fn from_stream(stream: S, config: SessionConfig) -> CommsResult<(Self, Message)> {
        let (read_half, write_half) = io::split(stream);
        let mut reader = BufReader::new(read_half);
        let line = read_line(&mut reader, config.max_line_bytes)
            .await?
            .ok_or(CommsError::SessionClosed)?;
        let greeting = Message::parse(&line)?;
        let (closed_tx, _) = watch::channel(false);
        let session = Self {
            id: SessionId::new(greeting.session_id()),
            reader: Mutex::new(reader),
            writer: Mutex::new(write_half),
            closed: AtomicBool::new(false),
            closed_tx,
            on_close: parking_lot::Mutex::new(None),
            config,
        };
        Ok((session, greeting))
    }

    /// The session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Register the close observer, replacing any previous one.
    pub fn on_close(&self, observer: CloseObserver<S>) {
        *self.on_close.lock() = Some(observer);
    }

    /// Read the next message from the session.
    ///
    /// Blocks the calling task until one newline-terminated JSON line
    /// is available. Returns `None` on orderly peer closure (EOF) or
    /// once the session is closed locally; `Some(Err)` on I/O failure,
    /// an oversized line, or a malformed message. After a parse error
    /// the session is still readable; after an I/O error it should be
    /// treated as unusable.
    pub async fn read_message(&self) -> Option<CommsResult<Message>> {
        let mut closed_rx = self.closed_tx.subscribe();
        if *closed_rx.borrow() {
            return None;
        }
        let mut reader = self.reader.lock().await;
        tokio::select! {
            _ = closed_rx.changed() => None,
            line = read_line(&mut *reader, self.config.max_line_bytes) => match line {
                Ok(Some(bytes)) => Some(Message::parse(&bytes).map_err(CommsError::from)),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            },
        }
    }

    /// Serialize and write one message line, then flush.
    ///
    /// No buffering is kept across calls beyond the stream's own.
    pub async fn write_message(&self, message: &Message) -> CommsResult<()> {
        if self.is_closed() {
            return Err(CommsError::SessionClosed);
        }
        let bytes = message.serialize()?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Close the session.
    ///
    /// The underlying stream is shut down exactly once; subsequent
    /// calls are no-ops. Pending reads unblock with `None`. The close
    /// observer, if registered, fires once and its reference is
    /// released.
    pub async fn close(&self) -> CommsResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(session_id = %self.id, "closing session");
        let _ = self.closed_tx.send(true);
        let shutdown = {
            let mut writer = self.writer.lock().await;
            writer.shutdown().await
        };
        let observer = self.on_close.lock().take();
        if let Some(observer) = observer {
            observer(self);
        }
        shutdown.map_err(CommsError::from)
    }
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Read one newline-terminated line, enforcing the size limit.
///
/// `Ok(None)` signals EOF; a partial line at EOF also counts as EOF,
/// since the peer can no longer complete the message.
async fn read_line<R>(reader: &mut R, limit: usize) -> CommsResult<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut limited = (&mut *reader).take(limit as u64 + 1);
    limited.read_until(b'\n', &mut buf).await?;
    if buf.is_empty() {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if buf.len() > limit {
            return Err(CommsError::MessageTooLarge {
                size: buf.len(),
                limit,
            });
        }
        // Stream ended mid-line.
        return Ok(None);
    }
    Ok(Some(buf))
}
