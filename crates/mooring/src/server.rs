//! The accept loop and session ID generation.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use crate::error::CommsResult;
use crate::handler::SessionHandler;
use crate::session::{Session, SessionId};

/// Generator of short, unique session IDs.
///
/// Each ID hashes a process-local counter together with the current
/// time in microseconds, truncated to 12 hex characters. The counter
/// guarantees uniqueness within one generator even when the clock
/// stalls or steps backwards.
#[derive(Debug, Default)]
pub struct SessionIds {
    counter: AtomicU64,
}

impl SessionIds {
    /// Create a new generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next session ID.
    pub fn next_id(&self) -> SessionId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or_default();
        let digest = Sha1::digest(format!("{n}.{micros}").as_bytes());
        let mut id = hex::encode(digest);
        id.truncate(12);
        SessionId::new(id)
    }
}

/// Source of accepted connection streams.
///
/// Implemented for [`tokio::net::TcpListener`] and, on Unix,
/// [`tokio::net::UnixListener`]; tests implement it over in-memory
/// duplex pipes.
#[async_trait]
pub trait Listener: Send + Sync {
    /// The stream type accepted connections yield.
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Wait for and accept one connection.
    async fn accept_stream(&self) -> std::io::Result<Self::Stream>;
}

#[async_trait]
impl Listener for tokio::net::TcpListener {
    type Stream = tokio::net::TcpStream;

    async fn accept_stream(&self) -> std::io::Result<Self::Stream> {
        let (stream, peer) = self.accept().await?;
        debug!(%peer, "accepted tcp connection");
        Ok(stream)
    }
}

#[cfg(unix)]
#[async_trait]
impl Listener for tokio::net::UnixListener {
    type Stream = tokio::net::UnixStream;

    async fn accept_stream(&self) -> std::io::Result<Self::Stream> {
        let (stream, _peer) = self.accept().await?;
        debug!("accepted unix connection");
        Ok(stream)
    }
}

/// Accept connections until the listener fails, handing each new
/// session to `handler` on its own task.
///
/// Every accepted stream is wrapped in a [`Session`] with a freshly
/// generated ID before the handler sees it. A handler error ends only
/// that session's task. Errors that indicate an intentionally closed
/// listener end the loop cleanly with `Ok(())`; any other accept error
/// is returned.
pub async fn serve<L, H>(listener: L, handler: Arc<H>) -> CommsResult<()>
where
    L: Listener,
    H: SessionHandler<L::Stream> + ?Sized + 'static,
{
    let ids = SessionIds::new();
    info!("server loop started");
    loop {
        match listener.accept_stream().await {
            Ok(stream) => {
                let session = Arc::new(Session::new(ids.next_id(), stream));
                debug!(session_id = %session.id(), "session accepted");
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(err) = handler.handle_session(Arc::clone(&session)).await {
                        warn!(session_id = %session.id(), error = %err, "session handler failed");
                    }
                });
            }
            Err(err) if listener_closed(&err) => {
                info!("listener closed; server loop ending");
                return Ok(());
            }
            Err(err) => {
                error!(error = %err, "accept failed");
                return Err(err.into());
            }
        }
    }
}

/// Like [`serve`], but also ends cleanly when `shutdown` resolves.
pub async fn serve_with_shutdown<L, H, F>(
    listener: L,
    handler: Arc<H>,
    shutdown: F,
) -> CommsResult<()>
where
    L: Listener,
    H: SessionHandler<L::Stream> + ?Sized + 'static,
    F: Future<Output = ()>,
{
    tokio::select! {
        result = serve(listener, handler) => result,
        () = shutdown => {
            info!("shutdown signal received; server loop ending");
            Ok(())
        }
    }
}

fn listener_closed(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::net::TcpStream;
    use tokio::sync::{mpsc, oneshot};
    use tokio::time::{sleep, timeout};

    use crate::error::CommsError;

    #[test]
    fn test_session_ids_are_twelve_hex_chars() {
        let ids = SessionIds::new();
        for _ in 0..10 {
            let id = ids.next_id();
            assert_eq!(id.as_str().len(), 12);
            assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_session_ids_unique() {
        let ids = SessionIds::new();
        let generated: HashSet<_> = (0..1000).map(|_| ids.next_id()).collect();
        assert_eq!(generated.len(), 1000);
    }

    /// Hands out queued duplex streams, then fails like a closed
    /// listener.
    struct StubListener {
        streams: tokio::sync::Mutex<mpsc::Receiver<DuplexStream>>,
    }

    #[async_trait]
    impl Listener for StubListener {
        type Stream = DuplexStream;

        async fn accept_stream(&self) -> std::io::Result<DuplexStream> {
            self.streams.lock().await.recv().await.ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "listener closed")
            })
        }
    }

    struct CollectingHandler {
        ids: Mutex<Vec<SessionId>>,
    }

    #[async_trait]
    impl SessionHandler<DuplexStream> for CollectingHandler {
        async fn handle_session(&self, session: Arc<Session<DuplexStream>>) -> CommsResult<()> {
            self.ids.lock().push(session.id().clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_serve_assigns_distinct_ids_and_ends_on_closed_listener() {
        let (tx, rx) = mpsc::channel(4);
        for _ in 0..3 {
            // The far end can drop; the handler never touches the stream.
            let (near, _far) = tokio::io::duplex(64);
            tx.send(near).await.unwrap();
        }
        drop(tx);

        let handler = Arc::new(CollectingHandler {
            ids: Mutex::new(Vec::new()),
        });
        let listener = StubListener {
            streams: tokio::sync::Mutex::new(rx),
        };

        timeout(Duration::from_secs(5), serve(listener, Arc::clone(&handler)))
            .await
            .expect("serve did not end")
            .unwrap();

        sleep(Duration::from_millis(20)).await;
        let ids = handler.ids.lock();
        assert_eq!(ids.len(), 3);
        let distinct: HashSet<_> = ids.iter().cloned().collect();
        assert_eq!(distinct.len(), 3);
    }

    struct FatalListener;

    #[async_trait]
    impl Listener for FatalListener {
        type Stream = DuplexStream;

        async fn accept_stream(&self) -> std::io::Result<DuplexStream> {
            Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "accept denied",
            ))
        }
    }

    #[tokio::test]
    async fn test_serve_surfaces_fatal_accept_errors() {
        let handler = Arc::new(CollectingHandler {
            ids: Mutex::new(Vec::new()),
        });
        let err = serve(FatalListener, handler).await.unwrap_err();
        assert!(matches!(err, CommsError::Io(_)));
    }

    struct GreetingHandler;

    #[async_trait]
    impl SessionHandler<TcpStream> for GreetingHandler {
        async fn handle_session(&self, session: Arc<Session<TcpStream>>) -> CommsResult<()> {
            session
                .write_message(&mooring_wire::Message::greeting(session.id().as_str()))
                .await
        }
    }

    #[tokio::test]
    async fn test_serve_with_shutdown_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let server = tokio::spawn(serve_with_shutdown(
            listener,
            Arc::new(GreetingHandler),
            async move {
                let _ = stop_rx.await;
            },
        ));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut line = String::new();
        {
            use tokio::io::AsyncBufReadExt;
            let mut reader = tokio::io::BufReader::new(&mut client);
            timeout(Duration::from_secs(2), reader.read_line(&mut line))
                .await
                .expect("greeting timed out")
                .unwrap();
        }
        assert!(line.contains("\"type\":\"greeting\""));
        client.shutdown().await.unwrap();

        stop_tx.send(()).unwrap();
        timeout(Duration::from_secs(5), server)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}
