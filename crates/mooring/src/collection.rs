//! The session registry.
//!
//! [`SessionCollection`] is the only globally shared mutable state in
//! the core: a concurrency-safe map from session ID to session, plus
//! ordered `on_add`/`on_remove` observer lists. The map and the
//! observer lists are guarded by separate locks so an observer that
//! itself touches the collection cannot deadlock against the
//! registration path.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::{CommsError, CommsResult};
use crate::session::{Session, SessionId};

/// Observer invoked with a session on add or remove.
pub type SessionObserver<S> = Arc<dyn Fn(&Arc<Session<S>>) + Send + Sync>;

/// A concurrency-safe registry of live sessions.
///
/// Sessions are owned by the collection; a registered session carries
/// only a weak back-reference used to deregister itself when it
/// closes.
///
/// # Example
///
/// ```ignore
/// use mooring::SessionCollection;
///
/// let sessions = SessionCollection::new();
/// sessions.on_add(std::sync::Arc::new(|s| {
///     println!("session {} joined", s.id());
/// }));
/// sessions.add(session)?;
/// ```
pub struct SessionCollection<S = tokio::net::TcpStream> {
    /// Live sessions by ID.
    sessions: RwLock<HashMap<SessionId, Arc<Session<S>>>>,
    /// Observers fired synchronously when a session is added.
    on_add: RwLock<Vec<SessionObserver<S>>>,
    /// Observers fired when a session deregisters by closing.
    on_remove: RwLock<Vec<SessionObserver<S>>>,
}

impl<S> SessionCollection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create a new, empty collection.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            on_add: RwLock::new(Vec::new()),
            on_remove: RwLock::new(Vec::new()),
        })
    }

    /// Check whether a session with this ID is registered.
    pub fn has(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Look up a session by ID.
    pub fn get(&self, id: &str) -> Option<Arc<Session<S>>> {
        self.sessions.read().get(id).cloned()
    }

    /// The number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Register a session.
    ///
    /// Fails with [`CommsError::SessionExists`] if the ID is already
    /// present, leaving the collection unchanged. On success the
    /// session's close observer is pointed at this collection (weakly,
    /// so a closed session never keeps the registry alive), and every
    /// registered `on_add` observer runs synchronously, in
    /// registration order, before `add` returns. Observers commonly
    /// start the per-session reading task, so nothing may arrive
    /// before they are wired.
    pub fn add(self: &Arc<Self>, session: Arc<Session<S>>) -> CommsResult<()> {
        {
            let mut sessions = self.sessions.write();
            if sessions.contains_key(session.id().as_str()) {
                return Err(CommsError::session_exists(session.id().as_str()));
            }
            let registry = Arc::downgrade(self);
            session.on_close(Box::new(move |closing| {
                if let Some(collection) = registry.upgrade() {
                    collection.deregister(closing.id());
                }
            }));
            sessions.insert(session.id().clone(), Arc::clone(&session));
        }
        debug!(session_id = %session.id(), total = self.len(), "session added");

        let observers: Vec<_> = self.on_add.read().clone();
        for observer in &observers {
            observer(&session);
        }
        Ok(())
    }

    /// Remove a session by ID. Removing an absent ID is a no-op; no
    /// observers fire (only close-driven deregistration notifies
    /// `on_remove`).
    pub fn remove(&self, id: &str) {
        self.sessions.write().remove(id);
    }

    /// Close-driven removal: delete the entry and notify `on_remove`
    /// observers if the session was registered.
    fn deregister(&self, id: &SessionId) {
        let removed = self.sessions.write().remove(id.as_str());
        if let Some(session) = removed {
            debug!(session_id = %id, "session removed");
            let observers: Vec<_> = self.on_remove.read().clone();
            for observer in &observers {
                observer(&session);
            }
        }
    }

    /// Register an observer for future session additions. Past
    /// additions are not replayed.
    pub fn on_add(&self, observer: SessionObserver<S>) {
        self.on_add.write().push(observer);
    }

    /// Register an observer for future session removals. Past
    /// removals are not replayed.
    pub fn on_remove(&self, observer: SessionObserver<S>) {
        self.on_remove.write().push(observer);
    }

    /// Run a callback once per currently registered session, each as
    /// an independent task, and wait for all of them.
    ///
    /// One session's slow or panicking callback neither blocks nor
    /// fails the others, but the call returns only after the slowest
    /// finishes.
    pub async fn map<F, Fut>(&self, f: F)
    where
        F: Fn(Arc<Session<S>>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        let mut tasks = JoinSet::new();
        for session in sessions {
            tasks.spawn(f(session));
        }
        // Panicked callbacks surface as join errors and are dropped.
        while tasks.join_next().await.is_some() {}
    }
}

impl<S> std::fmt::Debug for SessionCollection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCollection")
            .field("len", &self.sessions.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::io::{duplex, DuplexStream};

    fn session(id: &str) -> (Arc<Session<DuplexStream>>, DuplexStream) {
        let (near, far) = duplex(4096);
        (Arc::new(Session::new(id, near)), far)
    }

    #[tokio::test]
    async fn test_add_and_query() {
        let collection = SessionCollection::new();
        assert!(!collection.has("s1"));
        assert!(collection.get("s1").is_none());

        let (s1, _far) = session("s1");
        collection.add(s1).unwrap();

        assert!(collection.has("s1"));
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.get("s1").unwrap().id().as_str(), "s1");
    }

    #[tokio::test]
    async fn test_add_duplicate_id_rejected() {
        let collection = SessionCollection::new();
        let (s1, _far1) = session("s1");
        collection.add(s1).unwrap();

        let (dup, _far2) = session("s1");
        let err = collection.add(dup).unwrap_err();
        assert!(matches!(err, CommsError::SessionExists { .. }));
        assert_eq!(collection.len(), 1);
    }

    #[tokio::test]
    async fn test_on_add_observers_run_in_order_before_return() {
        let collection = SessionCollection::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let order = Arc::clone(&order);
            collection.on_add(Arc::new(move |s: &Arc<Session<DuplexStream>>| {
                order.lock().push(format!("{tag}:{}", s.id()));
            }));
        }

        let (s1, _far) = session("s1");
        collection.add(s1).unwrap();
        assert_eq!(*order.lock(), vec!["first:s1", "second:s1"]);
    }

    #[tokio::test]
    async fn test_observers_do_not_replay_past_events() {
        let collection = SessionCollection::new();
        let (s1, _far1) = session("s1");
        collection.add(s1).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        collection.on_add(Arc::new(move |_s| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        let (s2, _far2) = session("s2");
        collection.add(s2).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_deregisters_and_fires_on_remove_once() {
        let collection = SessionCollection::new();
        let removed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&removed);
        collection.on_remove(Arc::new(move |_s| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let (s, _far) = session("s1");
        collection.add(Arc::clone(&s)).unwrap();

        s.close().await.unwrap();
        assert!(!collection.has("s1"));
        assert_eq!(removed.load(Ordering::SeqCst), 1);

        // A second close is a no-op.
        s.close().await.unwrap();
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent_and_silent() {
        let collection = SessionCollection::new();
        let removed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&removed);
        collection.on_remove(Arc::new(move |_s| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let (s1, _far) = session("s1");
        collection.add(s1).unwrap();
        collection.remove("s1");
        collection.remove("s1");

        assert_eq!(collection.len(), 0);
        assert_eq!(removed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_map_visits_every_session_and_waits() {
        let collection = SessionCollection::new();
        let mut far_ends = Vec::new();
        for id in ["s1", "s2", "s3"] {
            let (s, far) = session(id);
            collection.add(s).unwrap();
            far_ends.push(far);
        }

        let visited = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&visited);
        collection
            .map(move |_s| {
                let counter = Arc::clone(&counter);
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        assert_eq!(visited.load(Ordering::SeqCst), 3);
    }
}
