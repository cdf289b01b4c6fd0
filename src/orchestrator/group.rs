//! Sessions serving one target.
//!
//! A [`SessionGroup`] is what the rest of an application holds: one handle
//! over every session of a target, with a composite status and a single
//! lifecycle.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{SessionId, TargetId};
use crate::session::{SessionConnection, SessionSnapshot, StatusListener};
use crate::transport::TransportFactory;

use super::BackendRestarter;
use super::board::{StatusBoard, StatusSnapshot, Subscription};
use super::builder::SessionDescriptor;

// ============================================================================
// SessionGroup
// ============================================================================

/// Shared group state.
struct GroupInner {
    /// Target served by every session.
    target: TargetId,
    /// Sessions in declaration order.
    sessions: Vec<SessionConnection>,
    /// Composite status.
    board: Arc<StatusBoard>,
    /// Optional administrative restart hook.
    restarter: Option<Arc<dyn BackendRestarter>>,
    /// Set by `dispose()`, cleared by `restart()`.
    disposed: AtomicBool,
}

/// Handle over all sessions of one target.
///
/// Cheap to clone. Dropping every handle stops the sessions.
#[derive(Clone)]
pub struct SessionGroup {
    inner: Arc<GroupInner>,
}

impl fmt::Debug for SessionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGroup")
            .field("target", &self.inner.target)
            .field("sessions", &self.session_ids())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl SessionGroup {
    /// Spawns one session per descriptor. Nothing connects yet.
    pub(crate) fn spawn(
        target: TargetId,
        descriptors: &[SessionDescriptor],
        transport: &Arc<dyn TransportFactory>,
        restarter: Option<Arc<dyn BackendRestarter>>,
    ) -> Self {
        let board = Arc::new(StatusBoard::new(descriptors.iter().map(|d| &d.id)));

        let sessions = descriptors
            .iter()
            .map(|descriptor| {
                let board = Arc::clone(&board);
                let listener: StatusListener =
                    Arc::new(move |id: &SessionId, snapshot: &SessionSnapshot| {
                        board.update(id, snapshot.status);
                    });
                SessionConnection::with_listener(
                    descriptor.id.clone(),
                    descriptor.endpoint_for(&target),
                    Arc::clone(transport),
                    descriptor.options.clone(),
                    listener,
                )
            })
            .collect();

        Self {
            inner: Arc::new(GroupInner {
                target,
                sessions,
                board,
                restarter,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Issues `connect()` to every session.
    pub(crate) fn connect_all(&self) {
        debug!(target_id = %self.inner.target, sessions = self.inner.sessions.len(), "Connecting group");
        for session in &self.inner.sessions {
            session.connect();
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Returns the target.
    #[inline]
    #[must_use]
    pub fn target(&self) -> &TargetId {
        &self.inner.target
    }

    /// Returns `true` if both handles refer to the same group.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns `true` after [`dispose`](Self::dispose) until the next restart.
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Disposes every session.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(target_id = %self.inner.target, "Disposing session group");
        for session in &self.inner.sessions {
            session.dispose();
        }
    }

    /// Restarts every session with a fresh transport.
    pub fn restart(&self) {
        self.inner.disposed.store(false, Ordering::SeqCst);
        info!(target_id = %self.inner.target, "Restarting session group");
        for session in &self.inner.sessions {
            session.restart();
        }
    }

    /// Restarts one session, asking the backend to restart its process first.
    ///
    /// The local session is restarted whether or not the backend hook
    /// succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionClosed`] if the group was disposed
    /// - [`Error::SessionNotFound`] if `id` is not part of the group
    /// - [`Error::BackendRestart`] if the hook failed
    pub async fn restart_session(&self, id: &str) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::SessionClosed);
        }

        let session = self
            .session(id)
            .ok_or_else(|| Error::session_not_found(SessionId::new(id)))?;

        let outcome = match &self.inner.restarter {
            Some(restarter) => restarter.restart_backend(session.id(), &self.inner.target).await,
            None => Ok(()),
        };

        session.restart();

        outcome.map_err(|e| {
            warn!(session = %session.id(), target_id = %self.inner.target, error = %e, "Backend restart failed");
            Error::backend_restart(session.id().clone(), e.to_string())
        })
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Returns the status of every session.
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        self.inner.board.snapshot()
    }

    /// Returns `true` if ANY session is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Returns `true` if every session is connected.
    #[must_use]
    pub fn all_connected(&self) -> bool {
        self.status().all_connected()
    }

    /// Registers a listener for composite status changes.
    ///
    /// The listener is called right away with the current snapshot, then
    /// synchronously on every session status change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StatusSnapshot) + Send + Sync + 'static,
    {
        let id = self.inner.board.subscribe(Arc::new(listener));
        Subscription::new(&self.inner.board, id)
    }

    /// Returns a receiver of composite snapshots.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.board.watch()
    }

    /// Waits until the composite status satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// [`Error::SessionClosed`] if the group went away first.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<StatusSnapshot>
    where
        F: FnMut(&StatusSnapshot) -> bool,
    {
        let mut rx = self.watch();
        let snapshot = rx
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| Error::SessionClosed)?;
        Ok((*snapshot).clone())
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Returns one session.
    #[must_use]
    pub fn session(&self, id: &str) -> Option<SessionConnection> {
        self.inner
            .sessions
            .iter()
            .find(|s| s.id().as_str() == id)
            .cloned()
    }

    /// Returns the session ids in declaration order.
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.sessions.iter().map(|s| s.id().clone()).collect()
    }

    /// Iterates over the sessions in declaration order.
    pub fn sessions(&self) -> impl Iterator<Item = &SessionConnection> {
        self.inner.sessions.iter()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::backoff::{BackoffConfig, FixedJitter};
    use crate::protocol::NoHandshake;
    use crate::session::{SessionOptions, SessionStatus};
    use crate::transport::{MemoryAcceptor, MemoryFactory};

    fn options() -> SessionOptions {
        SessionOptions::language_server()
            .with_handshake(NoHandshake)
            .with_jitter(FixedJitter::new(0.0))
            .with_backoff(BackoffConfig::new(2, 1000, 30_000, 0.3).unwrap())
    }

    fn group_with(
        restarter: Option<Arc<dyn BackendRestarter>>,
    ) -> (SessionGroup, MemoryFactory, MemoryAcceptor) {
        let (factory, acceptor) = MemoryFactory::new();
        let transport: Arc<dyn TransportFactory> = Arc::new(factory.clone());
        let descriptors = [
            SessionDescriptor::new("pyright", "mem://{session}/{target}").with_options(options()),
            SessionDescriptor::new("ruff", "mem://{session}/{target}").with_options(options()),
        ];
        let group = SessionGroup::spawn(TargetId::new("p1"), &descriptors, &transport, restarter);
        (group, factory, acceptor)
    }

    #[derive(Debug, Default)]
    struct RecordingRestarter {
        calls: Mutex<Vec<(SessionId, TargetId)>>,
        fail: bool,
    }

    #[async_trait]
    impl BackendRestarter for RecordingRestarter {
        async fn restart_backend(&self, session_id: &SessionId, target: &TargetId) -> Result<()> {
            self.calls.lock().push((session_id.clone(), target.clone()));
            if self.fail {
                Err(Error::transport("backend unreachable"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_all_and_endpoints() {
        let (group, _factory, mut acceptor) = group_with(None);
        group.connect_all();
        group.wait_for(StatusSnapshot::all_connected).await.unwrap();

        let mut endpoints = vec![
            acceptor.accept().await.unwrap().endpoint().to_string(),
            acceptor.accept().await.unwrap().endpoint().to_string(),
        ];
        endpoints.sort();
        assert_eq!(endpoints, vec!["mem://pyright/p1", "mem://ruff/p1"]);
        assert!(group.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_immediate_then_changes() {
        let (group, _factory, _acceptor) = group_with(None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = group.subscribe(move |s| sink.lock().push(s.count(SessionStatus::Connected)));
        assert_eq!(*seen.lock(), vec![0]);

        group.connect_all();
        group.wait_for(StatusSnapshot::all_connected).await.unwrap();
        assert_eq!(seen.lock().last(), Some(&2));

        assert!(subscription.unsubscribe());
        let before = seen.lock().len();
        group.dispose();
        group.wait_for(|s| s.count(SessionStatus::Disconnected) == 2).await.unwrap();
        assert_eq!(seen.lock().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_connected_one_error_is_connected() {
        let (group, factory, mut acceptor) = group_with(None);
        group.connect_all();
        group.wait_for(StatusSnapshot::all_connected).await.unwrap();

        // Every later open is refused, so only the dropped session fails.
        factory.set_mode(crate::transport::AcceptMode::Refuse);
        let first = acceptor.accept().await.unwrap();
        let _second = acceptor.accept().await.unwrap();
        let failed = first.endpoint().to_string();
        first.drop_connection();

        let snapshot = group
            .wait_for(|s| s.count(SessionStatus::Error) == 1)
            .await
            .unwrap();
        let session = group.session(if failed.contains("pyright") { "pyright" } else { "ruff" }).unwrap();
        session
            .wait_for(|s| matches!(s.last_error.as_deref(), Some(Error::MaxReconnectAttemptsExceeded { .. })))
            .await
            .unwrap();

        assert!(snapshot.is_connected());
        assert!(group.is_connected());
        assert!(!group.all_connected());
        assert_eq!(group.status().count(SessionStatus::Connected), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_session_calls_backend_then_reconnects() {
        let restarter = Arc::new(RecordingRestarter::default());
        let (group, factory, _acceptor) = group_with(Some(restarter.clone()));
        group.connect_all();
        group.wait_for(StatusSnapshot::all_connected).await.unwrap();

        group.restart_session("ruff").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        group.wait_for(StatusSnapshot::all_connected).await.unwrap();

        assert_eq!(
            *restarter.calls.lock(),
            vec![(SessionId::new("ruff"), TargetId::new("p1"))]
        );
        assert_eq!(factory.created_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_session_refused_after_dispose() {
        let restarter = Arc::new(RecordingRestarter::default());
        let (group, factory, _acceptor) = group_with(Some(restarter.clone()));
        group.connect_all();
        group.wait_for(StatusSnapshot::all_connected).await.unwrap();

        group.dispose();
        group.wait_for(|s| s.count(SessionStatus::Disconnected) == 2).await.unwrap();

        let err = group.restart_session("ruff").await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed));
        assert!(group.is_disposed());
        assert!(restarter.calls.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(group.status().count(SessionStatus::Disconnected), 2);
        assert_eq!(factory.created_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_session_failure_still_restarts_locally() {
        let restarter = Arc::new(RecordingRestarter {
            fail: true,
            ..Default::default()
        });
        let (group, factory, _acceptor) = group_with(Some(restarter));
        group.connect_all();
        group.wait_for(StatusSnapshot::all_connected).await.unwrap();

        let err = group.restart_session("pyright").await.unwrap_err();
        assert!(matches!(err, Error::BackendRestart { .. }));

        tokio::time::sleep(Duration::from_millis(10)).await;
        group.wait_for(StatusSnapshot::all_connected).await.unwrap();
        assert_eq!(factory.created_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_unknown_session() {
        let (group, _factory, _acceptor) = group_with(None);
        let err = group.restart_session("mypy").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_then_restart() {
        let (group, factory, _acceptor) = group_with(None);
        group.connect_all();
        group.wait_for(StatusSnapshot::all_connected).await.unwrap();

        group.dispose();
        group.dispose();
        assert!(group.is_disposed());
        group.wait_for(|s| !s.is_connected()).await.unwrap();

        group.restart();
        assert!(!group.is_disposed());
        group.wait_for(StatusSnapshot::all_connected).await.unwrap();
        assert_eq!(factory.created_count(), 4);
    }
}
