//! Composite status of a session group.
//!
//! The board keeps the latest status of every session and dispatches a
//! [`StatusSnapshot`] to listeners whenever one of them changes. Dispatch is
//! serialized by a re-entrant lock: snapshots reach listeners in the order
//! they were produced, and a listener may subscribe or unsubscribe from
//! inside its callback.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{ReentrantMutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::trace;

use crate::identifiers::{SessionId, SubscriptionId};
use crate::session::SessionStatus;

// ============================================================================
// Types
// ============================================================================

/// Callback receiving the composite status.
pub type GroupListener = Arc<dyn Fn(&StatusSnapshot) + Send + Sync>;

// ============================================================================
// StatusSnapshot
// ============================================================================

/// Status of every session in a group at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    sessions: FxHashMap<SessionId, SessionStatus>,
}

impl StatusSnapshot {
    /// Returns the status of one session.
    #[inline]
    #[must_use]
    pub fn get(&self, id: &str) -> Option<SessionStatus> {
        self.sessions.get(id).copied()
    }

    /// Iterates over `(id, status)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, SessionStatus)> {
        self.sessions.iter().map(|(id, status)| (id, *status))
    }

    /// Returns the number of sessions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if the group has no sessions.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Returns `true` if ANY session is connected.
    ///
    /// Use [`all_connected`](Self::all_connected) for the strict variant.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.sessions.values().any(|s| s.is_connected())
    }

    /// Returns `true` if every session is connected.
    #[must_use]
    pub fn all_connected(&self) -> bool {
        !self.sessions.is_empty() && self.sessions.values().all(|s| s.is_connected())
    }

    /// Returns the number of sessions in `status`.
    #[must_use]
    pub fn count(&self, status: SessionStatus) -> usize {
        self.sessions.values().filter(|s| **s == status).count()
    }
}

// ============================================================================
// StatusBoard
// ============================================================================

/// Latest statuses plus listeners.
pub(crate) struct StatusBoard {
    /// Serializes dispatch.
    dispatch: ReentrantMutex<()>,
    /// Latest statuses.
    statuses: RwLock<StatusSnapshot>,
    /// Registered listeners.
    listeners: RwLock<FxHashMap<SubscriptionId, GroupListener>>,
    /// Await-able copy of the latest snapshot.
    watch: watch::Sender<StatusSnapshot>,
}

impl StatusBoard {
    /// Creates a board with every session `Disconnected`.
    pub(crate) fn new<'a>(ids: impl IntoIterator<Item = &'a SessionId>) -> Self {
        let snapshot = StatusSnapshot {
            sessions: ids
                .into_iter()
                .map(|id| (id.clone(), SessionStatus::Disconnected))
                .collect(),
        };
        let (watch, _) = watch::channel(snapshot.clone());
        Self {
            dispatch: ReentrantMutex::new(()),
            statuses: RwLock::new(snapshot),
            listeners: RwLock::new(FxHashMap::default()),
            watch,
        }
    }

    /// Returns the latest snapshot.
    pub(crate) fn snapshot(&self) -> StatusSnapshot {
        self.statuses.read().clone()
    }

    /// Returns a receiver of snapshots.
    pub(crate) fn watch(&self) -> watch::Receiver<StatusSnapshot> {
        self.watch.subscribe()
    }

    /// Records a session status and notifies listeners if it changed.
    pub(crate) fn update(&self, id: &SessionId, status: SessionStatus) {
        let _dispatch = self.dispatch.lock();

        let snapshot = {
            let mut statuses = self.statuses.write();
            if statuses.sessions.get(id) == Some(&status) {
                return;
            }
            statuses.sessions.insert(id.clone(), status);
            statuses.clone()
        };

        self.watch.send_replace(snapshot.clone());

        let listeners: Vec<GroupListener> = self.listeners.read().values().cloned().collect();
        trace!(session = %id, %status, listeners = listeners.len(), "Dispatching group status");
        for listener in listeners {
            listener(&snapshot);
        }
    }

    /// Registers a listener and calls it with the current snapshot.
    pub(crate) fn subscribe(&self, listener: GroupListener) -> SubscriptionId {
        let _dispatch = self.dispatch.lock();

        let id = SubscriptionId::next();
        self.listeners.write().insert(id, Arc::clone(&listener));

        let snapshot = self.snapshot();
        listener(&snapshot);
        id
    }

    /// Removes a listener.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.write().remove(&id).is_some()
    }

    /// Returns the number of listeners.
    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Registration of a group listener.
///
/// Dropping it keeps the listener registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription {
    board: Weak<StatusBoard>,
    id: SubscriptionId,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Subscription {
    pub(crate) fn new(board: &Arc<StatusBoard>, id: SubscriptionId) -> Self {
        Self {
            board: Arc::downgrade(board),
            id,
        }
    }

    /// Returns the subscription id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Removes the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.board
            .upgrade()
            .is_some_and(|board| board.unsubscribe(self.id))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    fn board() -> Arc<StatusBoard> {
        let ids = [SessionId::new("pyright"), SessionId::new("ruff")];
        Arc::new(StatusBoard::new(ids.iter()))
    }

    #[test]
    fn test_initial_snapshot() {
        let board = board();
        let snapshot = board.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("pyright"), Some(SessionStatus::Disconnected));
        assert!(!snapshot.is_connected());
        assert!(!snapshot.all_connected());
    }

    #[test]
    fn test_any_connected_composite() {
        let board = board();
        board.update(&SessionId::new("pyright"), SessionStatus::Connected);
        board.update(&SessionId::new("ruff"), SessionStatus::Error);

        let snapshot = board.snapshot();
        assert!(snapshot.is_connected());
        assert!(!snapshot.all_connected());
        assert_eq!(snapshot.get("ruff"), Some(SessionStatus::Error));
        assert_eq!(snapshot.count(SessionStatus::Connected), 1);
    }

    #[test]
    fn test_subscribe_calls_immediately_then_on_change_only() {
        let board = board();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        board.subscribe(Arc::new(move |s: &StatusSnapshot| {
            sink.lock().push(s.get("pyright"));
        }));
        assert_eq!(calls.lock().len(), 1);

        board.update(&SessionId::new("pyright"), SessionStatus::Connecting);
        board.update(&SessionId::new("pyright"), SessionStatus::Connecting);
        board.update(&SessionId::new("pyright"), SessionStatus::Connected);

        assert_eq!(
            *calls.lock(),
            vec![
                Some(SessionStatus::Disconnected),
                Some(SessionStatus::Connecting),
                Some(SessionStatus::Connected),
            ]
        );
    }

    #[test]
    fn test_unsubscribe_via_subscription() {
        let board = board();
        let id = board.subscribe(Arc::new(|_: &StatusSnapshot| {}));
        let subscription = Subscription::new(&board, id);
        assert_eq!(board.listener_count(), 1);
        assert!(subscription.unsubscribe());
        assert_eq!(board.listener_count(), 0);
    }

    #[test]
    fn test_listener_may_subscribe_during_dispatch() {
        let board = board();
        let inner_board = Arc::clone(&board);
        let nested = Arc::new(Mutex::new(0usize));
        let nested_sink = Arc::clone(&nested);

        board.subscribe(Arc::new(move |s: &StatusSnapshot| {
            if s.is_connected() {
                let sink = Arc::clone(&nested_sink);
                inner_board.subscribe(Arc::new(move |_: &StatusSnapshot| {
                    *sink.lock() += 1;
                }));
            }
        }));

        board.update(&SessionId::new("ruff"), SessionStatus::Connected);
        assert_eq!(*nested.lock(), 1);
        assert_eq!(board.listener_count(), 2);
    }

    #[tokio::test]
    async fn test_watch_receives_updates() {
        let board = board();
        let mut rx = board.watch();
        board.update(&SessionId::new("ruff"), SessionStatus::Connected);
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_connected());
    }
}
