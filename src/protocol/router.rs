//! Notification fan-out and server request handling.
//!
//! A [`NotificationRouter`] belongs to a session, not to a connection. Every
//! [`ProtocolClient`](super::ProtocolClient) the session opens dispatches into
//! the same router, so subscriptions survive reconnects.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::trace;

use crate::identifiers::SubscriptionId;

use super::message::{Notification, RpcError};

// ============================================================================
// Types
// ============================================================================

/// Callback invoked for each matching notification.
pub type NotificationHandler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Callback answering peer-initiated requests.
pub type RequestHandler =
    Arc<dyn Fn(&str, &Value) -> std::result::Result<Value, RpcError> + Send + Sync>;

/// A registered subscriber.
struct Subscriber {
    /// Method filter, `None` matches everything.
    method: Option<String>,
    /// Callback.
    handler: NotificationHandler,
}

/// Shared router state.
#[derive(Default)]
struct RouterInner {
    /// Registered subscribers.
    subscribers: RwLock<FxHashMap<SubscriptionId, Subscriber>>,
    /// Optional answerer for peer requests.
    request_handler: RwLock<Option<RequestHandler>>,
}

// ============================================================================
// NotificationRouter
// ============================================================================

/// Fans notifications out to subscribers.
///
/// Cheap to clone; clones share subscribers.
#[derive(Clone, Default)]
pub struct NotificationRouter {
    inner: Arc<RouterInner>,
}

impl fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("subscribers", &self.subscriber_count())
            .field("has_request_handler", &self.inner.request_handler.read().is_some())
            .finish()
    }
}

impl NotificationRouter {
    /// Creates an empty router.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every notification.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.insert(None, Arc::new(handler))
    }

    /// Subscribes to notifications of one method.
    pub fn subscribe_method<F>(&self, method: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.insert(Some(method.into()), Arc::new(handler))
    }

    /// Removes a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.write().remove(&id).is_some()
    }

    /// Returns the number of registered subscribers.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Sets the handler for peer-initiated requests.
    pub fn set_request_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &Value) -> std::result::Result<Value, RpcError> + Send + Sync + 'static,
    {
        *self.inner.request_handler.write() = Some(Arc::new(handler));
    }

    /// Removes the request handler.
    pub fn clear_request_handler(&self) {
        *self.inner.request_handler.write() = None;
    }

    /// Delivers a notification to every matching subscriber.
    ///
    /// Handlers run outside the lock, so they may subscribe or unsubscribe.
    pub fn dispatch(&self, notification: &Notification) {
        let handlers: Vec<NotificationHandler> = self
            .inner
            .subscribers
            .read()
            .values()
            .filter(|s| {
                s.method
                    .as_deref()
                    .is_none_or(|method| method == notification.method)
            })
            .map(|s| Arc::clone(&s.handler))
            .collect();

        trace!(
            method = %notification.method,
            subscribers = handlers.len(),
            "Dispatching notification"
        );

        for handler in handlers {
            handler(notification);
        }
    }

    /// Answers a peer-initiated request.
    ///
    /// Without a handler every request gets "method not found".
    pub fn handle_request(&self, method: &str, params: &Value) -> std::result::Result<Value, RpcError> {
        let handler = self.inner.request_handler.read().clone();
        match handler {
            Some(handler) => handler(method, params),
            None => Err(RpcError::method_not_found(method)),
        }
    }

    fn insert(&self, method: Option<String>, handler: NotificationHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.inner
            .subscribers
            .write()
            .insert(id, Subscriber { method, handler });
        id
    }
}

// ============================================================================
// Tests
// ============================================================================
