//! Protocol client and event loop.
//!
//! A [`ProtocolClient`] sits on top of one opened transport and handles
//! request/response correlation, notification routing and replies to
//! peer-initiated requests.
//!
//! # Event Loop
//!
//! [`ProtocolClient::listen`] spawns a tokio task that handles:
//!
//! - Responses, resolved by [`RequestId`] in any order
//! - Notifications, handed to one-shot waiters and the shared router
//! - Peer requests, answered through the router's request handler
//! - The terminal close/error event, reported once through [`Disconnect`]
//!
//! Requests are written straight to the transport; the loop only reads.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{Notify, oneshot};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{RequestId, SessionId};
use crate::transport::{CloseReason, Transport, TransportEvent, TransportEvents};

use super::codec::Codec;
use super::message::{Incoming, Notification};
use super::router::NotificationRouter;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum pending requests before rejecting new ones.
pub const MAX_PENDING_REQUESTS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// An outstanding request.
struct PendingRequest {
    /// Method, for logs and timeout errors.
    method: String,
    /// When the request was written.
    issued_at: Instant,
    /// Resolves the waiting caller.
    responder: oneshot::Sender<Result<Value>>,
}

/// Map of request IDs to pending requests.
type CorrelationMap = FxHashMap<RequestId, PendingRequest>;

/// One-shot waiters for a notification method.
type WaiterList = Vec<(String, oneshot::Sender<Value>)>;

/// Why a listening client stopped.
///
/// Not produced when the client was closed locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// The transport closed.
    Closed(CloseReason),
    /// The transport failed.
    Failed(String),
}

// ============================================================================
// ProtocolClient
// ============================================================================

/// Shared client state.
struct ClientInner {
    /// Owning session, for logs.
    session_id: SessionId,
    /// The opened transport.
    transport: Arc<dyn Transport>,
    /// Wire format.
    codec: Arc<dyn Codec>,
    /// Session-wide subscribers.
    router: NotificationRouter,
    /// Default per-request timeout.
    request_timeout: Duration,
    /// Next request id.
    next_id: AtomicU64,
    /// Outstanding requests.
    correlation: Mutex<CorrelationMap>,
    /// One-shot notification waiters.
    waiters: Mutex<WaiterList>,
    /// Set once closed, locally or by the peer.
    closed: AtomicBool,
    /// Stops the event loop on local close.
    shutdown: Notify,
}

/// Request/response client over one opened transport.
///
/// # Thread Safety
///
/// `ProtocolClient` is `Send + Sync` and cheap to clone. Clones share the
/// correlation table.
#[derive(Clone)]
pub struct ProtocolClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("session_id", &self.inner.session_id)
            .field("codec", &self.inner.codec.name())
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ProtocolClient {
    /// Creates a client over an opened transport.
    ///
    /// Nothing is read until [`listen`](Self::listen) is called, so waiters
    /// registered before that cannot miss a frame.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
        router: NotificationRouter,
        request_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                session_id,
                transport,
                codec,
                router,
                request_timeout,
                next_id: AtomicU64::new(1),
                correlation: Mutex::new(CorrelationMap::default()),
                waiters: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
            }),
        }
    }

    /// Spawns the event loop over the transport's events.
    ///
    /// The returned receiver yields once if the peer closes or the transport
    /// fails. It is dropped without a value after a local [`close`](Self::close).
    pub fn listen(&self, events: TransportEvents) -> oneshot::Receiver<Disconnect> {
        let (disconnect_tx, disconnect_rx) = oneshot::channel();
        tokio::spawn(Self::run_event_loop(
            Arc::clone(&self.inner),
            events,
            disconnect_tx,
        ));
        disconnect_rx
    }

    /// Returns the owning session id.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    /// Returns the default request timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.correlation.lock().len()
    }

    /// Returns `true` once the client was closed or the transport went away.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Sends a request and waits for the response with the default timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionClosed`] if the transport closed
    /// - [`Error::RequestTimeout`] if no response arrived in time
    /// - [`Error::TooManyPendingRequests`] if the table is full
    /// - [`Error::Rpc`] if the peer answered with an error
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.request_with_timeout(method, params, self.inner.request_timeout)
            .await
    }

    /// Sends a request and waits for the response with a custom timeout.
    ///
    /// A timeout fails only this caller; the transport stays up and a late
    /// response is dropped.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request).
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        request_timeout: Duration,
    ) -> Result<Value> {
        let inner = &self.inner;
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }

        let request_id = RequestId::new(inner.next_id.fetch_add(1, Ordering::Relaxed));
        let frame = inner.codec.encode_request(request_id, method, &params)?;

        let (responder, response_rx) = oneshot::channel();

        // Check pending request limit
        {
            let mut correlation = inner.correlation.lock();
            if correlation.len() >= MAX_PENDING_REQUESTS {
                warn!(
                    session = %inner.session_id,
                    pending = correlation.len(),
                    max = MAX_PENDING_REQUESTS,
                    "Too many pending requests"
                );
                return Err(Error::TooManyPendingRequests {
                    limit: MAX_PENDING_REQUESTS,
                });
            }
            correlation.insert(
                request_id,
                PendingRequest {
                    method: method.to_string(),
                    issued_at: Instant::now(),
                    responder,
                },
            );
        }

        // Removes the entry however this call ends, including cancellation.
        let _entry = PendingGuard {
            inner,
            request_id,
        };

        // A close between the first check and the insert already drained the table.
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }

        inner.transport.send(frame)?;
        trace!(session = %inner.session_id, %request_id, method, "Request sent");

        match timeout(request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => {
                warn!(
                    session = %inner.session_id,
                    %request_id,
                    method,
                    timeout_ms = request_timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(Error::request_timeout(
                    request_id,
                    method,
                    request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Sends a notification.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionClosed`] if the transport closed
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        let frame = self.inner.codec.encode_notification(method, &params)?;
        self.inner.transport.send(frame)?;
        trace!(session = %self.inner.session_id, method, "Notification sent");
        Ok(())
    }

    /// Registers a one-shot waiter for the next notification of `method`.
    ///
    /// The receiver errors if the client closes first.
    pub fn wait_notification(&self, method: impl Into<String>) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        if !self.is_closed() {
            self.inner.waiters.lock().push((method.into(), tx));
        }
        rx
    }

    /// Closes the client and its transport.
    ///
    /// Pending requests fail with [`Error::SessionClosed`]. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.notify_one();
        self.inner.transport.close();
        Self::fail_pending(&self.inner);
        debug!(session = %self.inner.session_id, "Protocol client closed");
    }

    /// Event loop that handles inbound transport events.
    async fn run_event_loop(
        inner: Arc<ClientInner>,
        mut events: TransportEvents,
        disconnect_tx: oneshot::Sender<Disconnect>,
    ) {
        let disconnect = loop {
            tokio::select! {
                // Local close
                () = inner.shutdown.notified() => break None,

                // Events from the transport
                event = events.recv() => match event {
                    Some(TransportEvent::Message(text)) => Self::handle_incoming(&inner, &text),
                    Some(TransportEvent::Closed(reason)) => {
                        debug!(session = %inner.session_id, %reason, "Transport closed");
                        break Some(Disconnect::Closed(reason));
                    }
                    Some(TransportEvent::Error(message)) => {
                        debug!(session = %inner.session_id, error = %message, "Transport failed");
                        break Some(Disconnect::Failed(message));
                    }
                    None => {
                        break Some(Disconnect::Closed(CloseReason::abnormal(
                            "event stream ended",
                        )));
                    }
                },
            }
        };

        if let Some(disconnect) = disconnect
            && !inner.closed.swap(true, Ordering::SeqCst)
        {
            inner.transport.close();
            Self::fail_pending(&inner);
            let _ = disconnect_tx.send(disconnect);
        }

        debug!(session = %inner.session_id, "Event loop terminated");
    }

    /// Handles one inbound frame.
    fn handle_incoming(inner: &ClientInner, text: &str) {
        trace!(session = %inner.session_id, len = text.len(), "Frame received");

        let incoming = match inner.codec.decode(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(session = %inner.session_id, error = %e, "Dropping undecodable frame");
                return;
            }
        };

        match incoming {
            Incoming::Response { id, outcome } => {
                let pending = inner.correlation.lock().remove(&id);
                match pending {
                    Some(pending) => {
                        trace!(
                            session = %inner.session_id,
                            request_id = %id,
                            method = %pending.method,
                            elapsed_ms = pending.issued_at.elapsed().as_millis() as u64,
                            "Response received"
                        );
                        let _ = pending.responder.send(outcome.map_err(Error::from));
                    }
                    None => {
                        warn!(session = %inner.session_id, request_id = %id, "Response for unknown request");
                    }
                }
            }

            Incoming::Notification(notification) => {
                Self::resolve_waiters(inner, &notification);
                inner.router.dispatch(&notification);
            }

            Incoming::Request { id, method, params } => {
                let outcome = inner.router.handle_request(&method, &params);
                let frame = match inner.codec.encode_response(&id, &outcome) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(session = %inner.session_id, %method, error = %e, "Cannot answer peer request");
                        return;
                    }
                };
                if let Err(e) = inner.transport.send(frame) {
                    warn!(session = %inner.session_id, %method, error = %e, "Failed to send reply");
                }
            }
        }
    }

    /// Completes every waiter registered for the notification's method.
    fn resolve_waiters(inner: &ClientInner, notification: &Notification) {
        let matched: Vec<oneshot::Sender<Value>> = {
            let mut waiters = inner.waiters.lock();
            let (matched, rest): (WaiterList, WaiterList) = waiters
                .drain(..)
                .partition(|(method, _)| *method == notification.method);
            *waiters = rest;
            matched.into_iter().map(|(_, tx)| tx).collect()
        };
        for tx in matched {
            let _ = tx.send(notification.params.clone());
        }
    }

    /// Fails all pending requests with [`Error::SessionClosed`].
    fn fail_pending(inner: &ClientInner) {
        let pending: Vec<_> = inner.correlation.lock().drain().collect();
        let count = pending.len();

        for (_, request) in pending {
            let _ = request.responder.send(Err(Error::SessionClosed));
        }
        inner.waiters.lock().clear();

        if count > 0 {
            debug!(session = %inner.session_id, count, "Failed pending requests on close");
        }
    }
}

// ============================================================================
// PendingGuard
// ============================================================================

/// Drops a correlation entry when its caller stops waiting.
struct PendingGuard<'a> {
    inner: &'a ClientInner,
    request_id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self
            .inner
            .correlation
            .lock()
            .remove(&self.request_id)
            .is_some()
        {
            debug!(request_id = %self.request_id, "Removed abandoned correlation");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
