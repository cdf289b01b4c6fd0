//! In-process transport.
//!
//! A [`MemoryFactory`] creates [`MemoryTransport`]s; every successful open
//! hands the server half, a [`MemoryPeer`], to the paired [`MemoryAcceptor`].
//! The accept behavior is scriptable through [`AcceptMode`], which makes the
//! pair suitable for driving sessions through refusals, slow opens and
//! crashes without a network.
//!
//! # Example
//!
//! ```ignore
//! let (factory, mut acceptor) = MemoryFactory::new();
//! let transport = factory.create();
//! let mut events = transport.open("mem://lsp").await?;
//!
//! let mut peer = acceptor.accept().await.unwrap();
//! transport.send("ping".into())?;
//! assert_eq!(peer.recv().await.as_deref(), Some("ping"));
//! peer.close(4003, "crashed");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::error::{Error, Result};

use super::{CloseReason, Transport, TransportEvent, TransportEvents, TransportFactory};

// ============================================================================
// Constants
// ============================================================================

/// Default bound for waiting on a ready signal.
const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// AcceptMode
// ============================================================================

/// How the next opens are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceptMode {
    /// Accept immediately.
    #[default]
    Accept,
    /// Fail the open with a transport error.
    Refuse,
    /// Never signal ready; the open fails with its timeout.
    Hang,
    /// Accept after the given delay.
    Delay(Duration),
}

// ============================================================================
// Hub
// ============================================================================

/// State shared by a factory, its transports and its acceptor.
struct Hub {
    /// Current accept behavior.
    mode: Mutex<AcceptMode>,
    /// Transports handed out.
    created: AtomicUsize,
    /// Opens that succeeded.
    opened: AtomicUsize,
    /// Bound applied to each open.
    open_timeout: Duration,
    /// Queue of accepted peers.
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

// ============================================================================
// MemoryFactory
// ============================================================================

/// Creates connected [`MemoryTransport`]s.
#[derive(Clone)]
pub struct MemoryFactory {
    /// Shared hub.
    hub: Arc<Hub>,
}

impl MemoryFactory {
    /// Creates a factory and its acceptor with the default open timeout.
    #[must_use]
    pub fn new() -> (Self, MemoryAcceptor) {
        Self::with_open_timeout(DEFAULT_OPEN_TIMEOUT)
    }

    /// Creates a factory and its acceptor with a custom open timeout.
    #[must_use]
    pub fn with_open_timeout(open_timeout: Duration) -> (Self, MemoryAcceptor) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Hub {
            mode: Mutex::new(AcceptMode::Accept),
            created: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            open_timeout,
            peers: peers_tx,
        });
        (Self { hub }, MemoryAcceptor { peers: peers_rx })
    }

    /// Sets how subsequent opens are answered.
    pub fn set_mode(&self, mode: AcceptMode) {
        *self.hub.mode.lock() = mode;
    }

    /// Returns the number of transports created so far.
    #[inline]
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.hub.created.load(Ordering::SeqCst)
    }

    /// Returns the number of successful opens so far.
    #[inline]
    #[must_use]
    pub fn opened_count(&self) -> usize {
        self.hub.opened.load(Ordering::SeqCst)
    }
}

impl TransportFactory for MemoryFactory {
    fn create(&self) -> Arc<dyn Transport> {
        self.hub.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(MemoryTransport {
            hub: Arc::clone(&self.hub),
            outgoing: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

// ============================================================================
// MemoryAcceptor
// ============================================================================

/// Receives the server half of every accepted open.
pub struct MemoryAcceptor {
    /// Accepted peers.
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryAcceptor {
    /// Waits for the next accepted open.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Returns an already accepted peer without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }
}

// ============================================================================
// MemoryTransport
// ============================================================================

/// Client half of an in-process channel.
pub struct MemoryTransport {
    /// Shared hub.
    hub: Arc<Hub>,
    /// Frames to the peer, present while open.
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Set once `close()` was called.
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, endpoint: &str) -> Result<TransportEvents> {
        let mode = *self.hub.mode.lock();
        match mode {
            AcceptMode::Accept => {}
            AcceptMode::Refuse => {
                return Err(Error::transport(format!("connection refused: {endpoint}")));
            }
            AcceptMode::Hang => {
                let never = std::future::pending::<()>();
                let _ = timeout(self.hub.open_timeout, never).await;
                return Err(Error::open_timeout(self.hub.open_timeout.as_millis() as u64));
            }
            AcceptMode::Delay(delay) => {
                if delay >= self.hub.open_timeout {
                    sleep(self.hub.open_timeout).await;
                    return Err(Error::open_timeout(
                        self.hub.open_timeout.as_millis() as u64,
                    ));
                }
                sleep(delay).await;
            }
        }

        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            endpoint: endpoint.to_string(),
            events: event_tx,
            incoming: outgoing_rx,
            client_closed: Arc::clone(&self.closed),
        };
        self.hub
            .peers
            .send(peer)
            .map_err(|_| Error::transport("no acceptor listening"))?;

        *self.outgoing.lock() = Some(outgoing_tx);
        self.hub.opened.fetch_add(1, Ordering::SeqCst);
        debug!(endpoint, "Memory transport opened");

        Ok(event_rx)
    }

    fn send(&self, frame: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        let outgoing = self.outgoing.lock();
        let outgoing = outgoing.as_ref().ok_or(Error::SessionClosed)?;
        outgoing.send(frame).map_err(|_| Error::SessionClosed)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender ends the peer's incoming stream.
        self.outgoing.lock().take();
    }
}

// ============================================================================
// MemoryPeer
// ============================================================================

/// Server half of an in-process channel.
pub struct MemoryPeer {
    /// Endpoint the client opened.
    endpoint: String,
    /// Events to the client.
    events: mpsc::UnboundedSender<TransportEvent>,
    /// Frames from the client.
    incoming: mpsc::UnboundedReceiver<String>,
    /// Client-side close flag.
    client_closed: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Returns the endpoint the client opened.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns `true` once the client closed its half.
    #[inline]
    #[must_use]
    pub fn is_client_closed(&self) -> bool {
        self.client_closed.load(Ordering::SeqCst)
    }

    /// Sends a text frame; returns `false` if the client is gone.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.emit(TransportEvent::Message(text.into()))
    }

    /// Sends a JSON value as a text frame.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send(value.to_string())
    }

    /// Closes the channel with a code.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Closed(CloseReason::new(code, reason)))
    }

    /// Drops the channel without a close code.
    pub fn drop_connection(&self) -> bool {
        self.emit(TransportEvent::Closed(CloseReason::abnormal("peer vanished")))
    }

    /// Fails the channel with a transport error.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(message.into()))
    }

    /// Waits for the next frame from the client.
    ///
    /// Returns `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Waits for the next frame from the client, parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Delivers an event unless the client already closed.
    fn emit(&self, event: TransportEvent) -> bool {
        if self.is_client_closed() {
            return false;
        }
        self.events.send(event).is_ok()
    }
}

// ============================================================================
// Tests
// ============================================================================
