//! WebSocket client transport.
//!
//! Connects with tokio-tungstenite and splits the stream into two tasks:
//!
//! - **writer**: drains an outgoing queue, sends a close frame on `close()`
//! - **reader**: forwards text frames and the terminal close/error event
//!
//! The connect step is bounded by [`WebSocketTransport::open_timeout`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::{CloseReason, Transport, TransportEvent, TransportEvents, TransportFactory};

// ============================================================================
// Constants
// ============================================================================

/// Default bound for the WebSocket connect step.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// Types
// ============================================================================

/// Commands for the writer task.
enum WriterCommand {
    /// Send a text frame.
    Frame(String),
    /// Send a normal close frame and stop.
    Close,
}

// ============================================================================
// WebSocketTransport
// ============================================================================

/// WebSocket client implementing [`Transport`].
pub struct WebSocketTransport {
    /// Bound for the connect step.
    open_timeout: Duration,
    /// Writer queue, present while open.
    writer: Mutex<Option<mpsc::UnboundedSender<WriterCommand>>>,
    /// Set once `close()` was called; silences the reader.
    closed: Arc<AtomicBool>,
}

impl WebSocketTransport {
    /// Creates an unopened transport.
    #[inline]
    #[must_use]
    pub fn new(open_timeout: Duration) -> Self {
        Self {
            open_timeout,
            writer: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the connect timeout.
    #[inline]
    #[must_use]
    pub const fn open_timeout(&self) -> Duration {
        self.open_timeout
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(DEFAULT_OPEN_TIMEOUT)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, endpoint: &str) -> Result<TransportEvents> {
        let url = Url::parse(endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "WebSocket endpoint must use ws:// or wss://, got {endpoint}"
            )));
        }

        let (ws_stream, _) = timeout(self.open_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| Error::open_timeout(self.open_timeout.as_millis() as u64))??;

        if self.closed.load(Ordering::SeqCst) {
            // close() raced the handshake; do not hand out a live socket.
            return Err(Error::SessionClosed);
        }

        debug!(%url, "WebSocket connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WriterCommand>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        *self.writer.lock() = Some(writer_tx);

        // Writer task
        tokio::spawn(async move {
            while let Some(command) = writer_rx.recv().await {
                match command {
                    WriterCommand::Frame(text) => {
                        trace!(len = text.len(), "Sending frame");
                        if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                            warn!(error = %e, "Failed to send frame");
                            break;
                        }
                    }
                    WriterCommand::Close => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client closing".into(),
                        };
                        let _ = ws_write.send(Message::Close(Some(frame))).await;
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
            debug!("WebSocket writer terminated");
        });

        // Reader task
        let closed = Arc::clone(&self.closed);
        tokio::spawn(async move {
            let terminal = loop {
                let message = ws_read.next().await;
                if closed.load(Ordering::SeqCst) {
                    break None;
                }
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let _ = event_tx.send(TransportEvent::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            let _ = event_tx.send(TransportEvent::Message(text));
                        }
                        Err(_) => warn!("Dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(frame) => {
                                CloseReason::new(u16::from(frame.code), frame.reason.as_str())
                            }
                            None => CloseReason::abnormal("close frame without status"),
                        };
                        debug!(%reason, "WebSocket closed by remote");
                        break Some(TransportEvent::Closed(reason));
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        break Some(TransportEvent::Error(e.to_string()));
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break Some(TransportEvent::Closed(CloseReason::abnormal(
                            "stream ended",
                        )));
                    }
                    // Ping/Pong are answered by tungstenite
                    Some(Ok(_)) => {}
                }
            };

            if let Some(event) = terminal
                && !closed.load(Ordering::SeqCst)
            {
                let _ = event_tx.send(event);
            }
            debug!("WebSocket reader terminated");
        });

        Ok(event_rx)
    }

    fn send(&self, frame: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        let writer = self.writer.lock();
        let writer = writer.as_ref().ok_or(Error::SessionClosed)?;
        writer
            .send(WriterCommand::Frame(frame))
            .map_err(|_| Error::SessionClosed)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(writer) = self.writer.lock().take() {
            let _ = writer.send(WriterCommand::Close);
        }
        debug!("WebSocket transport closed");
    }
}

// ============================================================================
// WebSocketFactory
// ============================================================================

/// Creates [`WebSocketTransport`]s with a shared connect timeout.
#[derive(Debug, Clone, Copy)]
pub struct WebSocketFactory {
    /// Bound for each connect step.
    open_timeout: Duration,
}

impl WebSocketFactory {
    /// Creates a factory.
    #[inline]
    #[must_use]
    pub const fn new(open_timeout: Duration) -> Self {
        Self { open_timeout }
    }
}

impl Default for WebSocketFactory {
    fn default() -> Self {
        Self::new(DEFAULT_OPEN_TIMEOUT)
    }
}

impl TransportFactory for WebSocketFactory {
    fn create(&self) -> Arc<dyn Transport> {
        Arc::new(WebSocketTransport::new(self.open_timeout))
    }
}

// ============================================================================
// Tests
// ============================================================================
