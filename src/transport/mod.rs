//! Duplex transport layer.
//!
//! This module defines the contract a session drives and ships two
//! implementations of it.
//!
//! # Contract
//!
//! ```text
//! ┌──────────────────┐   open(endpoint) ──►  ┌──────────────────┐
//! │ SessionConnection│   send(frame)    ──►  │    Transport     │ ◄──► peer
//! │ / ProtocolClient │   close()        ──►  │                  │
//! │                  │ ◄── TransportEvent    │                  │
//! └──────────────────┘  Message/Closed/Error └──────────────────┘
//! ```
//!
//! Obligations of every [`Transport`]:
//!
//! - `open()` never hangs: it fails with [`Error::OpenTimeout`](crate::Error::OpenTimeout)
//!   when no ready signal arrives within its bound.
//! - `close()` is idempotent.
//! - After `close()` no further events are delivered.
//! - One instance is opened at most once; a [`TransportFactory`] creates a
//!   fresh instance for every open.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `websocket` | tokio-tungstenite client transport |
//! | `memory` | In-process transport with a scriptable peer |

// ============================================================================
// Submodules
// ============================================================================

/// In-process transport pair.
pub mod memory;

/// WebSocket client transport.
pub mod websocket;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashSet;
use tokio::sync::mpsc;

use crate::error::Result;

// ============================================================================
// Re-exports
// ============================================================================

pub use memory::{AcceptMode, MemoryAcceptor, MemoryFactory, MemoryPeer, MemoryTransport};
pub use websocket::{WebSocketFactory, WebSocketTransport};

// ============================================================================
// Close Codes
// ============================================================================

/// WebSocket close codes seen by sessions.
pub mod close_code {
    /// Clean shutdown.
    pub const NORMAL: u16 = 1000;
    /// Endpoint going away (server shutdown, page navigation).
    pub const GOING_AWAY: u16 = 1001;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// Server hit an unexpected condition.
    pub const INTERNAL_ERROR: u16 = 1011;
    /// Server is restarting.
    pub const SERVICE_RESTART: u16 = 1012;
    /// Server is overloaded, try again later.
    pub const TRY_AGAIN_LATER: u16 = 1013;
    /// Backend process is being restarted.
    pub const BACKEND_RESTARTING: u16 = 4001;
    /// Backend process failed or is not ready.
    pub const BACKEND_ERROR: u16 = 4002;
    /// Backend process crashed.
    pub const BACKEND_CRASHED: u16 = 4003;
}

// ============================================================================
// Types
// ============================================================================

/// Receiver of events produced by an opened transport.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Why a transport closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Close code, `None` when the channel dropped without one.
    pub code: Option<u16>,
    /// Close reason text.
    pub reason: String,
}

impl CloseReason {
    /// Creates a close reason with a code.
    #[inline]
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }

    /// Creates a close reason for a channel that dropped without a close frame.
    #[inline]
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{code} {}", self.reason),
            None => write!(f, "no close code {}", self.reason),
        }
    }
}

/// Event emitted by an opened transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Message(String),
    /// The channel closed. Terminal.
    Closed(CloseReason),
    /// The channel failed. Terminal.
    Error(String),
}

// ============================================================================
// Transport
// ============================================================================

/// Duplex, message-oriented channel.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens the channel and returns its event stream.
    ///
    /// # Errors
    ///
    /// - [`Error::OpenTimeout`](crate::Error::OpenTimeout) if not ready in time
    /// - [`Error::Transport`](crate::Error::Transport) if the peer refused
    async fn open(&self, endpoint: &str) -> Result<TransportEvents>;

    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`](crate::Error::SessionClosed) after close.
    fn send(&self, frame: String) -> Result<()>;

    /// Closes the channel. Idempotent.
    fn close(&self);
}

/// Creates fresh transports, one per open attempt.
pub trait TransportFactory: Send + Sync + 'static {
    /// Returns a new, unopened transport.
    fn create(&self) -> Arc<dyn Transport>;
}

// ============================================================================
// CloseClassifier
// ============================================================================

/// Decides whether a close should trigger a reconnect.
///
/// This is the only transport-specific knowledge the state machine needs.
pub trait CloseClassifier: Send + Sync + 'static {
    /// Returns `true` if the session should reconnect after this close.
    fn is_recoverable(&self, reason: &CloseReason) -> bool;
}

impl<F> CloseClassifier for F
where
    F: Fn(&CloseReason) -> bool + Send + Sync + 'static,
{
    fn is_recoverable(&self, reason: &CloseReason) -> bool {
        self(reason)
    }
}

/// Set-based close classifier.
///
/// A close without a code is recoverable. A coded close is recoverable only
/// if its code is in the set; every other code is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseCodePolicy {
    /// Codes that trigger a reconnect.
    recoverable: FxHashSet<u16>,
}

impl Default for CloseCodePolicy {
    fn default() -> Self {
        Self::with_codes([
            close_code::ABNORMAL,
            close_code::INTERNAL_ERROR,
            close_code::SERVICE_RESTART,
            close_code::TRY_AGAIN_LATER,
            close_code::BACKEND_RESTARTING,
            close_code::BACKEND_ERROR,
            close_code::BACKEND_CRASHED,
        ])
    }
}

impl CloseCodePolicy {
    /// Creates a policy recovering exactly the given codes.
    #[must_use]
    pub fn with_codes(codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            recoverable: codes.into_iter().collect(),
        }
    }

    /// Adds a recoverable code.
    #[must_use]
    pub fn recover(mut self, code: u16) -> Self {
        self.recoverable.insert(code);
        self
    }

    /// Marks a code as terminal.
    #[must_use]
    pub fn terminate(mut self, code: u16) -> Self {
        self.recoverable.remove(&code);
        self
    }
}

impl CloseClassifier for CloseCodePolicy {
    fn is_recoverable(&self, reason: &CloseReason) -> bool {
        reason
            .code
            .is_none_or(|code| self.recoverable.contains(&code))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = CloseCodePolicy::default();

        assert!(policy.is_recoverable(&CloseReason::abnormal("dropped")));
        assert!(policy.is_recoverable(&CloseReason::new(close_code::ABNORMAL, "")));
        assert!(policy.is_recoverable(&CloseReason::new(4001, "pyright restarting")));
        assert!(policy.is_recoverable(&CloseReason::new(4003, "pyright crashed")));

        assert!(!policy.is_recoverable(&CloseReason::new(close_code::NORMAL, "bye")));
        assert!(!policy.is_recoverable(&CloseReason::new(close_code::GOING_AWAY, "")));
        assert!(!policy.is_recoverable(&CloseReason::new(4999, "custom")));
    }

    #[test]
    fn test_policy_overrides() {
        let policy = CloseCodePolicy::default()
            .terminate(close_code::BACKEND_ERROR)
            .recover(close_code::GOING_AWAY);

        assert!(!policy.is_recoverable(&CloseReason::new(4002, "venv missing")));
        assert!(policy.is_recoverable(&CloseReason::new(1001, "")));
    }

    #[test]
    fn test_closure_classifier() {
        let never = |_: &CloseReason| false;
        assert!(!never.is_recoverable(&CloseReason::abnormal("x")));
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::new(4003, "crashed").to_string(), "4003 crashed");
        assert_eq!(
            CloseReason::abnormal("eof").to_string(),
            "no close code eof"
        );
    }
}
