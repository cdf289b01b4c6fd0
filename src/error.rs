//! Error types for resilient sessions.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use resilient_session::{Result, SessionConnection};
//!
//! async fn hover(session: &SessionConnection) -> Result<()> {
//!     let reply = session.request("textDocument/hover", params).await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Lifecycle | [`Error::OpenTimeout`], [`Error::AbnormalClose`], [`Error::HandshakeFailed`], [`Error::MaxReconnectAttemptsExceeded`], [`Error::DisposedWhileConnecting`], [`Error::NotConnected`], [`Error::SessionNotFound`] |
//! | Protocol | [`Error::RequestTimeout`], [`Error::SessionClosed`], [`Error::TooManyPendingRequests`], [`Error::Rpc`], [`Error::Protocol`], [`Error::Unsupported`] |
//! | External | [`Error::Transport`], [`Error::BackendRestart`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |
//!
//! Lifecycle errors are never returned from `connect()`, `restart()` or
//! `dispose()`. The reconnect machinery absorbs them and reports the last one
//! through [`SessionSnapshot::last_error`](crate::session::SessionSnapshot).

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{RequestId, SessionId};
use crate::protocol::RpcError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when backoff, session or orchestrator configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Transport did not become ready in time.
    #[error("Open timeout after {timeout_ms}ms")]
    OpenTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Transport closed with a code classified as recoverable.
    #[error("Abnormal close (code {}): {reason}", fmt_close_code(.code))]
    AbnormalClose {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason text.
        reason: String,
    },

    /// Protocol handshake did not complete.
    #[error("Handshake failed: {message}")]
    HandshakeFailed {
        /// Description of the handshake failure.
        message: String,
    },

    /// Reconnect budget exhausted; only `restart()` revives the session.
    #[error("Gave up after {attempts} reconnect attempts")]
    MaxReconnectAttemptsExceeded {
        /// Reconnect attempts made.
        attempts: u32,
    },

    /// An open completed after the session was disposed or restarted.
    ///
    /// Benign: the late transport is closed and the error is only logged.
    #[error("Session disposed while connecting")]
    DisposedWhileConnecting,

    /// Session has no live protocol client.
    #[error("Session {session_id} is not connected")]
    NotConnected {
        /// The session that was addressed.
        session_id: SessionId,
    },

    /// Session id is not part of the orchestrator.
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// The missing session id.
        session_id: SessionId,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Request did not receive a response in time.
    ///
    /// Only the waiting caller fails; the session stays up.
    #[error("Request {request_id} ({method}) timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Method of the request.
        method: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Transport closed while the request was pending or being sent.
    #[error("Session closed")]
    SessionClosed,

    /// Correlation table is full.
    #[error("Too many pending requests (limit {limit})")]
    TooManyPendingRequests {
        /// Maximum outstanding requests.
        limit: usize,
    },

    /// Peer answered with an error response.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// Error code from the peer.
        code: i64,
        /// Error message from the peer.
        message: String,
    },

    /// Protocol violation or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Operation not available for this wire format.
    #[error("Unsupported operation: {operation}")]
    Unsupported {
        /// The rejected operation.
        operation: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// Transport-level failure.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// Administrative backend restart failed.
    ///
    /// The local reconnect has still been issued.
    #[error("Backend restart for {session_id} failed: {message}")]
    BackendRestart {
        /// Session whose backend was restarted.
        session_id: SessionId,
        /// Failure description.
        message: String,
    },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Endpoint is not a valid URL.
    #[error("Invalid endpoint: {0}")]
    Url(#[from] url::ParseError),
}

/// Renders an optional close code for display.
fn fmt_close_code(code: &Option<u16>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an open timeout error.
    #[inline]
    pub fn open_timeout(timeout_ms: u64) -> Self {
        Self::OpenTimeout { timeout_ms }
    }

    /// Creates an abnormal close error.
    #[inline]
    pub fn abnormal_close(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::AbnormalClose {
            code,
            reason: reason.into(),
        }
    }

    /// Creates a handshake failure.
    #[inline]
    pub fn handshake_failed(message: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            message: message.into(),
        }
    }

    /// Creates a reconnect budget exhausted error.
    #[inline]
    pub fn max_reconnect_attempts(attempts: u32) -> Self {
        Self::MaxReconnectAttemptsExceeded { attempts }
    }

    /// Creates a not connected error.
    #[inline]
    pub fn not_connected(session_id: SessionId) -> Self {
        Self::NotConnected { session_id }
    }

    /// Creates a session not found error.
    #[inline]
    pub fn session_not_found(session_id: SessionId) -> Self {
        Self::SessionNotFound { session_id }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, method: impl Into<String>, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            method: method.into(),
            timeout_ms,
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    #[inline]
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a backend restart error.
    #[inline]
    pub fn backend_restart(session_id: SessionId, message: impl Into<String>) -> Self {
        Self::BackendRestart {
            session_id,
            message: message.into(),
        }
    }
}

impl From<RpcError> for Error {
    fn from(err: RpcError) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::OpenTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::OpenTimeout { .. }
                | Self::AbnormalClose { .. }
                | Self::SessionClosed
                | Self::NotConnected { .. }
                | Self::Transport { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::OpenTimeout { .. }
                | Self::AbnormalClose { .. }
                | Self::HandshakeFailed { .. }
                | Self::RequestTimeout { .. }
                | Self::SessionClosed
                | Self::NotConnected { .. }
                | Self::Transport { .. }
                | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
