//! Session status and snapshots.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ============================================================================
// SessionStatus
// ============================================================================

/// Lifecycle state of one session.
///
/// ```text
/// Disconnected ──connect()──► Connecting ──ok──► Connected
///       ▲                        │  ▲               │
///       │ terminal close         │  │ timer         │ recoverable close
///       │                    fail▼  │               ▼
///       └───────────────────── Error ──► Reconnecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Not connected and not trying.
    #[default]
    Disconnected,
    /// Opening a transport or running the handshake.
    Connecting,
    /// Handshake completed; requests are accepted.
    Connected,
    /// Waiting for the backoff timer.
    Reconnecting,
    /// Last open failed, or the reconnect budget is exhausted.
    Error,
}

impl SessionStatus {
    /// Returns the lowercase name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }

    /// Returns `true` for [`SessionStatus::Connected`].
    #[inline]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` while the session is working towards a connection.
    #[inline]
    #[must_use]
    pub const fn is_transitional(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SessionSnapshot
// ============================================================================

/// Point-in-time view of a session, published on every change.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    /// Current status.
    pub status: SessionStatus,
    /// Reconnect attempts since the last successful open.
    pub attempt: u32,
    /// Set by `dispose()`, cleared by `restart()`.
    pub disposed: bool,
    /// Most recent lifecycle failure.
    pub last_error: Option<Arc<Error>>,
}

impl SessionSnapshot {
    /// Returns `true` if the session is connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_and_serde() {
        assert_eq!(SessionStatus::Reconnecting.to_string(), "reconnecting");
        assert_eq!(
            serde_json::to_string(&SessionStatus::Connected).unwrap(),
            "\"connected\""
        );
        let status: SessionStatus = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(status, SessionStatus::Error);
    }

    #[test]
    fn test_status_predicates() {
        assert!(SessionStatus::Connected.is_connected());
        assert!(SessionStatus::Connecting.is_transitional());
        assert!(SessionStatus::Reconnecting.is_transitional());
        assert!(!SessionStatus::Error.is_transitional());
    }

    #[test]
    fn test_default_snapshot() {
        let snapshot = SessionSnapshot::default();
        assert_eq!(snapshot.status, SessionStatus::Disconnected);
        assert_eq!(snapshot.attempt, 0);
        assert!(!snapshot.disposed);
        assert!(snapshot.last_error.is_none());
    }
}
