//! Session lifecycle.
//!
//! One [`SessionConnection`] keeps one logical session alive over a series
//! of transports, reconnecting with exponential backoff when the peer goes
//! away for a recoverable reason.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SessionConnection`] | Handle to the session's driver task |
//! | [`SessionOptions`] | Timeouts, backoff, codec, handshake, keepalive |
//! | [`SessionStatus`] | `Disconnected`, `Connecting`, `Connected`, `Reconnecting`, `Error` |
//! | [`SessionSnapshot`] | Status plus attempt counter and last error |

// ============================================================================
// Submodules
// ============================================================================

/// Session handle and driver.
pub mod connection;

/// Session configuration.
pub mod options;

/// Status and snapshots.
pub mod status;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{SessionConnection, StatusListener};
pub use options::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_OPEN_TIMEOUT, Keepalive,
    SessionOptions,
};
pub use status::{SessionSnapshot, SessionStatus};
