//! Multi-session orchestration.
//!
//! Groups the sessions one logical client needs (for example `pyright` and
//! `ruff` for one project) under a single handle with a composite status.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SessionOrchestrator`] | Owns the session set, hands out one group per target |
//! | [`OrchestratorBuilder`] | Fluent configuration with validation |
//! | [`SessionDescriptor`] | Id, endpoint template and options of one session |
//! | [`SessionGroup`] | Sessions of one target, composite status, lifecycle |
//! | [`StatusSnapshot`] | Status of every session at one point in time |
//! | [`Subscription`] | Registration of a group status listener |
//! | [`BackendRestarter`] | Hook restarting a session's backend process |
//!
//! # Example
//!
//! ```ignore
//! let orchestrator = SessionOrchestrator::builder()
//!     .session(SessionDescriptor::new("pyright", "ws://localhost:8000/api/lsp/{session}?project_id={target}"))
//!     .transport(WebSocketFactory::default())
//!     .build()?;
//!
//! let group = orchestrator.connect("project-1");
//! group.wait_for(StatusSnapshot::is_connected).await?;
//! let reply = group.session("pyright").unwrap().request("textDocument/hover", params).await?;
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Composite status and listeners.
pub mod board;

/// Fluent builder and session descriptors.
pub mod builder;

/// Orchestrator implementation.
pub mod core;

/// Sessions of one target.
pub mod group;

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;
use crate::identifiers::{SessionId, TargetId};

// ============================================================================
// Re-exports
// ============================================================================

pub use board::{GroupListener, StatusSnapshot, Subscription};
pub use builder::{OrchestratorBuilder, SESSION_PLACEHOLDER, SessionDescriptor, TARGET_PLACEHOLDER};
pub use self::core::SessionOrchestrator;
pub use group::SessionGroup;

// ============================================================================
// BackendRestarter
// ============================================================================

/// Restarts the server-side process behind a session.
///
/// Called by [`SessionGroup::restart_session`] before the local session
/// reconnects, for backends that expose an administrative restart (for
/// example `POST /restart/{session}?project_id={target}`).
#[async_trait]
pub trait BackendRestarter: Send + Sync + 'static {
    /// Restarts the backend of `session_id` for `target`.
    ///
    /// # Errors
    ///
    /// Any error; it is reported as [`Error::BackendRestart`](crate::Error::BackendRestart).
    async fn restart_backend(&self, session_id: &SessionId, target: &TargetId) -> Result<()>;
}
