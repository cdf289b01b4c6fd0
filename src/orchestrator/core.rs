//! Session orchestrator.
//!
//! The [`SessionOrchestrator`] owns a fixed set of session descriptors and
//! hands out one [`SessionGroup`] per target. Switching targets disposes the
//! previous group before the new one connects.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::identifiers::{SessionId, TargetId};
use crate::transport::TransportFactory;

use super::BackendRestarter;
use super::builder::{OrchestratorBuilder, SessionDescriptor};
use super::group::SessionGroup;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the orchestrator.
struct OrchestratorInner {
    /// Sessions opened for every target.
    descriptors: Vec<SessionDescriptor>,
    /// Transport factory shared by all sessions.
    transport: Arc<dyn TransportFactory>,
    /// Optional administrative restart hook.
    restarter: Option<Arc<dyn BackendRestarter>>,
    /// Group of the current target.
    current: Mutex<Option<SessionGroup>>,
}

// ============================================================================
// SessionOrchestrator
// ============================================================================

/// Coordinates the sessions of one logical client.
///
/// # Example
///
/// ```ignore
/// let orchestrator = SessionOrchestrator::builder()
///     .session(SessionDescriptor::new("pyright", "ws://localhost:8000/api/lsp/{session}?project_id={target}"))
///     .session(SessionDescriptor::new("ruff", "ws://localhost:8000/api/lsp/{session}?project_id={target}"))
///     .transport(WebSocketFactory::default())
///     .build()?;
///
/// let group = orchestrator.connect("project-1");
/// group.subscribe(|status| println!("any connected: {}", status.is_connected()));
/// ```
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("sessions", &self.session_ids())
            .field("current", &self.current().map(|g| g.target().clone()))
            .finish()
    }
}

impl SessionOrchestrator {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub(crate) fn new(
        descriptors: Vec<SessionDescriptor>,
        transport: Arc<dyn TransportFactory>,
        restarter: Option<Arc<dyn BackendRestarter>>,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                descriptors,
                transport,
                restarter,
                current: Mutex::new(None),
            }),
        }
    }

    /// Connects every session for `target`.
    ///
    /// Returns the current group unchanged if it already serves `target` and
    /// was not disposed. Otherwise the previous group is disposed and a new
    /// one starts connecting. Never fails: sessions progress independently
    /// and report failures through their status.
    ///
    /// Must be called within a tokio runtime.
    pub fn connect(&self, target: impl Into<TargetId>) -> SessionGroup {
        let target = target.into();
        let mut current = self.inner.current.lock();

        if let Some(group) = current.as_ref() {
            if group.target() == &target && !group.is_disposed() {
                debug!(target_id = %target, "Reusing session group");
                return group.clone();
            }
            group.dispose();
        }

        info!(target_id = %target, sessions = self.inner.descriptors.len(), "Connecting sessions");
        let group = SessionGroup::spawn(
            target,
            &self.inner.descriptors,
            &self.inner.transport,
            self.inner.restarter.clone(),
        );
        group.connect_all();
        *current = Some(group.clone());
        group
    }

    /// Returns the current group, if any.
    #[must_use]
    pub fn current(&self) -> Option<SessionGroup> {
        self.inner.current.lock().clone()
    }

    /// Disposes and forgets the current group.
    pub fn dispose(&self) {
        if let Some(group) = self.inner.current.lock().take() {
            group.dispose();
        }
    }

    /// Returns the configured session ids in declaration order.
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.descriptors.iter().map(|d| d.id.clone()).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
