//! Builder for orchestrator configuration.
//!
//! # Example
//!
//! ```ignore
//! use resilient_session::{SessionDescriptor, SessionOptions, SessionOrchestrator, WebSocketFactory};
//!
//! let orchestrator = SessionOrchestrator::builder()
//!     .session(SessionDescriptor::new("pyright", "ws://localhost:8000/api/lsp/pyright?project_id={target}"))
//!     .session(SessionDescriptor::new("ruff", "ws://localhost:8000/api/lsp/ruff?project_id={target}"))
//!     .transport(WebSocketFactory::default())
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::error::{Error, Result};
use crate::identifiers::{SessionId, TargetId};
use crate::session::SessionOptions;
use crate::transport::TransportFactory;

use super::BackendRestarter;
use super::core::SessionOrchestrator;

// ============================================================================
// Constants
// ============================================================================

/// Placeholder replaced by the session id.
pub const SESSION_PLACEHOLDER: &str = "{session}";

/// Placeholder replaced by the percent-encoded target id.
pub const TARGET_PLACEHOLDER: &str = "{target}";

// ============================================================================
// SessionDescriptor
// ============================================================================

/// One session an orchestrator opens for every target.
#[derive(Debug, Clone)]
pub struct SessionDescriptor {
    /// Session name, unique within the orchestrator.
    pub id: SessionId,
    /// Endpoint template with `{session}` and `{target}` placeholders.
    pub endpoint: String,
    /// Session configuration.
    pub options: SessionOptions,
}

impl SessionDescriptor {
    /// Creates a descriptor with language server defaults.
    #[must_use]
    pub fn new(id: impl Into<SessionId>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            options: SessionOptions::default(),
        }
    }

    /// Sets the session options.
    #[inline]
    #[must_use]
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolves the endpoint template for a target.
    ///
    /// ```
    /// use resilient_session::{SessionDescriptor, TargetId};
    ///
    /// let descriptor = SessionDescriptor::new("ruff", "ws://h/api/lsp/{session}?project_id={target}");
    /// assert_eq!(
    ///     descriptor.endpoint_for(&TargetId::new("my project")),
    ///     "ws://h/api/lsp/ruff?project_id=my%20project"
    /// );
    /// ```
    #[must_use]
    pub fn endpoint_for(&self, target: &TargetId) -> String {
        self.endpoint
            .replace(SESSION_PLACEHOLDER, self.id.as_str())
            .replace(TARGET_PLACEHOLDER, &urlencoding::encode(target.as_str()))
    }
}

// ============================================================================
// OrchestratorBuilder
// ============================================================================

/// Builder for a [`SessionOrchestrator`].
///
/// Use [`SessionOrchestrator::builder()`] to create one.
#[derive(Default, Clone)]
pub struct OrchestratorBuilder {
    /// Sessions in declaration order.
    sessions: Vec<SessionDescriptor>,
    /// Transport factory shared by all sessions.
    transport: Option<Arc<dyn TransportFactory>>,
    /// Optional administrative restart hook.
    restarter: Option<Arc<dyn BackendRestarter>>,
}

impl fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("sessions", &self.sessions)
            .field("transport", &self.transport.is_some())
            .field("restarter", &self.restarter.is_some())
            .finish()
    }
}

impl OrchestratorBuilder {
    /// Creates an empty builder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session.
    #[must_use]
    pub fn session(mut self, descriptor: SessionDescriptor) -> Self {
        self.sessions.push(descriptor);
        self
    }

    /// Sets the transport factory.
    #[must_use]
    pub fn transport(mut self, factory: impl TransportFactory) -> Self {
        self.transport = Some(Arc::new(factory));
        self
    }

    /// Sets an already shared transport factory.
    #[must_use]
    pub fn transport_arc(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport = Some(factory);
        self
    }

    /// Sets the administrative restart hook.
    #[must_use]
    pub fn restarter(mut self, restarter: impl BackendRestarter) -> Self {
        self.restarter = Some(Arc::new(restarter));
        self
    }

    /// Builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no session or no transport is set, if
    /// session ids repeat, or if any session options are invalid.
    pub fn build(self) -> Result<SessionOrchestrator> {
        self.validate_sessions()?;
        let transport = self.transport.ok_or_else(|| {
            Error::config(
                "Transport factory is required. Use .transport() to set it.\n\
                 Example: SessionOrchestrator::builder().transport(WebSocketFactory::default())",
            )
        })?;

        Ok(SessionOrchestrator::new(
            self.sessions,
            transport,
            self.restarter,
        ))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl OrchestratorBuilder {
    /// Validates the session set.
    fn validate_sessions(&self) -> Result<()> {
        if self.sessions.is_empty() {
            return Err(Error::config(
                "At least one session is required. Use .session() to add one.",
            ));
        }

        let mut seen = FxHashSet::default();
        for descriptor in &self.sessions {
            if descriptor.id.as_str().is_empty() {
                return Err(Error::config("Session id must not be empty"));
            }
            if !seen.insert(descriptor.id.clone()) {
                return Err(Error::config(format!(
                    "Duplicate session id: {}",
                    descriptor.id
                )));
            }
            if descriptor.endpoint.is_empty() {
                return Err(Error::config(format!(
                    "Session {} has no endpoint",
                    descriptor.id
                )));
            }
            descriptor.options.validate().map_err(|e| {
                Error::config(format!("Session {}: {e}", descriptor.id))
            })?;
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::transport::MemoryFactory;

    fn memory() -> MemoryFactory {
        MemoryFactory::new().0
    }

    #[test]
    fn test_endpoint_for_substitutes_placeholders() {
        let descriptor = SessionDescriptor::new("pyright", "ws://localhost:8000/api/lsp/{session}?project_id={target}");
        assert_eq!(
            descriptor.endpoint_for(&TargetId::new("p/1")),
            "ws://localhost:8000/api/lsp/pyright?project_id=p%2F1"
        );
    }

    #[test]
    fn test_endpoint_without_placeholders_is_kept() {
        let descriptor = SessionDescriptor::new("terminal", "ws://localhost/terminal");
        assert_eq!(descriptor.endpoint_for(&TargetId::new("x")), "ws://localhost/terminal");
    }

    #[tokio::test]
    async fn test_build_requires_session() {
        let err = OrchestratorBuilder::new().transport(memory()).build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_build_requires_transport() {
        let err = OrchestratorBuilder::new()
            .session(SessionDescriptor::new("pyright", "mem://pyright"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Transport factory is required"));
    }

    #[tokio::test]
    async fn test_build_rejects_duplicate_ids() {
        let err = OrchestratorBuilder::new()
            .session(SessionDescriptor::new("ruff", "mem://a"))
            .session(SessionDescriptor::new("ruff", "mem://b"))
            .transport(memory())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate session id: ruff"));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_options() {
        let options = SessionOptions::default().with_request_timeout(Duration::ZERO);
        let err = OrchestratorBuilder::new()
            .session(SessionDescriptor::new("ruff", "mem://ruff").with_options(options))
            .transport(memory())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("request timeout"));
    }

    #[tokio::test]
    async fn test_build_ok() {
        let orchestrator = OrchestratorBuilder::new()
            .session(SessionDescriptor::new("pyright", "mem://pyright"))
            .session(SessionDescriptor::new("ruff", "mem://ruff"))
            .transport(memory())
            .build()
            .unwrap();
        assert_eq!(orchestrator.session_ids().len(), 2);
    }
}
