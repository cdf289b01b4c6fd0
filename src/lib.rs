//! Resilient session connections.
//!
//! This library keeps long-lived, message-oriented sessions to backend
//! processes alive: language servers spoken to over JSON-RPC, interactive
//! shells spoken to over a tagged JSON protocol, or any other peer reachable
//! through a duplex channel.
//!
//! # Architecture
//!
//! Every session is a small actor:
//!
//! - **[`SessionConnection`]**: handle plus a driver task owning the state
//!   machine (`Disconnected → Connecting → Connected → Reconnecting → Error`)
//! - **[`ProtocolClient`]**: request/response correlation, notification
//!   routing and handshakes over one opened transport
//! - **[`Transport`]**: the duplex channel itself (WebSocket or in-memory)
//!
//! A [`SessionOrchestrator`] groups the sessions one logical client needs
//! and exposes a composite status for them.
//!
//! Key design principles:
//!
//! - Close codes decide between reconnecting and giving up, never timers
//! - Reconnect delays follow capped exponential backoff with jitter
//! - Pending requests fail fast on disconnect, no silent hangs
//! - Event-driven architecture (no polling)
//!
//! # Quick Start
//!
//! ```no_run
//! use resilient_session::{
//!     Result, SessionDescriptor, SessionOrchestrator, StatusSnapshot, WebSocketFactory,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let orchestrator = SessionOrchestrator::builder()
//!         .session(SessionDescriptor::new(
//!             "pyright",
//!             "ws://localhost:8000/api/lsp/{session}?project_id={target}",
//!         ))
//!         .transport(WebSocketFactory::default())
//!         .build()?;
//!
//!     let group = orchestrator.connect("project-1");
//!     group.wait_for(StatusSnapshot::all_connected).await?;
//!
//!     if let Some(pyright) = group.session("pyright") {
//!         let hover = pyright
//!             .request("textDocument/hover", json!({ "position": { "line": 0, "character": 0 } }))
//!             .await?;
//!         println!("hover: {hover}");
//!     }
//!
//!     orchestrator.dispose();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backoff`] | Reconnect delay computation |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`orchestrator`] | Session groups and composite status |
//! | [`protocol`] | Codecs, correlation, routing, handshakes |
//! | [`session`] | Single-session state machine |
//! | [`transport`] | Duplex channel contract and implementations |

// ============================================================================
// Modules
// ============================================================================

/// Reconnect delay computation.
pub mod backoff;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing session, target and request ids.
pub mod identifiers;

/// Session groups and composite status.
///
/// Use [`SessionOrchestrator::builder()`] to create an orchestrator.
pub mod orchestrator;

/// Message protocol over an opened transport.
pub mod protocol;

/// Single-session lifecycle.
pub mod session;

/// Duplex transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Backoff
pub use backoff::{BackoffConfig, FixedJitter, JitterSource, ThreadRngJitter};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{RequestId, SessionId, SubscriptionId, TargetId};

// Orchestrator types
pub use orchestrator::{
    BackendRestarter, OrchestratorBuilder, SessionDescriptor, SessionGroup, SessionOrchestrator,
    StatusSnapshot, Subscription,
};

// Protocol types
pub use protocol::{
    Codec, Handshake, InitializeHandshake, JsonRpcCodec, NoHandshake, Notification,
    ProtocolClient, ReadyHandshake, RpcError, TaggedCodec,
};

// Session types
pub use session::{Keepalive, SessionConnection, SessionOptions, SessionSnapshot, SessionStatus};

// Transport types
pub use transport::{
    AcceptMode, CloseClassifier, CloseCodePolicy, CloseReason, MemoryAcceptor, MemoryFactory,
    MemoryPeer, Transport, TransportEvent, TransportFactory, WebSocketFactory,
};
