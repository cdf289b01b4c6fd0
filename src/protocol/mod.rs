//! Message protocol layer.
//!
//! Correlates requests with responses and routes notifications over one
//! opened transport. Wire formats and post-open handshakes are pluggable.
//!
//! # Message Kinds
//!
//! | Kind | Direction | Handling |
//! |------|-----------|----------|
//! | Request | Local → Remote | Correlated by [`RequestId`](crate::RequestId), bounded by a timeout |
//! | Response | Remote → Local | Resolves the matching request, any order |
//! | Notification | Both | Fanned out to every router subscriber |
//! | Peer request | Remote → Local | Answered by the request handler, or "method not found" |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `client` | [`ProtocolClient`] and its event loop |
//! | `codec` | JSON-RPC and tagged wire formats |
//! | `handshake` | Post-open handshakes |
//! | `message` | Decoded message types |
//! | `router` | Notification fan-out shared across reconnects |

// ============================================================================
// Submodules
// ============================================================================

/// Protocol client and event loop.
pub mod client;

/// Wire formats.
pub mod codec;

/// Post-open handshakes.
pub mod handshake;

/// Decoded message types.
pub mod message;

/// Notification fan-out.
pub mod router;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{DEFAULT_REQUEST_TIMEOUT, Disconnect, MAX_PENDING_REQUESTS, ProtocolClient};
pub use codec::{Codec, JsonRpcCodec, TaggedCodec};
pub use handshake::{Handshake, InitializeHandshake, NoHandshake, ReadyHandshake};
pub use message::{Incoming, Notification, RpcError, error_code};
pub use router::{NotificationHandler, NotificationRouter, RequestHandler};
