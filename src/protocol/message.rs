//! Decoded protocol messages.
//!
//! Codecs turn wire frames into [`Incoming`] values and back. The client only
//! ever sees these types, never raw JSON shapes.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::RequestId;

// ============================================================================
// Error Codes
// ============================================================================

/// JSON-RPC 2.0 reserved error codes.
pub mod error_code {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

// ============================================================================
// RpcError
// ============================================================================

/// Error object carried by an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,

    /// Short description.
    pub message: String,

    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Creates an error object without data.
    #[inline]
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Creates a "method not found" error for `method`.
    #[inline]
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_code::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )
    }

    /// Creates an internal error.
    #[inline]
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(error_code::INTERNAL_ERROR, message)
    }

    /// Attaches structured details.
    #[inline]
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

// ============================================================================
// Notification
// ============================================================================

/// A one-way message from the peer, as seen by subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method or message type, e.g. `textDocument/publishDiagnostics` or `stdout`.
    pub method: String,

    /// Message payload.
    pub params: Value,
}

impl Notification {
    /// Creates a notification.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Returns a string field of the payload.
    #[inline]
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

// ============================================================================
// Incoming
// ============================================================================

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Answer to one of our requests.
    Response {
        /// Id of the request being answered.
        id: RequestId,
        /// Result value or error object.
        outcome: Result<Value, RpcError>,
    },

    /// One-way message from the peer.
    Notification(Notification),

    /// Request initiated by the peer.
    Request {
        /// Peer-chosen id, echoed back verbatim.
        id: Value,
        /// Requested method.
        method: String,
        /// Request parameters.
        params: Value,
    },
}

// ============================================================================
// Tests
// ============================================================================
