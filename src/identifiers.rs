//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Wraps | Scope |
//! |------|-------|-------|
//! | [`SessionId`] | `String` | One session inside an orchestrator |
//! | [`TargetId`] | `String` | Lifecycle target (e.g. a project) |
//! | [`RequestId`] | `u64` | One request inside a protocol client |
//! | [`SubscriptionId`] | `u64` | A notification subscriber or status listener |

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// Macros
// ============================================================================

/// Implements the shared surface of string-backed identifiers.
macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Creates a new identifier.
            #[inline]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

// ============================================================================
// SessionId
// ============================================================================

/// Stable name of one session within an orchestrator.
///
/// Typically a language server name (`"pyright"`, `"ruff"`) or a shell mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

string_id!(SessionId);

// ============================================================================
// TargetId
// ============================================================================

/// Identifier of the lifecycle target a group of sessions serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

string_id!(TargetId);

// ============================================================================
// RequestId
// ============================================================================

/// Correlation id of an outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Creates a request id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// Global counter for subscription ids.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a registered notification subscriber or status listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Allocates the next process-unique subscription id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use rustc_hash::FxHashMap;

    #[test]
    fn test_session_id_display_and_borrow() {
        let id = SessionId::from("pyright");
        assert_eq!(id.to_string(), "pyright");

        let mut map = FxHashMap::default();
        map.insert(id, 1);
        assert_eq!(map.get("pyright"), Some(&1));
    }

    #[test]
    fn test_session_id_serde_transparent() {
        let id = SessionId::new("ruff");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"ruff\"");
    }

    #[test]
    fn test_request_id_roundtrip_value() {
        let id = RequestId::new(42);
        assert_eq!(id.as_u64(), 42);
        assert_eq!(serde_json::to_value(id).unwrap(), serde_json::json!(42));
    }

    #[test]
    fn test_subscription_ids_are_unique() {
        let a = SubscriptionId::next();
        let b = SubscriptionId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }
}
