//! Session configuration.
//!
//! Bundles everything a session needs besides its endpoint: timeouts,
//! backoff, wire format, handshake, close classification and keepalive.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use resilient_session::SessionOptions;
//!
//! let options = SessionOptions::language_server()
//!     .with_request_timeout(Duration::from_secs(10))
//!     .with_init_options(serde_json::json!({ "rootUri": "file:///work" }));
//!
//! let shell = SessionOptions::shell();
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::backoff::{BackoffConfig, JitterSource, ThreadRngJitter};
use crate::error::{Error, Result};
use crate::protocol::{
    Codec, DEFAULT_REQUEST_TIMEOUT, Handshake, InitializeHandshake, JsonRpcCodec, ReadyHandshake,
    TaggedCodec,
};
use crate::transport::{CloseClassifier, CloseCodePolicy};

// ============================================================================
// Constants
// ============================================================================

/// Default bound for one transport open.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(15);

/// Default bound for the post-open handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default keepalive period of shell sessions.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// Keepalive
// ============================================================================

/// Periodic notification sent while connected.
#[derive(Debug, Clone, PartialEq)]
pub struct Keepalive {
    /// Time between notifications.
    pub interval: Duration,
    /// Notification method.
    pub method: String,
    /// Notification payload.
    pub params: Value,
}

impl Keepalive {
    /// Creates a keepalive with an empty payload.
    #[inline]
    #[must_use]
    pub fn new(interval: Duration, method: impl Into<String>) -> Self {
        Self {
            interval,
            method: method.into(),
            params: Value::Null,
        }
    }
}

// ============================================================================
// SessionOptions
// ============================================================================

/// Per-session configuration.
#[derive(Clone)]
pub struct SessionOptions {
    /// Reconnect backoff.
    pub(crate) backoff: BackoffConfig,
    /// Bound for one transport open.
    pub(crate) open_timeout: Duration,
    /// Bound for the handshake.
    pub(crate) handshake_timeout: Duration,
    /// Default per-request timeout.
    pub(crate) request_timeout: Duration,
    /// Opaque payload handed to the handshake.
    pub(crate) init_options: Value,
    /// Wire format.
    pub(crate) codec: Arc<dyn Codec>,
    /// Post-open handshake.
    pub(crate) handshake: Arc<dyn Handshake>,
    /// Recoverable/terminal close decision.
    pub(crate) classifier: Arc<dyn CloseClassifier>,
    /// Jitter randomness.
    pub(crate) jitter: Arc<dyn JitterSource>,
    /// Optional keepalive.
    pub(crate) keepalive: Option<Keepalive>,
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("backoff", &self.backoff)
            .field("open_timeout", &self.open_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("codec", &self.codec.name())
            .field("handshake", &self.handshake)
            .field("keepalive", &self.keepalive)
            .finish_non_exhaustive()
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::language_server()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl SessionOptions {
    /// Language server preset: JSON-RPC, `initialize` handshake, no keepalive.
    #[must_use]
    pub fn language_server() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            init_options: Value::Null,
            codec: Arc::new(JsonRpcCodec),
            handshake: Arc::new(InitializeHandshake::default()),
            classifier: Arc::new(CloseCodePolicy::default()),
            jitter: Arc::new(ThreadRngJitter),
            keepalive: None,
        }
    }

    /// Interactive shell preset: tagged frames, `ready` handshake, `heartbeat` keepalive.
    #[must_use]
    pub fn shell() -> Self {
        Self {
            codec: Arc::new(TaggedCodec),
            handshake: Arc::new(ReadyHandshake::new("ready")),
            keepalive: Some(Keepalive::new(DEFAULT_KEEPALIVE_INTERVAL, "heartbeat")),
            ..Self::language_server()
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl SessionOptions {
    /// Sets the reconnect backoff.
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the open timeout.
    #[inline]
    #[must_use]
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the default request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the payload forwarded at handshake.
    #[inline]
    #[must_use]
    pub fn with_init_options(mut self, init_options: Value) -> Self {
        self.init_options = init_options;
        self
    }

    /// Sets the wire format.
    #[inline]
    #[must_use]
    pub fn with_codec(mut self, codec: impl Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Sets the handshake.
    #[inline]
    #[must_use]
    pub fn with_handshake(mut self, handshake: impl Handshake) -> Self {
        self.handshake = Arc::new(handshake);
        self
    }

    /// Sets the close classifier.
    #[inline]
    #[must_use]
    pub fn with_classifier(mut self, classifier: impl CloseClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Sets the jitter source.
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    /// Enables a keepalive notification.
    #[inline]
    #[must_use]
    pub fn with_keepalive(mut self, interval: Duration, method: impl Into<String>) -> Self {
        self.keepalive = Some(Keepalive::new(interval, method));
        self
    }

    /// Disables the keepalive.
    #[inline]
    #[must_use]
    pub fn without_keepalive(mut self) -> Self {
        self.keepalive = None;
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl SessionOptions {
    /// Returns the reconnect backoff.
    #[inline]
    #[must_use]
    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// Returns the open timeout.
    #[inline]
    #[must_use]
    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }

    /// Returns the handshake timeout.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Returns the default request timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the keepalive, if enabled.
    #[inline]
    #[must_use]
    pub fn keepalive(&self) -> Option<&Keepalive> {
        self.keepalive.as_ref()
    }
}

// ============================================================================
// Validation
// ============================================================================

impl SessionOptions {
    /// Checks timeouts, backoff and keepalive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.backoff.validate()?;

        for (name, value) in [
            ("open timeout", self.open_timeout),
            ("handshake timeout", self.handshake_timeout),
            ("request timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::config(format!("{name} must be > 0")));
            }
        }

        if let Some(keepalive) = &self.keepalive {
            if keepalive.interval.is_zero() {
                return Err(Error::config("keepalive interval must be > 0"));
            }
            if keepalive.method.is_empty() {
                return Err(Error::config("keepalive method must not be empty"));
            }
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

    #[test]
    fn test_language_server_defaults() {
        let options = SessionOptions::language_server();
        assert_eq!(options.open_timeout().as_secs(), 15);
        assert_eq!(options.handshake_timeout().as_secs(), 15);
        assert_eq!(options.request_timeout().as_secs(), 30);
        assert_eq!(options.codec.name(), "json-rpc");
        assert!(options.keepalive().is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_shell_preset() {
        let options = SessionOptions::shell();
        assert_eq!(options.codec.name(), "tagged");
        let keepalive = options.keepalive().unwrap();
        assert_eq!(keepalive.method, "heartbeat");
        assert_eq!(keepalive.interval, DEFAULT_KEEPALIVE_INTERVAL);
    }

    #[test]
    fn test_builder_methods() {
        let options = SessionOptions::shell()
            .with_request_timeout(Duration::from_secs(2))
            .with_open_timeout(Duration::from_millis(500))
            .without_keepalive();
        assert_eq!(options.request_timeout(), Duration::from_secs(2));
        assert_eq!(options.open_timeout(), Duration::from_millis(500));
        assert!(options.keepalive().is_none());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let options = SessionOptions::default().with_handshake_timeout(Duration::ZERO);
        assert!(matches!(options.validate(), Err(Error::Config { .. })));

        let options = SessionOptions::default().with_keepalive(Duration::ZERO, "heartbeat");
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_checks_backoff() {
        let mut backoff = BackoffConfig::default();
        backoff.max_attempts = 0;
        let options = SessionOptions::default().with_backoff(backoff);
        assert!(options.validate().is_err());
    }
}
