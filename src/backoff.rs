//! Exponential backoff with jitter.
//!
//! Maps a 1-based reconnect attempt to a delay:
//!
//! ```text
//! delay(attempt) = min(base * 2^(attempt - 1), max) * (1 + jitter * random)
//! ```
//!
//! The result always lies in `[capped, capped * (1 + jitter))` where
//! `capped = min(base * 2^(attempt - 1), max)`. The policy never enforces
//! `max_attempts`; the session state machine does, so the cap decision stays
//! observable on its own.
//!
//! # Example
//!
//! ```
//! use resilient_session::backoff::{delay, BackoffConfig, FixedJitter, JitterSource};
//!
//! let config = BackoffConfig::default();
//! let d = delay(3, &config, FixedJitter::new(0.0).sample());
//! assert_eq!(d.as_millis(), 4000);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default reconnect attempts before settling in `Error`.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay of the first reconnect.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Default upper bound of the exponential part.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Default jitter fraction.
pub const DEFAULT_JITTER_FRACTION: f64 = 0.3;

// ============================================================================
// BackoffConfig
// ============================================================================

/// Reconnect backoff configuration.
///
/// Immutable once handed to a session. Deserializes from camelCase JSON with
/// every field optional:
///
/// ```json
/// { "maxAttempts": 5, "baseDelayMs": 1000, "maxDelayMs": 30000, "jitterFraction": 0.3 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    /// Reconnect attempts before giving up (> 0).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay of the first reconnect in ms (> 0).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap of the exponential part in ms (>= `base_delay_ms`).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter fraction in `[0, 1)`.
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_fraction() -> f64 {
    DEFAULT_JITTER_FRACTION
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_fraction: DEFAULT_JITTER_FRACTION,
        }
    }
}

impl BackoffConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any bound is violated.
    pub fn new(
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        jitter_fraction: f64,
    ) -> Result<Self> {
        let config = Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            jitter_fraction,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violated bound.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config("backoff maxAttempts must be > 0"));
        }
        if self.base_delay_ms == 0 {
            return Err(Error::config("backoff baseDelayMs must be > 0"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::config(format!(
                "backoff maxDelayMs ({}) must be >= baseDelayMs ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if !(0.0..1.0).contains(&self.jitter_fraction) {
            return Err(Error::config(format!(
                "backoff jitterFraction must be in [0, 1), got {}",
                self.jitter_fraction
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Delay
// ============================================================================

/// Returns the un-jittered delay for a 1-based attempt in ms.
#[inline]
#[must_use]
pub fn capped_delay_ms(attempt: u32, config: &BackoffConfig) -> u64 {
    let exponent = attempt.saturating_sub(1).min(63);
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    config
        .base_delay_ms
        .saturating_mul(factor)
        .min(config.max_delay_ms)
}

/// Computes the reconnect delay for a 1-based attempt.
///
/// `random` must be uniform in `[0, 1)`; the function is otherwise pure.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn delay(attempt: u32, config: &BackoffConfig, random: f64) -> Duration {
    let capped = capped_delay_ms(attempt, config) as f64;
    let random = random.clamp(0.0, 1.0);
    let jittered = capped * (1.0 + config.jitter_fraction * random);

    // Flooring keeps the result strictly below the exclusive upper bound.
    Duration::from_micros((jittered * 1000.0).floor() as u64)
}

// ============================================================================
// JitterSource
// ============================================================================

/// Source of uniform randomness in `[0, 1)` for jitter.
pub trait JitterSource: Send + Sync + fmt::Debug {
    /// Returns the next sample.
    fn sample(&self) -> f64;
}

/// Thread-local RNG jitter, the default source.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    #[inline]
    fn sample(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Constant jitter for deterministic schedules.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(f64);

impl FixedJitter {
    /// Creates a fixed source; the value is clamped into `[0, 1)`.
    #[inline]
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0 - f64::EPSILON))
    }
}

impl JitterSource for FixedJitter {
    #[inline]
    fn sample(&self) -> f64 {
        self.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn config(base: u64, max: u64, jitter: f64) -> BackoffConfig {
        BackoffConfig::new(10, base, max, jitter).expect("valid config")
    }

    #[test]
    fn test_defaults() {
        let config = BackoffConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30_000);
        assert!((config.jitter_fraction - 0.3).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_camel_case() {
        let config: BackoffConfig =
            serde_json::from_str(r#"{ "maxAttempts": 3, "baseDelayMs": 250 }"#).unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 250);
        assert_eq!(config.max_delay_ms, DEFAULT_MAX_DELAY_MS);
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        assert!(BackoffConfig::new(0, 1000, 2000, 0.1).is_err());
        assert!(BackoffConfig::new(3, 0, 2000, 0.1).is_err());
        assert!(BackoffConfig::new(3, 1000, 500, 0.1).is_err());
        assert!(BackoffConfig::new(3, 1000, 2000, 1.0).is_err());
        assert!(BackoffConfig::new(3, 1000, 2000, -0.1).is_err());
    }

    #[test]
    fn test_first_attempt_uses_base() {
        let config = config(1000, 30_000, 0.3);
        assert_eq!(delay(1, &config, 0.0), Duration::from_millis(1000));
    }

    #[test]
    fn test_third_attempt_window() {
        // baseDelayMs=1000, maxDelayMs=30000, jitterFraction=0.3, attempt 3
        let config = config(1000, 30_000, 0.3);

        let low = delay(3, &config, 0.0);
        let high = delay(3, &config, 1.0 - f64::EPSILON);

        assert_eq!(low, Duration::from_millis(4000));
        assert!(high >= Duration::from_millis(4000));
        assert!(high < Duration::from_millis(5200));
    }

    #[test]
    fn test_capped_at_max() {
        let config = config(1000, 30_000, 0.0);
        assert_eq!(delay(6, &config, 0.5), Duration::from_millis(30_000));
        assert_eq!(delay(20, &config, 0.5), Duration::from_millis(30_000));
        assert_eq!(delay(u32::MAX, &config, 0.5), Duration::from_millis(30_000));
    }

    #[test]
    fn test_fixed_jitter_clamped() {
        assert!(FixedJitter::new(2.0).sample() < 1.0);
        assert_eq!(FixedJitter::new(-1.0).sample(), 0.0);
    }

    #[test]
    fn test_thread_rng_jitter_in_range() {
        let source = ThreadRngJitter;
        for _ in 0..1000 {
            let sample = source.sample();
            assert!((0.0..1.0).contains(&sample));
        }
    }

    proptest! {
        #[test]
        fn prop_delay_within_bounds(
            attempt in 1u32..=32,
            base in 1u64..5_000,
            extra in 0u64..120_000,
            jitter in 0.0f64..0.99,
            random in 0.0f64..1.0,
        ) {
            let config = config(base, base + extra, jitter);
            let capped = capped_delay_ms(attempt, &config) as f64;
            let value = delay(attempt, &config, random).as_secs_f64() * 1000.0;

            prop_assert!(value >= capped - 1e-6);
            prop_assert!(value < capped * (1.0 + jitter) + 1e-6);
            prop_assert!(capped >= base as f64);
            prop_assert!(capped <= (base + extra) as f64);
        }

        #[test]
        fn prop_capped_delay_monotonic(
            attempt in 1u32..40,
            base in 1u64..5_000,
            extra in 0u64..120_000,
        ) {
            let config = config(base, base + extra, 0.0);
            prop_assert!(capped_delay_ms(attempt + 1, &config) >= capped_delay_ms(attempt, &config));
        }
    }
}
