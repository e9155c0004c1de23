//! Retry policy for transient store failures.
//!
//! Producer writes, background-task writes and the map subscription all back
//! off exponentially from a 2 second base: 2s, 4s, 8s.
//!
//! # Example
//!
//! ```ignore
//! use shuttletrack::retry::RetryPolicy;
//!
//! // Initial attempt plus three retries
//! let policy = RetryPolicy::exponential(3);
//! assert_eq!(policy.max_attempts(), 4);
//! ```

use std::time::Duration;

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry (2 seconds).
pub const DEFAULT_RETRY_BASE_MS: u64 = 2000;

/// Default maximum delay between retries (30 seconds).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Default multiplier for exponential backoff.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// How an operation handles transient failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// No retries - fail immediately on error.
    None,

    /// Exponential backoff.
    ///
    /// The delay doubles after each failed retry, up to `max_delay`.
    ExponentialBackoff {
        /// Retries allowed after the initial attempt.
        max_retries: u32,
        /// Delay before the first retry.
        initial_delay: Duration,
        /// Maximum delay cap.
        max_delay: Duration,
        /// Multiplier applied after each failure (typically 2.0).
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// Exponential backoff from the 2 second default base.
    pub fn exponential(max_retries: u32) -> Self {
        Self::with_base(max_retries, Duration::from_millis(DEFAULT_RETRY_BASE_MS))
    }

    /// Exponential backoff from a custom base delay.
    pub fn with_base(max_retries: u32, initial_delay: Duration) -> Self {
        Self::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    /// Delay to wait before retry number `retry` (1-based).
    ///
    /// Returns `None` once the retry budget is spent.
    pub fn delay_for_retry(&self, retry: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::ExponentialBackoff {
                max_retries,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if retry == 0 || retry > *max_retries {
                    return None;
                }
                let factor = multiplier.powi((retry - 1) as i32);
                let delay_ms = initial_delay.as_millis() as f64 * factor;
                let capped = delay_ms.min(max_delay.as_millis() as f64) as u64;
                Some(Duration::from_millis(capped))
            }
        }
    }

    /// Retries allowed after the initial attempt.
    pub fn max_retries(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Total attempts including the initial one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries() + 1
    }
}
