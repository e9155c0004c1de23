//! Producer and background task configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::device::PositionRequest;
use crate::retry::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_MS};

// ==================== Producer Defaults ====================

/// Sampling interval before any speed has been observed (5 seconds).
pub const DEFAULT_INTERVAL_MS: u64 = 5000;

/// Timeout for a per-tick position read.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 10_000;

/// Maximum age of a cached fix accepted by a per-tick read.
pub const DEFAULT_READ_MAX_AGE_MS: u64 = 5000;

/// Timeout for the initial read at session start.
pub const DEFAULT_INITIAL_READ_TIMEOUT_MS: u64 = 15_000;

/// Maximum age of a cached fix accepted by the initial read.
pub const DEFAULT_INITIAL_READ_MAX_AGE_MS: u64 = 10_000;

/// Overall deadline for one store write attempt.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;

/// Delivery interval requested from the OS in background mode.
pub const DEFAULT_CONTINUOUS_INTERVAL_MS: u64 = 5000;

/// Movement filter requested from the OS in background mode (metres).
pub const DEFAULT_DISTANCE_FILTER_M: f64 = 0.0;

/// Deadline for the non-blocking store probe at session start.
pub const DEFAULT_CONNECTIVITY_PROBE_MS: u64 = 5000;

/// Pause after stopping a leftover background registration.
pub const DEFAULT_REGISTRATION_SETTLE_MS: u64 = 500;

/// Consecutive background failures before the error is escalated.
pub const DEFAULT_CONSECUTIVE_ERROR_THRESHOLD: u32 = 5;

/// How continuous updates are delivered while sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SharingMode {
    /// The OS delivers fixes to the background task.
    #[default]
    Background,
    /// An in-process timer polls the location provider.
    Foreground,
}

impl SharingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharingMode::Background => "background",
            SharingMode::Foreground => "foreground",
        }
    }
}

impl fmt::Display for SharingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SharingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "background" => Ok(SharingMode::Background),
            "foreground" => Ok(SharingMode::Foreground),
            other => Err(format!("expected 'background' or 'foreground', got '{}'", other)),
        }
    }
}

/// Configuration for [`LocationSharer`](super::LocationSharer).
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub mode: SharingMode,

    /// Interval used until speed is known, and restored on stop.
    pub default_interval: Duration,

    pub read_timeout: Duration,
    pub read_max_age: Duration,
    pub initial_read_timeout: Duration,
    pub initial_read_max_age: Duration,

    /// Deadline applied to each write attempt.
    pub write_timeout: Duration,

    /// Backoff for transient write failures.
    pub retry: RetryPolicy,

    pub continuous_interval: Duration,
    pub distance_filter_m: f64,

    pub connectivity_probe_timeout: Duration,
    pub registration_settle: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            mode: SharingMode::default(),
            default_interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            read_max_age: Duration::from_millis(DEFAULT_READ_MAX_AGE_MS),
            initial_read_timeout: Duration::from_millis(DEFAULT_INITIAL_READ_TIMEOUT_MS),
            initial_read_max_age: Duration::from_millis(DEFAULT_INITIAL_READ_MAX_AGE_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            retry: RetryPolicy::with_base(
                DEFAULT_MAX_RETRIES,
                Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            ),
            continuous_interval: Duration::from_millis(DEFAULT_CONTINUOUS_INTERVAL_MS),
            distance_filter_m: DEFAULT_DISTANCE_FILTER_M,
            connectivity_probe_timeout: Duration::from_millis(DEFAULT_CONNECTIVITY_PROBE_MS),
            registration_settle: Duration::from_millis(DEFAULT_REGISTRATION_SETTLE_MS),
        }
    }
}

impl ProducerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: SharingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_default_interval(mut self, interval: Duration) -> Self {
        self.default_interval = interval;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_read_timeouts(mut self, tick: Duration, initial: Duration) -> Self {
        self.read_timeout = tick;
        self.initial_read_timeout = initial;
        self
    }

    pub fn with_continuous_updates(mut self, interval: Duration, distance_filter_m: f64) -> Self {
        self.continuous_interval = interval;
        self.distance_filter_m = distance_filter_m;
        self
    }

    pub fn with_registration_settle(mut self, settle: Duration) -> Self {
        self.registration_settle = settle;
        self
    }

    /// Request used by each update tick.
    pub fn tick_request(&self) -> PositionRequest {
        PositionRequest::high_accuracy(self.read_timeout, self.read_max_age)
    }

    /// Request used for the first fix of a session.
    pub fn initial_request(&self) -> PositionRequest {
        PositionRequest::high_accuracy(self.initial_read_timeout, self.initial_read_max_age)
    }
}

/// Configuration for [`BackgroundLocationTask`](super::BackgroundLocationTask).
#[derive(Debug, Clone)]
pub struct BackgroundTaskConfig {
    pub write_timeout: Duration,
    pub retry: RetryPolicy,
    /// Consecutive failures at which each further failure logs an error.
    pub consecutive_error_threshold: u32,
}

impl Default for BackgroundTaskConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            retry: RetryPolicy::default(),
            consecutive_error_threshold: DEFAULT_CONSECUTIVE_ERROR_THRESHOLD,
        }
    }
}

impl BackgroundTaskConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_consecutive_error_threshold(mut self, threshold: u32) -> Self {
        self.consecutive_error_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_defaults() {
        let config = ProducerConfig::default();
        assert_eq!(config.mode, SharingMode::Background);
        assert_eq!(config.default_interval, Duration::from_secs(5));
        assert_eq!(config.tick_request().timeout, Duration::from_secs(10));
        assert_eq!(config.tick_request().max_age, Duration::from_secs(5));
        assert_eq!(config.initial_request().timeout, Duration::from_secs(15));
        assert_eq!(config.initial_request().max_age, Duration::from_secs(10));
        assert_eq!(config.retry.max_retries(), 3);
        assert_eq!(config.retry.delay_for_retry(1), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_sharing_mode_parse() {
        assert_eq!("Foreground".parse::<SharingMode>(), Ok(SharingMode::Foreground));
        assert_eq!(" background ".parse::<SharingMode>(), Ok(SharingMode::Background));
        assert!("always".parse::<SharingMode>().is_err());
        assert_eq!(SharingMode::Foreground.to_string(), "foreground");
    }

    #[test]
    fn test_background_defaults() {
        let config = BackgroundTaskConfig::default().with_consecutive_error_threshold(2);
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.consecutive_error_threshold, 2);
    }
}
