//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::path::PathBuf;

use crate::producer::SharingMode;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    /// Foreground producer settings
    pub producer: ProducerSettings,
    /// Background location task settings
    pub background: BackgroundSettings,
    /// Map consumer settings
    pub consumer: ConsumerSettings,
    /// Cleanup sweep settings
    pub cleanup: CleanupSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Producer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerSettings {
    /// Continuous-update delivery mode
    pub mode: SharingMode,
    /// Sampling interval before speed is known
    pub default_interval_ms: u64,
    pub read_timeout_ms: u64,
    pub read_max_age_ms: u64,
    pub initial_read_timeout_ms: u64,
    pub initial_read_max_age_ms: u64,
    /// Deadline for one store write attempt
    pub write_timeout_ms: u64,
    /// Retries after the initial write attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles after each one
    pub retry_base_ms: u64,
    /// Delivery interval requested from the OS in background mode
    pub continuous_interval_ms: u64,
    /// Movement filter requested from the OS in background mode
    pub distance_filter_m: f64,
}

/// Background task configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundSettings {
    /// Consecutive failed invocations before errors are escalated
    pub consecutive_error_threshold: u32,
}

/// Map consumer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSettings {
    /// Records older than this are hidden and swept
    pub stale_window_secs: u64,
    /// Records older than this are dimmed
    pub fresh_window_secs: u64,
    /// Resubscribe attempts before giving up
    pub max_retries: u32,
    pub retry_base_ms: u64,
    /// Clustering applies above this many active buses
    pub cluster_activation_count: usize,
    /// Clustering radius in degrees
    pub cluster_threshold_deg: f64,
}

/// Cleanup sweep configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupSettings {
    pub interval_secs: u64,
    /// Upper bound of the random delay added to each period
    pub jitter_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Directory for log files
    pub directory: PathBuf,
    /// Log file name inside `directory`
    pub file: String,
}
