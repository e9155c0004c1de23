//! `Default` implementations for every settings section.
//!
//! Component constants are the single source of default values; this module
//! only gathers them into the INI shape.

use std::path::PathBuf;

use super::settings::*;
use crate::consumer::cleanup::{DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_CLEANUP_JITTER_MS};
use crate::consumer::cluster::{DEFAULT_CLUSTER_ACTIVATION_COUNT, DEFAULT_CLUSTER_THRESHOLD_DEG};
use crate::consumer::filter::DEFAULT_STALE_WINDOW_SECS;
use crate::consumer::marker::DEFAULT_FRESH_WINDOW_SECS;
use crate::logging::{default_log_dir, default_log_file};
use crate::producer::{
    SharingMode, DEFAULT_CONSECUTIVE_ERROR_THRESHOLD, DEFAULT_CONTINUOUS_INTERVAL_MS,
    DEFAULT_DISTANCE_FILTER_M, DEFAULT_INITIAL_READ_MAX_AGE_MS, DEFAULT_INITIAL_READ_TIMEOUT_MS,
    DEFAULT_INTERVAL_MS, DEFAULT_READ_MAX_AGE_MS, DEFAULT_READ_TIMEOUT_MS, DEFAULT_WRITE_TIMEOUT_MS,
};
use crate::retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_MS};

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            producer: ProducerSettings::default(),
            background: BackgroundSettings::default(),
            consumer: ConsumerSettings::default(),
            cleanup: CleanupSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            mode: SharingMode::default(),
            default_interval_ms: DEFAULT_INTERVAL_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            read_max_age_ms: DEFAULT_READ_MAX_AGE_MS,
            initial_read_timeout_ms: DEFAULT_INITIAL_READ_TIMEOUT_MS,
            initial_read_max_age_ms: DEFAULT_INITIAL_READ_MAX_AGE_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
            continuous_interval_ms: DEFAULT_CONTINUOUS_INTERVAL_MS,
            distance_filter_m: DEFAULT_DISTANCE_FILTER_M,
        }
    }
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            consecutive_error_threshold: DEFAULT_CONSECUTIVE_ERROR_THRESHOLD,
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            stale_window_secs: DEFAULT_STALE_WINDOW_SECS,
            fresh_window_secs: DEFAULT_FRESH_WINDOW_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
            cluster_activation_count: DEFAULT_CLUSTER_ACTIVATION_COUNT,
            cluster_threshold_deg: DEFAULT_CLUSTER_THRESHOLD_DEG,
        }
    }
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            jitter_ms: DEFAULT_CLEANUP_JITTER_MS,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(default_log_dir()),
            file: default_log_file().to_string(),
        }
    }
}
