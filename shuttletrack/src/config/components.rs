//! Translation from `ConfigFile` sections to component configs.
//!
//! Keeps the INI-to-runtime mapping in one place so callers never touch raw
//! millisecond fields.

use std::time::Duration;

use super::settings::ConfigFile;
use crate::consumer::{BusMapConfig, CleanupConfig, ClusterConfig};
use crate::producer::{BackgroundTaskConfig, ProducerConfig};
use crate::retry::RetryPolicy;

impl From<&ConfigFile> for ProducerConfig {
    fn from(config: &ConfigFile) -> Self {
        let p = &config.producer;
        Self {
            mode: p.mode,
            default_interval: Duration::from_millis(p.default_interval_ms),
            read_timeout: Duration::from_millis(p.read_timeout_ms),
            read_max_age: Duration::from_millis(p.read_max_age_ms),
            initial_read_timeout: Duration::from_millis(p.initial_read_timeout_ms),
            initial_read_max_age: Duration::from_millis(p.initial_read_max_age_ms),
            write_timeout: Duration::from_millis(p.write_timeout_ms),
            retry: RetryPolicy::with_base(p.max_retries, Duration::from_millis(p.retry_base_ms)),
            continuous_interval: Duration::from_millis(p.continuous_interval_ms),
            distance_filter_m: p.distance_filter_m,
            ..ProducerConfig::default()
        }
    }
}

/// The background task shares the producer's write deadline and retry policy.
impl From<&ConfigFile> for BackgroundTaskConfig {
    fn from(config: &ConfigFile) -> Self {
        let p = &config.producer;
        BackgroundTaskConfig::default()
            .with_write_timeout(Duration::from_millis(p.write_timeout_ms))
            .with_retry(RetryPolicy::with_base(
                p.max_retries,
                Duration::from_millis(p.retry_base_ms),
            ))
            .with_consecutive_error_threshold(config.background.consecutive_error_threshold)
    }
}

impl From<&ConfigFile> for ClusterConfig {
    fn from(config: &ConfigFile) -> Self {
        ClusterConfig::default()
            .with_threshold(config.consumer.cluster_threshold_deg)
            .with_activation_count(config.consumer.cluster_activation_count)
    }
}

impl From<&ConfigFile> for CleanupConfig {
    fn from(config: &ConfigFile) -> Self {
        CleanupConfig::default()
            .with_interval(Duration::from_secs(config.cleanup.interval_secs))
            .with_jitter(Duration::from_millis(config.cleanup.jitter_ms))
            .with_stale_window(Duration::from_secs(config.consumer.stale_window_secs))
    }
}

impl From<&ConfigFile> for BusMapConfig {
    fn from(config: &ConfigFile) -> Self {
        let c = &config.consumer;
        BusMapConfig::default()
            .with_cleanup(CleanupConfig::from(config))
            .with_stale_window(Duration::from_secs(c.stale_window_secs))
            .with_fresh_window(Duration::from_secs(c.fresh_window_secs))
            .with_retry(RetryPolicy::with_base(
                c.max_retries,
                Duration::from_millis(c.retry_base_ms),
            ))
            .with_cluster(ClusterConfig::from(config))
    }
}
