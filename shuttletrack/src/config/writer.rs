//! INI serialization logic for converting `ConfigFile` → INI string.
//!
//! This module contains the `to_config_string()` function that produces
//! the commented INI representation written to `config.ini`.

use std::path::Path;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let p = &config.producer;
    let b = &config.background;
    let c = &config.consumer;
    let k = &config.cleanup;
    let l = &config.logging;

    format!(
        r#"[producer]
; How continuous updates are delivered while sharing:
;   background - the OS delivers fixes to the background task (survives restarts)
;   foreground - an in-process timer polls the location provider
mode = {}
; Sampling interval before any speed is known, in milliseconds (default: 5000)
; Once moving, the interval adapts: 3s above 10 m/s, 5s above 2 m/s, 10s otherwise
default_interval_ms = {}
; Per-tick position read timeout and maximum cached-fix age
read_timeout_ms = {}
read_max_age_ms = {}
; First read of a session
initial_read_timeout_ms = {}
initial_read_max_age_ms = {}
; Deadline for one store write attempt (default: 10000)
write_timeout_ms = {}
; Retries after a failed write, backing off from retry_base_ms (2s, 4s, 8s)
max_retries = {}
retry_base_ms = {}
; Background mode: interval and movement filter requested from the OS
continuous_interval_ms = {}
distance_filter_m = {}

[background]
; Consecutive failed invocations after which failures are logged as errors
consecutive_error_threshold = {}

[consumer]
; Buses not updated within this window are hidden and later deleted (default: 180)
stale_window_secs = {}
; Buses not updated within this window are drawn grey (default: 60)
fresh_window_secs = {}
; Subscription retries before the map shows a connection warning
max_retries = {}
retry_base_ms = {}
; Markers are clustered above this many active buses (default: 20)
cluster_activation_count = {}
; Clustering radius in degrees (default: 0.01)
cluster_threshold_deg = {}

[cleanup]
; Period of the expired-record sweep, in seconds (default: 60)
interval_secs = {}
; Random delay added to each period, drawn from [0, jitter_ms)
jitter_ms = {}

[logging]
; Log directory (default: logs) and file name (default: shuttletrack.log)
directory = {}
file = {}
"#,
        p.mode,
        p.default_interval_ms,
        p.read_timeout_ms,
        p.read_max_age_ms,
        p.initial_read_timeout_ms,
        p.initial_read_max_age_ms,
        p.write_timeout_ms,
        p.max_retries,
        p.retry_base_ms,
        p.continuous_interval_ms,
        p.distance_filter_m,
        b.consecutive_error_threshold,
        c.stale_window_secs,
        c.fresh_window_secs,
        c.max_retries,
        c.retry_base_ms,
        c.cluster_activation_count,
        c.cluster_threshold_deg,
        k.interval_secs,
        k.jitter_ms,
        path_to_string(&l.directory),
        l.file,
    )
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
