//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This module is the single place where INI key names are mapped to
//! struct fields. Missing sections and keys keep their defaults.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use crate::producer::SharingMode;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [producer] section
    if let Some(section) = ini.section(Some("producer")) {
        let p = &mut config.producer;
        if let Some(v) = section.get("mode") {
            p.mode = v.parse::<SharingMode>().map_err(|reason| ConfigFileError::InvalidValue {
                section: "producer".to_string(),
                key: "mode".to_string(),
                value: v.to_string(),
                reason,
            })?;
        }
        read_millis(section, "producer", "default_interval_ms", &mut p.default_interval_ms)?;
        read_millis(section, "producer", "read_timeout_ms", &mut p.read_timeout_ms)?;
        read_number(section, "producer", "read_max_age_ms", &mut p.read_max_age_ms)?;
        read_millis(section, "producer", "initial_read_timeout_ms", &mut p.initial_read_timeout_ms)?;
        read_number(section, "producer", "initial_read_max_age_ms", &mut p.initial_read_max_age_ms)?;
        read_millis(section, "producer", "write_timeout_ms", &mut p.write_timeout_ms)?;
        read_number(section, "producer", "max_retries", &mut p.max_retries)?;
        read_millis(section, "producer", "retry_base_ms", &mut p.retry_base_ms)?;
        read_millis(section, "producer", "continuous_interval_ms", &mut p.continuous_interval_ms)?;
        if let Some(v) = section.get("distance_filter_m") {
            p.distance_filter_m = parse_non_negative_float("producer", "distance_filter_m", v)?;
        }
    }

    // [background] section
    if let Some(section) = ini.section(Some("background")) {
        let b = &mut config.background;
        read_number(section, "background", "consecutive_error_threshold", &mut b.consecutive_error_threshold)?;
        if b.consecutive_error_threshold == 0 {
            return Err(invalid(
                "background",
                "consecutive_error_threshold",
                "0",
                "must be a positive integer",
            ));
        }
    }

    // [consumer] section
    if let Some(section) = ini.section(Some("consumer")) {
        let c = &mut config.consumer;
        read_positive(section, "consumer", "stale_window_secs", &mut c.stale_window_secs, "seconds")?;
        read_positive(section, "consumer", "fresh_window_secs", &mut c.fresh_window_secs, "seconds")?;
        read_number(section, "consumer", "max_retries", &mut c.max_retries)?;
        read_millis(section, "consumer", "retry_base_ms", &mut c.retry_base_ms)?;
        read_number(section, "consumer", "cluster_activation_count", &mut c.cluster_activation_count)?;
        if let Some(v) = section.get("cluster_threshold_deg") {
            let threshold = parse_non_negative_float("consumer", "cluster_threshold_deg", v)?;
            if threshold == 0.0 {
                return Err(invalid("consumer", "cluster_threshold_deg", v, "must be greater than 0"));
            }
            c.cluster_threshold_deg = threshold;
        }
    }

    // [cleanup] section
    if let Some(section) = ini.section(Some("cleanup")) {
        let c = &mut config.cleanup;
        read_positive(section, "cleanup", "interval_secs", &mut c.interval_secs, "seconds")?;
        read_number(section, "cleanup", "jitter_ms", &mut c.jitter_ms)?;
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = v.to_string();
            }
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Overwrite `target` with the parsed value of `key`, if present.
fn read_number<T: FromStr>(
    section: &Properties,
    section_name: &str,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigFileError> {
    if let Some(v) = section.get(key) {
        *target = v
            .trim()
            .parse()
            .map_err(|_| invalid(section_name, key, v, "must be a non-negative integer"))?;
    }
    Ok(())
}

/// Like [`read_number`] but rejects zero.
fn read_positive(
    section: &Properties,
    section_name: &str,
    key: &str,
    target: &mut u64,
    unit: &str,
) -> Result<(), ConfigFileError> {
    if let Some(v) = section.get(key) {
        let parsed: u64 = v.trim().parse().unwrap_or(0);
        if parsed == 0 {
            return Err(invalid(
                section_name,
                key,
                v,
                &format!("must be a positive integer ({})", unit),
            ));
        }
        *target = parsed;
    }
    Ok(())
}

fn read_millis(
    section: &Properties,
    section_name: &str,
    key: &str,
    target: &mut u64,
) -> Result<(), ConfigFileError> {
    read_positive(section, section_name, key, target, "milliseconds")
}

fn parse_non_negative_float(section: &str, key: &str, v: &str) -> Result<f64, ConfigFileError> {
    match v.trim().parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 => Ok(f),
        _ => Err(invalid(section, key, v, "must be a non-negative number")),
    }
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
