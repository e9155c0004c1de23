//! Reading and writing `config.ini`.
//!
//! The file lives at `~/.shuttletrack/config.ini` unless `SHUTTLETRACK_CONFIG`
//! names another path. A missing file means defaults. Saves go through a
//! temporary sibling and a rename so a tracker that loses power mid-save keeps
//! its previous settings.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;
use tracing::{debug, info};

use super::settings::ConfigFile;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "SHUTTLETRACK_CONFIG";

const CONFIG_DIR_NAME: &str = ".shuttletrack";
const CONFIG_FILE_NAME: &str = "config.ini";

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("Cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigFile {
    /// Load from [`config_file_path`].
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = super::parser::parse_ini(&ini)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load from `path`, writing a commented defaults file first if none exists.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigFileError> {
        if path.exists() {
            return Self::load_from(path);
        }
        let config = Self::default();
        config.save_to(path)?;
        info!(path = %path.display(), "Wrote default configuration");
        Ok(config)
    }

    /// Save to [`config_file_path`].
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save to `path`, replacing it atomically.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        let write_err = |source| ConfigFileError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let tmp = path.with_extension("ini.tmp");
        std::fs::write(&tmp, super::writer::to_config_string(self)).map_err(write_err)?;
        std::fs::rename(&tmp, path).map_err(write_err)
    }
}

/// `~/.shuttletrack`, or `./.shuttletrack` without a home directory.
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Config file location, honouring [`CONFIG_PATH_ENV`].
pub fn config_file_path() -> PathBuf {
    resolve_config_path(std::env::var_os(CONFIG_PATH_ENV))
}

fn resolve_config_path(override_path: Option<OsString>) -> PathBuf {
    match override_path {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_directory().join(CONFIG_FILE_NAME),
    }
}
