//! User configuration.
//!
//! `~/.shuttletrack/config.ini` is loaded into a [`ConfigFile`] with one
//! settings struct per INI section. Components never read the file directly;
//! each config struct implements `From<&ConfigFile>`.
//!
//! # Example
//!
//! ```ignore
//! use shuttletrack::config::ConfigFile;
//! use shuttletrack::consumer::BusMapConfig;
//!
//! let file = ConfigFile::load()?;
//! let map_config = BusMapConfig::from(&file);
//! ```

mod components;
mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use file::{config_directory, config_file_path, ConfigFileError, CONFIG_PATH_ENV};
pub use settings::{
    BackgroundSettings, CleanupSettings, ConfigFile, ConsumerSettings, LoggingSettings,
    ProducerSettings,
};
