//! Bus records and the keys they are stored under.
//!
//! - [`key`] - label sanitization and `buses/{key}` paths
//! - [`model`] - [`BusRecord`], [`DeviceType`] and the coordinate range check

mod key;
mod model;

pub use key::{sanitize_key, BusKey, BUSES_PATH, FORBIDDEN_KEY_CHARS, KEY_REPLACEMENT};
pub use model::{
    is_valid_coordinate, raw_timestamp, staleness_cutoff, BusRecord, DeviceType,
    InvalidCoordinates, MAX_LATITUDE, MAX_LONGITUDE,
};
