//! The bus position record stored at `buses/{key}`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::device::LocationFix;

/// Maximum absolute latitude in degrees.
pub const MAX_LATITUDE: f64 = 90.0;

/// Maximum absolute longitude in degrees.
pub const MAX_LONGITUDE: f64 = 180.0;

/// Origin of a bus record; affects how the marker is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// A student phone sharing its position.
    #[default]
    StudentShare,
    /// A dedicated tracker mounted on the bus.
    GpsTracker,
}

impl DeviceType {
    /// Wire name as stored in the record.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::StudentShare => "student_share",
            DeviceType::GpsTracker => "gps_tracker",
        }
    }

    /// Map a stored tag onto a device type. Anything that is not a tracker
    /// is drawn as a student share.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some("gps_tracker") => DeviceType::GpsTracker,
            _ => DeviceType::StudentShare,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true if the coordinates are finite and inside the WGS84 range.
pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && latitude.abs() <= MAX_LATITUDE
        && longitude.abs() <= MAX_LONGITUDE
}

/// Coordinates outside the valid range.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("invalid coordinates: lat={latitude}, lng={longitude}")]
pub struct InvalidCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// One live bus position.
///
/// `timestamp` is the producer's local wall-clock write time in epoch
/// milliseconds and is the only staleness signal consumers use.
///
/// Decoding is lenient about everything except the coordinates: other
/// writers may store a fractional timestamp, `null` sensor values or an
/// unknown device tag, and such records are still live buses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusRecord {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "lenient_number")]
    pub accuracy: f64,
    #[serde(default, deserialize_with = "lenient_number")]
    pub speed: f64,
    #[serde(default, deserialize_with = "lenient_number")]
    pub heading: f64,
    #[serde(default, deserialize_with = "lenient_device_type")]
    pub device_type: DeviceType,
    #[serde(default, deserialize_with = "lenient_string")]
    pub shared_by: String,
}

impl BusRecord {
    /// Build a record from a device fix.
    ///
    /// Sensor values the device reports as missing, negative or NaN are
    /// stored as zero.
    pub fn from_fix(
        fix: &LocationFix,
        timestamp_ms: i64,
        device_type: DeviceType,
        shared_by: impl Into<String>,
    ) -> Result<Self, InvalidCoordinates> {
        if !is_valid_coordinate(fix.latitude, fix.longitude) {
            return Err(InvalidCoordinates {
                latitude: fix.latitude,
                longitude: fix.longitude,
            });
        }

        Ok(Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            timestamp: timestamp_ms,
            accuracy: non_negative(fix.accuracy),
            speed: non_negative(fix.speed),
            heading: non_negative(fix.heading),
            device_type,
            shared_by: shared_by.into(),
        })
    }

    /// Decode a record read from the store.
    ///
    /// Returns `None` for values that are not a record object.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Encode the record as a store value.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Whether the coordinates satisfy the range invariant.
    pub fn has_valid_coordinates(&self) -> bool {
        is_valid_coordinate(self.latitude, self.longitude)
    }

    /// Milliseconds since the record was written, clamped at zero.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp).max(0)
    }

    /// Whether the record is older than `window` at `now_ms`.
    pub fn is_older_than(&self, window: Duration, now_ms: i64) -> bool {
        self.timestamp < staleness_cutoff(now_ms, window)
    }
}

/// Earliest timestamp that still counts as live for the given window.
pub fn staleness_cutoff(now_ms: i64, window: Duration) -> i64 {
    now_ms.saturating_sub(window.as_millis() as i64)
}

/// Timestamp field of a raw store value, `0` when missing or malformed.
///
/// Fractional milliseconds are truncated toward negative infinity.
pub fn raw_timestamp(value: &Value) -> i64 {
    value.get("timestamp").map_or(0, timestamp_of)
}

fn timestamp_of(value: &Value) -> i64 {
    if let Some(ms) = value.as_i64() {
        return ms;
    }
    match value.as_f64() {
        Some(ms) if ms.is_finite() => ms.floor() as i64,
        _ => 0,
    }
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(timestamp_of(&Value::deserialize(deserializer)?))
}

fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Value::deserialize(deserializer)?.as_f64().unwrap_or(0.0))
}

fn lenient_device_type<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DeviceType, D::Error> {
    Ok(DeviceType::from_tag(Value::deserialize(deserializer)?.as_str()))
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        _ => String::new(),
    })
}

fn non_negative(value: Option<f64>) -> f64 {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => v,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fix(lat: f64, lng: f64) -> LocationFix {
        LocationFix {
            latitude: lat,
            longitude: lng,
            accuracy: Some(8.0),
            speed: Some(4.5),
            heading: Some(-1.0),
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_coordinate_range() {
        assert!(is_valid_coordinate(90.0, 180.0));
        assert!(is_valid_coordinate(-90.0, -180.0));
        assert!(!is_valid_coordinate(90.0001, 0.0));
        assert!(!is_valid_coordinate(0.0, -180.5));
        assert!(!is_valid_coordinate(f64::NAN, 0.0));
        assert!(!is_valid_coordinate(0.0, f64::INFINITY));
    }

    #[test]
    fn test_from_fix_clamps_sensor_values() {
        let record =
            BusRecord::from_fix(&fix(22.46, 91.97), 1_000, DeviceType::StudentShare, "Rahim")
                .unwrap();
        assert_eq!(record.accuracy, 8.0);
        assert_eq!(record.speed, 4.5);
        assert_eq!(record.heading, 0.0);
        assert_eq!(record.timestamp, 1_000);
        assert_eq!(record.shared_by, "Rahim");
    }

    #[test]
    fn test_from_fix_rejects_out_of_range() {
        let err = BusRecord::from_fix(&fix(95.0, 10.0), 0, DeviceType::StudentShare, "x")
            .unwrap_err();
        assert_eq!(err.latitude, 95.0);
    }

    #[test]
    fn test_wire_format_uses_camel_case() {
        let record =
            BusRecord::from_fix(&fix(1.0, 2.0), 5, DeviceType::GpsTracker, "Background").unwrap();
        let value = record.to_value().unwrap();
        assert_eq!(value["deviceType"], "gps_tracker");
        assert_eq!(value["sharedBy"], "Background");
        assert_eq!(value["timestamp"], 5);
    }

    #[test]
    fn test_from_value_tolerates_missing_optional_fields() {
        let record = BusRecord::from_value(&json!({"latitude": 1.5, "longitude": 2.5})).unwrap();
        assert_eq!(record.timestamp, 0);
        assert_eq!(record.device_type, DeviceType::StudentShare);
        assert!(BusRecord::from_value(&json!("garbage")).is_none());
        assert!(BusRecord::from_value(&json!({"latitude": 1.0})).is_none());
    }

    #[test]
    fn test_staleness() {
        let record = BusRecord::from_value(&json!({
            "latitude": 0.0, "longitude": 0.0, "timestamp": 0
        }))
        .unwrap();
        let window = Duration::from_secs(180);
        assert!(!record.is_older_than(window, 180_000));
        assert!(record.is_older_than(window, 180_001));
        assert_eq!(record.age_ms(200_000), 200_000);
        assert_eq!(record.age_ms(-5), 0);
    }

    #[test]
    fn test_raw_timestamp() {
        assert_eq!(raw_timestamp(&json!({"timestamp": 42})), 42);
        assert_eq!(raw_timestamp(&json!({"timestamp": "soon"})), 0);
        assert_eq!(
            raw_timestamp(&json!({"timestamp": 1_700_000_000_000.5})),
            1_700_000_000_000
        );
        assert_eq!(raw_timestamp(&json!(null)), 0);
    }

    #[test]
    fn test_from_value_tolerates_foreign_shapes() {
        let record = BusRecord::from_value(&json!({
            "latitude": 22.4,
            "longitude": 91.8,
            "timestamp": 1_700_000_000_000.5,
            "speed": null,
            "accuracy": "n/a",
            "deviceType": "van",
            "sharedBy": null
        }))
        .unwrap();
        assert_eq!(record.timestamp, 1_700_000_000_000);
        assert_eq!(record.speed, 0.0);
        assert_eq!(record.accuracy, 0.0);
        assert_eq!(record.device_type, DeviceType::StudentShare);
        assert_eq!(record.shared_by, "");

        let tracker = BusRecord::from_value(&json!({
            "latitude": 0.0, "longitude": 0.0, "deviceType": "gps_tracker"
        }))
        .unwrap();
        assert_eq!(tracker.device_type, DeviceType::GpsTracker);
    }
}
