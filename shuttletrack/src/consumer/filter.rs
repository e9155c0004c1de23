//! Active-bus filtering.
//!
//! A record is active when its timestamp is within the staleness window and
//! its coordinates are in range. Everything else is hidden from the view;
//! deleting it is the cleanup sweep's job.

use std::time::Duration;

use serde_json::Value;
use tracing::trace;

use crate::record::{staleness_cutoff, BusKey, BusRecord};

/// Default staleness window (3 minutes).
pub const DEFAULT_STALE_WINDOW_SECS: u64 = 180;

/// A live bus shown on the map.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveBus {
    pub key: BusKey,
    pub record: BusRecord,
}

impl ActiveBus {
    pub fn latitude(&self) -> f64 {
        self.record.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.record.longitude
    }
}

/// Filter a `buses` snapshot down to its active records.
///
/// Children without numeric coordinates are skipped; every other field is
/// decoded leniently. Output is ordered by key so the clustering anchor
/// order is stable across pushes.
pub fn filter_active(snapshot: Option<&Value>, now_ms: i64, stale_window: Duration) -> Vec<ActiveBus> {
    let Some(Value::Object(children)) = snapshot else {
        return Vec::new();
    };

    let cutoff = staleness_cutoff(now_ms, stale_window);
    let mut active: Vec<ActiveBus> = children
        .iter()
        .filter_map(|(name, value)| {
            let Some(record) = BusRecord::from_value(value) else {
                trace!(bus = %name, "Skipping undecodable bus record");
                return None;
            };
            if record.timestamp < cutoff || !record.has_valid_coordinates() {
                return None;
            }
            Some(ActiveBus {
                key: BusKey::from_store(name.clone()),
                record,
            })
        })
        .collect();

    active.sort_by(|a, b| a.key.cmp(&b.key));
    active
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DeviceType;
    use serde_json::json;

    const WINDOW: Duration = Duration::from_secs(DEFAULT_STALE_WINDOW_SECS);

    fn record(lat: f64, lng: f64, ts: i64) -> Value {
        json!({
            "latitude": lat,
            "longitude": lng,
            "timestamp": ts,
            "deviceType": "student_share",
            "sharedBy": "Rafi"
        })
    }

    #[test]
    fn test_empty_snapshot() {
        assert!(filter_active(None, 0, WINDOW).is_empty());
        assert!(filter_active(Some(&Value::Null), 0, WINDOW).is_empty());
    }

    #[test]
    fn test_stale_records_excluded() {
        let snapshot = json!({
            "Surma": record(22.4, 91.9, 0),
            "Halda": record(22.5, 91.8, 150_000),
        });

        let active = filter_active(Some(&snapshot), 200_000, WINDOW);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].key.as_str(), "Halda");
    }

    #[test]
    fn test_cutoff_is_inclusive() {
        let snapshot = json!({ "Surma": record(22.4, 91.9, 20_000) });
        assert_eq!(filter_active(Some(&snapshot), 200_000, WINDOW).len(), 1);
        assert!(filter_active(Some(&snapshot), 200_001, WINDOW).is_empty());
    }

    #[test]
    fn test_invalid_coordinates_excluded() {
        let snapshot = json!({
            "North": record(90.5, 0.0, 1_000),
            "East": record(0.0, 180.5, 1_000),
            "Ok": record(-90.0, -180.0, 1_000),
        });

        let active = filter_active(Some(&snapshot), 1_000, WINDOW);
        let keys: Vec<_> = active.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["Ok"]);
    }

    #[test]
    fn test_undecodable_and_missing_timestamp() {
        let snapshot = json!({
            "garbage": "not a record",
            "noTime": { "latitude": 1.0, "longitude": 1.0 },
        });
        // Missing timestamp reads as 0, which is stale at any realistic time.
        assert!(filter_active(Some(&snapshot), 1_000_000, WINDOW).is_empty());
    }

    #[test]
    fn test_foreign_record_shapes_stay_active() {
        let now = 1_700_000_010_000;
        let snapshot = json!({
            "Float": { "latitude": 22.4, "longitude": 91.8, "timestamp": 1_700_000_000_000.5 },
            "Other": {
                "latitude": 22.4, "longitude": 91.8,
                "timestamp": 1_700_000_000_000_i64, "deviceType": "van"
            },
            "NullSpeed": {
                "latitude": 22.4, "longitude": 91.8,
                "timestamp": 1_700_000_000_000_i64, "speed": null, "sharedBy": null
            },
        });

        let active = filter_active(Some(&snapshot), now, WINDOW);
        let keys: Vec<_> = active.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["Float", "NullSpeed", "Other"]);
        assert!(active
            .iter()
            .all(|b| b.record.device_type == DeviceType::StudentShare));
    }
}
