//! Marker styling and render layout.

use std::time::Duration;

use super::cluster::{cluster_buses, ClusterConfig};
use super::filter::ActiveBus;
use crate::record::DeviceType;

/// Default age after which a marker is dimmed (60 seconds).
pub const DEFAULT_FRESH_WINDOW_SECS: u64 = 60;

pub const STALE_COLOR: &str = "#888888";
pub const GPS_TRACKER_COLOR: &str = "#00AA00";
pub const STUDENT_SHARE_COLOR: &str = "#FF0000";
pub const CLUSTER_COLOR: &str = "#FF6B35";

/// Icon for a bus marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerIcon {
    Bus,
    MapMarker,
}

impl MarkerIcon {
    pub fn name(&self) -> &'static str {
        match self {
            MarkerIcon::Bus => "bus",
            MarkerIcon::MapMarker => "map-marker",
        }
    }
}

/// Visual style of a single bus marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerStyle {
    pub color: &'static str,
    pub icon: MarkerIcon,
}

/// Style a bus: dimmed when older than `fresh_window`, else by device type.
pub fn marker_style(bus: &ActiveBus, now_ms: i64, fresh_window: Duration) -> MarkerStyle {
    let icon = match bus.record.device_type {
        DeviceType::GpsTracker => MarkerIcon::Bus,
        DeviceType::StudentShare => MarkerIcon::MapMarker,
    };

    let fresh_ms = fresh_window.as_millis() as i64;
    let color = if bus.record.timestamp != 0 && bus.record.age_ms(now_ms) > fresh_ms {
        STALE_COLOR
    } else {
        match bus.record.device_type {
            DeviceType::GpsTracker => GPS_TRACKER_COLOR,
            DeviceType::StudentShare => STUDENT_SHARE_COLOR,
        }
    };

    MarkerStyle { color, icon }
}

/// One element to draw.
#[derive(Debug, Clone, PartialEq)]
pub enum MapMarker {
    Bus {
        bus: ActiveBus,
        style: MarkerStyle,
    },
    Cluster {
        latitude: f64,
        longitude: f64,
        count: usize,
    },
}

impl MapMarker {
    /// Number of buses this marker stands for.
    pub fn count(&self) -> usize {
        match self {
            MapMarker::Bus { .. } => 1,
            MapMarker::Cluster { count, .. } => *count,
        }
    }
}

/// Lay out markers for the active set.
///
/// At or below the activation count every bus gets its own marker. Above
/// it, singleton clusters render as bus markers and larger clusters as a
/// count badge at the anchor's position.
pub fn layout_markers(
    buses: &[ActiveBus],
    cluster: &ClusterConfig,
    now_ms: i64,
    fresh_window: Duration,
) -> Vec<MapMarker> {
    let single = |bus: &ActiveBus| MapMarker::Bus {
        style: marker_style(bus, now_ms, fresh_window),
        bus: bus.clone(),
    };

    if !cluster.should_cluster(buses.len()) {
        return buses.iter().map(single).collect();
    }

    cluster_buses(buses, cluster.threshold_deg)
        .into_iter()
        .map(|c| {
            if c.count() == 1 {
                single(&c.representative)
            } else {
                MapMarker::Cluster {
                    latitude: c.latitude(),
                    longitude: c.longitude(),
                    count: c.count(),
                }
            }
        })
        .collect()
}
