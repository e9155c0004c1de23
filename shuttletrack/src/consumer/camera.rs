//! Camera targets for recentring the map.

use std::time::Duration;

use thiserror::Error;

use super::filter::ActiveBus;
use crate::device::{LocationError, LocationProvider, PositionRequest};
use crate::record::is_valid_coordinate;

/// Zoom used when centring on one point.
pub const SINGLE_POINT_ZOOM: f64 = 14.0;

/// Zoom used when fitting several buses.
pub const MULTI_POINT_ZOOM: f64 = 12.0;

/// Zoom of the initial campus view.
pub const DEFAULT_ZOOM: f64 = 10.0;

/// Initial map centre (longitude, latitude).
pub const DEFAULT_CENTER: (f64, f64) = (91.7832, 22.3569);

/// Timeout for the one-shot read behind "locate me".
pub const LOCATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where to point the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraTarget {
    /// Centre as (longitude, latitude).
    pub center: (f64, f64),
    pub zoom: f64,
}

impl CameraTarget {
    pub fn at(latitude: f64, longitude: f64, zoom: f64) -> Self {
        Self {
            center: (longitude, latitude),
            zoom,
        }
    }

    /// Campus overview shown before any interaction.
    pub fn default_view() -> Self {
        Self {
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
        }
    }

    pub fn longitude(&self) -> f64 {
        self.center.0
    }

    pub fn latitude(&self) -> f64 {
        self.center.1
    }
}

/// Fit the camera to the active buses.
///
/// Returns `None` when there is nothing to show.
pub fn fit_camera(buses: &[ActiveBus]) -> Option<CameraTarget> {
    match buses {
        [] => None,
        [only] => Some(CameraTarget::at(only.latitude(), only.longitude(), SINGLE_POINT_ZOOM)),
        many => {
            let (mut min_lat, mut max_lat) = (f64::INFINITY, f64::NEG_INFINITY);
            let (mut min_lng, mut max_lng) = (f64::INFINITY, f64::NEG_INFINITY);
            for bus in many {
                min_lat = min_lat.min(bus.latitude());
                max_lat = max_lat.max(bus.latitude());
                min_lng = min_lng.min(bus.longitude());
                max_lng = max_lng.max(bus.longitude());
            }
            Some(CameraTarget::at(
                (min_lat + max_lat) / 2.0,
                (min_lng + max_lng) / 2.0,
                MULTI_POINT_ZOOM,
            ))
        }
    }
}

/// Why the user's own position could not be shown.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocateError {
    #[error("Permission to access location was denied")]
    PermissionDenied,

    #[error("Location services are disabled")]
    ServicesDisabled,

    #[error("Invalid coordinates returned by the device")]
    InvalidCoordinates,

    #[error("Could not get your location: {0}")]
    Location(#[from] LocationError),
}

/// Read the device position once and centre on it.
pub async fn locate_user(provider: &dyn LocationProvider) -> Result<CameraTarget, LocateError> {
    if !provider.request_foreground_permission().await.is_granted() {
        return Err(LocateError::PermissionDenied);
    }
    if !provider.has_services_enabled().await {
        return Err(LocateError::ServicesDisabled);
    }

    let fix = provider
        .current_position(PositionRequest::high_accuracy(LOCATE_TIMEOUT, Duration::ZERO))
        .await?;

    if !is_valid_coordinate(fix.latitude, fix.longitude) {
        return Err(LocateError::InvalidCoordinates);
    }

    tracing::debug!(latitude = fix.latitude, longitude = fix.longitude, "User located");
    Ok(CameraTarget::at(fix.latitude, fix.longitude, SINGLE_POINT_ZOOM))
}
