//! Device location provider.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::store::BoxFuture;

/// One position fix reported by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in metres.
    pub accuracy: Option<f64>,
    /// Ground speed in metres per second.
    pub speed: Option<f64>,
    /// Heading in degrees from true north.
    pub heading: Option<f64>,
    /// Device time of the fix in epoch milliseconds.
    pub timestamp_ms: i64,
}

impl LocationFix {
    /// Fix with position only.
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            speed: None,
            heading: None,
            timestamp_ms: 0,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Reported speed, treating a missing or invalid value as stationary.
    pub fn speed_or_zero(&self) -> f64 {
        match self.speed {
            Some(s) if s.is_finite() && s > 0.0 => s,
            _ => 0.0,
        }
    }
}

/// Requested positioning accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accuracy {
    Low,
    Balanced,
    #[default]
    High,
}

/// Parameters of a one-shot position read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionRequest {
    pub accuracy: Accuracy,
    /// Give up after this long.
    pub timeout: Duration,
    /// A cached fix younger than this may be returned.
    pub max_age: Duration,
}

impl PositionRequest {
    pub fn high_accuracy(timeout: Duration, max_age: Duration) -> Self {
        Self {
            accuracy: Accuracy::High,
            timeout,
            max_age,
        }
    }
}

/// Outcome of a permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        self == PermissionStatus::Granted
    }
}

impl fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionStatus::Granted => write!(f, "granted"),
            PermissionStatus::Denied => write!(f, "denied"),
            PermissionStatus::Undetermined => write!(f, "undetermined"),
        }
    }
}

/// Errors from a position read.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location services are disabled")]
    ServicesDisabled,

    #[error("Timed out waiting for a location fix")]
    Timeout,

    #[error("Location is unavailable on this device")]
    Unavailable,

    #[error("Location error: {0}")]
    Other(String),
}

/// Access to the device's positioning hardware.
pub trait LocationProvider: Send + Sync {
    fn request_foreground_permission(&self) -> BoxFuture<'_, PermissionStatus>;

    fn request_background_permission(&self) -> BoxFuture<'_, PermissionStatus>;

    fn has_services_enabled(&self) -> BoxFuture<'_, bool>;

    fn current_position(
        &self,
        request: PositionRequest,
    ) -> BoxFuture<'_, Result<LocationFix, LocationError>>;
}
