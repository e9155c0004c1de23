//! Producer error taxonomy.

use std::fmt;

use thiserror::Error;

use super::write::WriteError;
use crate::device::{LocationError, RegistrationError};
use crate::record::InvalidCoordinates;
use crate::store::{FlagStoreError, StoreError};

/// Which location permission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionKind {
    Foreground,
    Background,
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionKind::Foreground => write!(f, "foreground"),
            PermissionKind::Background => write!(f, "background"),
        }
    }
}

/// Errors from starting, stopping or reconfiguring a sharing session.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("No authenticated user")]
    NotAuthenticated,

    #[error("Bus name cannot be empty")]
    EmptyLabel,

    #[error("Already sharing location for {label}")]
    AlreadySharing { label: String },

    #[error("A start or stop operation is already in progress")]
    OperationInProgress,

    #[error("Cannot switch from {current} to {requested} while sharing")]
    BusChangeWhileSharing { current: String, requested: String },

    #[error("{0} location permission denied")]
    PermissionDenied(PermissionKind),

    #[error("Location services are disabled")]
    ServicesDisabled,

    #[error("Timed out acquiring initial location")]
    LocationTimeout,

    #[error("Location unavailable")]
    LocationUnavailable,

    #[error("Invalid coordinates: ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    #[error("Sharing was cancelled before it started")]
    Cancelled,

    #[error("Background task is not registered")]
    TaskNotRegistered,

    #[error("Stored bus name did not read back: expected {expected:?}, found {found:?}")]
    StorageVerification {
        expected: String,
        found: Option<String>,
    },

    #[error("Flag store error: {0}")]
    Flags(#[from] FlagStoreError),

    #[error("Background registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Store write failed: {0}")]
    StoreWrite(#[from] StoreError),
}

impl From<InvalidCoordinates> for ShareError {
    fn from(e: InvalidCoordinates) -> Self {
        ShareError::InvalidCoordinates {
            latitude: e.latitude,
            longitude: e.longitude,
        }
    }
}

impl From<LocationError> for ShareError {
    fn from(e: LocationError) -> Self {
        match e {
            LocationError::PermissionDenied => ShareError::PermissionDenied(PermissionKind::Foreground),
            LocationError::ServicesDisabled => ShareError::ServicesDisabled,
            LocationError::Timeout => ShareError::LocationTimeout,
            LocationError::Unavailable | LocationError::Other(_) => ShareError::LocationUnavailable,
        }
    }
}

impl From<WriteError> for ShareError {
    fn from(e: WriteError) -> Self {
        match e {
            WriteError::Cancelled => ShareError::Cancelled,
            WriteError::Exhausted { source, .. } | WriteError::Rejected(source) => {
                ShareError::StoreWrite(source)
            }
        }
    }
}

impl ShareError {
    /// Actionable text for the user.
    pub fn user_message(&self) -> String {
        match self {
            ShareError::NotAuthenticated => "Please sign in to share location.".to_string(),
            ShareError::EmptyLabel => "Please select a bus name.".to_string(),
            ShareError::AlreadySharing { label } => {
                format!("You are already sharing location for {}", label)
            }
            ShareError::OperationInProgress => {
                "Please wait for the current operation to finish.".to_string()
            }
            ShareError::BusChangeWhileSharing { .. } => {
                "Please stop sharing before selecting a different bus.".to_string()
            }
            ShareError::PermissionDenied(PermissionKind::Foreground) => {
                "Location permission is required to share your location.".to_string()
            }
            ShareError::PermissionDenied(PermissionKind::Background) => {
                "Please grant 'Allow all the time' in App settings for continuous sharing."
                    .to_string()
            }
            ShareError::ServicesDisabled => {
                "Please enable location services in your device settings.".to_string()
            }
            ShareError::LocationTimeout => {
                "Could not get your location. Make sure GPS is enabled and you're not indoors."
                    .to_string()
            }
            ShareError::LocationUnavailable => "GPS is not available on this device.".to_string(),
            ShareError::InvalidCoordinates { .. } => {
                "The device reported an invalid position. Please try again.".to_string()
            }
            ShareError::Cancelled => "Sharing was cancelled.".to_string(),
            ShareError::TaskNotRegistered => {
                "Background task not registered. Please restart the app.".to_string()
            }
            ShareError::StorageVerification { .. } | ShareError::Flags(_) => {
                "Failed to save bus name. Please try again.".to_string()
            }
            ShareError::Registration(_) => {
                "Failed to start background location updates. Please try again.".to_string()
            }
            ShareError::StoreWrite(e) if e.is_transient() => {
                "Network error. Check your internet connection.".to_string()
            }
            ShareError::StoreWrite(e) => format!("Error: {}", e),
        }
    }

    /// Whether the user should be pointed at the system settings.
    pub fn needs_settings(&self) -> bool {
        matches!(
            self,
            ShareError::PermissionDenied(_) | ShareError::ServicesDisabled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_error_mapping() {
        assert!(matches!(
            ShareError::from(LocationError::Timeout),
            ShareError::LocationTimeout
        ));
        assert!(matches!(
            ShareError::from(LocationError::Unavailable),
            ShareError::LocationUnavailable
        ));
        assert!(matches!(
            ShareError::from(LocationError::ServicesDisabled),
            ShareError::ServicesDisabled
        ));
    }

    #[test]
    fn test_user_messages() {
        assert!(ShareError::PermissionDenied(PermissionKind::Background)
            .user_message()
            .contains("Allow all the time"));
        assert!(ShareError::StoreWrite(StoreError::Timeout)
            .user_message()
            .contains("internet"));
        assert!(ShareError::StoreWrite(StoreError::PermissionDenied("rules".into()))
            .user_message()
            .starts_with("Error:"));
        assert_eq!(
            ShareError::AlreadySharing { label: "Surma".into() }.user_message(),
            "You are already sharing location for Surma"
        );
    }

    #[test]
    fn test_needs_settings() {
        assert!(ShareError::ServicesDisabled.needs_settings());
        assert!(ShareError::PermissionDenied(PermissionKind::Foreground).needs_settings());
        assert!(!ShareError::LocationTimeout.needs_settings());
    }
}
