//! OS-managed continuous location delivery.
//!
//! In background mode the producer does not poll; it asks the platform to
//! deliver fixes to a named task (see [`crate::producer::BackgroundLocationTask`])
//! and only manages the registration.

use std::time::Duration;

use thiserror::Error;

use super::location::Accuracy;
use crate::store::BoxFuture;

/// Identifier of the background location task.
pub const BACKGROUND_TASK_NAME: &str = "MYCUETBUS_BG_LOCATION";

/// Notification title shown while the foreground service runs.
pub const NOTIFICATION_TITLE: &str = "Sharing bus location";

/// Notification accent colour.
pub const NOTIFICATION_COLOR: &str = "#2563EB";

/// Persistent notification attached to the location service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundServiceNotification {
    pub title: String,
    pub body: String,
    pub color: String,
}

/// Options for [`BackgroundRegistrar::start_continuous_updates`].
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousUpdateOptions {
    pub accuracy: Accuracy,
    /// Minimum time between deliveries.
    pub interval: Duration,
    /// Minimum movement in metres between deliveries (0 = every interval).
    pub distance_filter_m: f64,
    pub pauses_automatically: bool,
    pub shows_indicator: bool,
    pub notification: ForegroundServiceNotification,
}

impl ContinuousUpdateOptions {
    /// Options used when sharing `bus_label`.
    pub fn for_bus(bus_label: &str, interval: Duration, distance_filter_m: f64) -> Self {
        Self {
            accuracy: Accuracy::High,
            interval,
            distance_filter_m,
            pauses_automatically: false,
            shows_indicator: true,
            notification: ForegroundServiceNotification {
                title: NOTIFICATION_TITLE.to_string(),
                body: format!("Sharing for {}", bus_label),
                color: NOTIFICATION_COLOR.to_string(),
            },
        }
    }
}

/// Errors from the platform's task registration API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    #[error("Background task '{0}' is not defined")]
    TaskNotDefined(String),

    #[error("Background registration failed: {0}")]
    Failed(String),
}

/// Platform API for registering continuous background location updates.
pub trait BackgroundRegistrar: Send + Sync {
    /// Whether a handler for `task_id` is defined in this process.
    fn is_task_registered(&self, task_id: &str) -> BoxFuture<'_, bool>;

    /// Whether continuous updates are currently being delivered to `task_id`.
    fn has_active_registration(&self, task_id: &str) -> BoxFuture<'_, Result<bool, RegistrationError>>;

    fn start_continuous_updates(
        &self,
        task_id: &str,
        options: ContinuousUpdateOptions,
    ) -> BoxFuture<'_, Result<(), RegistrationError>>;

    fn stop_continuous_updates(&self, task_id: &str) -> BoxFuture<'_, Result<(), RegistrationError>>;
}
