//! Device collaborators: positioning hardware and background registration.

mod location;
mod registrar;
pub mod simulated;

pub use location::{
    Accuracy, LocationError, LocationFix, LocationProvider, PermissionStatus, PositionRequest,
};
pub use registrar::{
    BackgroundRegistrar, ContinuousUpdateOptions, ForegroundServiceNotification,
    RegistrationError, BACKGROUND_TASK_NAME, NOTIFICATION_COLOR, NOTIFICATION_TITLE,
};
pub use simulated::{SimulatedLocation, SimulatedRegistrar};
