//! Location producer.
//!
//! - [`LocationSharer`]: start/stop, per-tick updates and the foreground timer
//! - [`BackgroundLocationTask`]: stateless handler for OS-delivered fixes
//! - [`BusSession`]: the session state machine both are built around
//! - [`write_record`]: retrying record writer shared by both paths

mod background;
mod config;
mod error;
mod interval;
mod session;
mod sharer;
mod write;

pub use background::{BackgroundEvent, BackgroundLocationTask, BackgroundOutcome, BACKGROUND_SHARER};
pub use config::{
    BackgroundTaskConfig, ProducerConfig, SharingMode, DEFAULT_CONSECUTIVE_ERROR_THRESHOLD,
    DEFAULT_CONTINUOUS_INTERVAL_MS, DEFAULT_DISTANCE_FILTER_M, DEFAULT_INITIAL_READ_MAX_AGE_MS,
    DEFAULT_INITIAL_READ_TIMEOUT_MS, DEFAULT_INTERVAL_MS, DEFAULT_READ_MAX_AGE_MS,
    DEFAULT_READ_TIMEOUT_MS, DEFAULT_WRITE_TIMEOUT_MS,
};
pub use error::{PermissionKind, ShareError};
pub use interval::{interval_for_speed, FAST_INTERVAL, SLOW_INTERVAL, STATIONARY_INTERVAL};
pub use session::{BusSession, Release, SessionState, StartTicket, StopDecision};
pub use sharer::{
    LocationSharer, ShareAlert, SharerCollaborators, SharingStatus, StopOutcome, TickOutcome,
};
pub use write::{write_record, WriteError, WritePlan};
