//! Handler for OS-delivered background location batches.
//!
//! The platform may invoke the handler in a process that was restarted since
//! sharing began, so it keeps no session state of its own. Every invocation
//! reads the active bus label from the durable flag store, obtains a store
//! client through the connector and writes the first fix of the batch.
//!
//! The only state carried between invocations is the consecutive-failure
//! counter, which exists for escalation logging. The handler never stops
//! itself; the producer's stop path deregisters it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::config::BackgroundTaskConfig;
use super::write::{write_record, WriteError, WritePlan};
use crate::clock::Clock;
use crate::device::LocationFix;
use crate::record::{BusKey, BusRecord, DeviceType};
use crate::store::{FlagStore, StoreConnector, StoreError, BUS_NAME_KEY};

/// `sharedBy` value for records written by the background task.
pub const BACKGROUND_SHARER: &str = "Background";

/// One delivery from the platform.
#[derive(Debug, Clone, Default)]
pub struct BackgroundEvent {
    pub locations: Vec<LocationFix>,
    /// Platform-reported delivery failure.
    pub error: Option<String>,
}

impl BackgroundEvent {
    pub fn with_locations(locations: Vec<LocationFix>) -> Self {
        Self {
            locations,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            locations: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// What one invocation did.
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundOutcome {
    Written { bus: BusKey, attempts: u32 },
    /// No bus label is stored; nothing to attribute the fix to.
    NoActiveBus,
    NoLocations,
    InvalidFix { latitude: f64, longitude: f64 },
    DeliveryError(String),
    FlagsUnavailable(String),
    ConnectFailed(StoreError),
    WriteFailed(WriteError),
}

impl BackgroundOutcome {
    /// Whether this outcome counts toward the consecutive-failure counter.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            BackgroundOutcome::DeliveryError(_)
                | BackgroundOutcome::FlagsUnavailable(_)
                | BackgroundOutcome::ConnectFailed(_)
                | BackgroundOutcome::WriteFailed(_)
        )
    }
}

/// Stateless background location handler.
pub struct BackgroundLocationTask {
    connector: Arc<dyn StoreConnector>,
    flags: Arc<dyn FlagStore>,
    clock: Arc<dyn Clock>,
    config: BackgroundTaskConfig,
    consecutive_errors: AtomicU32,
}

impl BackgroundLocationTask {
    pub fn new(
        connector: Arc<dyn StoreConnector>,
        flags: Arc<dyn FlagStore>,
        clock: Arc<dyn Clock>,
        config: BackgroundTaskConfig,
    ) -> Self {
        Self {
            connector,
            flags,
            clock,
            config,
            consecutive_errors: AtomicU32::new(0),
        }
    }

    /// Consecutive failed invocations since the last success.
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    /// Handle one delivery.
    pub async fn handle(&self, event: BackgroundEvent) -> BackgroundOutcome {
        debug!(locations = event.locations.len(), "Background task triggered");

        let outcome = self.process(event).await;
        match &outcome {
            BackgroundOutcome::Written { bus, attempts } => {
                self.consecutive_errors.store(0, Ordering::SeqCst);
                info!(bus = %bus, attempts, "Background location updated");
            }
            failure if failure.is_failure() => self.record_failure(failure),
            _ => {}
        }
        outcome
    }

    async fn process(&self, event: BackgroundEvent) -> BackgroundOutcome {
        if let Some(error) = event.error {
            return BackgroundOutcome::DeliveryError(error);
        }

        let Some(fix) = event.locations.into_iter().next() else {
            warn!("No locations in background delivery");
            return BackgroundOutcome::NoLocations;
        };

        let label = match self.flags.get(BUS_NAME_KEY).await {
            Ok(Some(label)) => label,
            Ok(None) => {
                warn!("No bus name in flag store, skipping background fix");
                return BackgroundOutcome::NoActiveBus;
            }
            Err(e) => return BackgroundOutcome::FlagsUnavailable(e.to_string()),
        };
        let Some(key) = BusKey::from_label(&label) else {
            warn!("Stored bus name is blank, skipping background fix");
            return BackgroundOutcome::NoActiveBus;
        };

        let record = match BusRecord::from_fix(
            &fix,
            self.clock.now_ms(),
            DeviceType::StudentShare,
            BACKGROUND_SHARER,
        ) {
            Ok(record) => record,
            Err(e) => {
                error!(bus = %key, error = %e, "Invalid coordinates in background fix");
                return BackgroundOutcome::InvalidFix {
                    latitude: e.latitude,
                    longitude: e.longitude,
                };
            }
        };

        let store = match self.connector.connect().await {
            Ok(store) => store,
            Err(e) => return BackgroundOutcome::ConnectFailed(e),
        };

        let plan = WritePlan {
            timeout: self.config.write_timeout,
            policy: &self.config.retry,
            cancel: None,
        };
        match write_record(store.as_ref(), self.clock.as_ref(), &key, record, plan).await {
            Ok(attempts) => BackgroundOutcome::Written { bus: key, attempts },
            Err(e) => BackgroundOutcome::WriteFailed(e),
        }
    }

    fn record_failure(&self, outcome: &BackgroundOutcome) {
        let count = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.config.consecutive_error_threshold {
            error!(
                consecutive = count,
                outcome = ?outcome,
                "Background updates keep failing, check network and store"
            );
        } else {
            warn!(consecutive = count, outcome = ?outcome, "Background update failed");
        }
    }
}
