//! In-process device doubles.
//!
//! [`SimulatedLocation`] plays back a script of fixes and errors and lets
//! callers toggle permissions and location services. [`SimulatedRegistrar`]
//! records background registrations. Both are used by the integration tests
//! and by local simulations that run producers without hardware.
//!
//! Delays use tokio time, so paused clocks advance instantly in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::location::{
    LocationError, LocationFix, LocationProvider, PermissionStatus, PositionRequest,
};
use super::registrar::{BackgroundRegistrar, ContinuousUpdateOptions, RegistrationError};
use crate::store::BoxFuture;

/// Scripted location provider.
pub struct SimulatedLocation {
    script: Mutex<VecDeque<Result<LocationFix, LocationError>>>,
    /// Returned once the script is exhausted; `None` means `Unavailable`.
    fallback: Mutex<Option<LocationFix>>,
    foreground: Mutex<PermissionStatus>,
    background: Mutex<PermissionStatus>,
    services_enabled: AtomicBool,
    read_delay: Mutex<Duration>,
    reads: AtomicU32,
    last_request: Mutex<Option<PositionRequest>>,
}

impl Default for SimulatedLocation {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            foreground: Mutex::new(PermissionStatus::Granted),
            background: Mutex::new(PermissionStatus::Granted),
            services_enabled: AtomicBool::new(true),
            read_delay: Mutex::new(Duration::ZERO),
            reads: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }
}

impl SimulatedLocation {
    /// Device with all permissions granted that always reports `fix`.
    pub fn fixed(fix: LocationFix) -> Self {
        let sim = Self::default();
        sim.set_fallback(Some(fix));
        sim
    }

    /// Queue a fix to be returned by the next read.
    pub fn push_fix(&self, fix: LocationFix) {
        self.script.lock().push_back(Ok(fix));
    }

    /// Queue an error to be returned by the next read.
    pub fn push_error(&self, error: LocationError) {
        self.script.lock().push_back(Err(error));
    }

    pub fn set_fallback(&self, fix: Option<LocationFix>) {
        *self.fallback.lock() = fix;
    }

    pub fn set_foreground_permission(&self, status: PermissionStatus) {
        *self.foreground.lock() = status;
    }

    pub fn set_background_permission(&self, status: PermissionStatus) {
        *self.background.lock() = status;
    }

    pub fn set_services_enabled(&self, enabled: bool) {
        self.services_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Simulated time to acquire a fix. Reads slower than the request's
    /// timeout fail with [`LocationError::Timeout`].
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = delay;
    }

    /// Number of position reads served.
    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<PositionRequest> {
        *self.last_request.lock()
    }

    fn next_result(&self) -> Result<LocationFix, LocationError> {
        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }
        self.fallback.lock().clone().ok_or(LocationError::Unavailable)
    }
}

impl LocationProvider for SimulatedLocation {
    fn request_foreground_permission(&self) -> BoxFuture<'_, PermissionStatus> {
        Box::pin(async move { *self.foreground.lock() })
    }

    fn request_background_permission(&self) -> BoxFuture<'_, PermissionStatus> {
        Box::pin(async move { *self.background.lock() })
    }

    fn has_services_enabled(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.services_enabled.load(Ordering::SeqCst) })
    }

    fn current_position(
        &self,
        request: PositionRequest,
    ) -> BoxFuture<'_, Result<LocationFix, LocationError>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock() = Some(request);

            let delay = *self.read_delay.lock();
            if delay > request.timeout {
                tokio::time::sleep(request.timeout).await;
                return Err(LocationError::Timeout);
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if !self.foreground.lock().is_granted() {
                return Err(LocationError::PermissionDenied);
            }
            if !self.services_enabled.load(Ordering::SeqCst) {
                return Err(LocationError::ServicesDisabled);
            }
            self.next_result()
        })
    }
}

/// Registration bookkeeping double.
pub struct SimulatedRegistrar {
    task_defined: AtomicBool,
    active: Mutex<HashMap<String, ContinuousUpdateOptions>>,
    start_failures: Mutex<VecDeque<RegistrationError>>,
    starts: AtomicU32,
    stops: AtomicU32,
}

impl Default for SimulatedRegistrar {
    fn default() -> Self {
        Self {
            task_defined: AtomicBool::new(true),
            active: Mutex::new(HashMap::new()),
            start_failures: Mutex::new(VecDeque::new()),
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
        }
    }
}

impl SimulatedRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_task_defined(&self, defined: bool) {
        self.task_defined.store(defined, Ordering::SeqCst);
    }

    /// Fail the next `start_continuous_updates` call.
    pub fn fail_next_start(&self, error: RegistrationError) {
        self.start_failures.lock().push_back(error);
    }

    /// Mark `task_id` as active, as a leftover from an earlier session would be.
    pub fn preactivate(&self, task_id: &str, options: ContinuousUpdateOptions) {
        self.active.lock().insert(task_id.to_string(), options);
    }

    pub fn is_active(&self, task_id: &str) -> bool {
        self.active.lock().contains_key(task_id)
    }

    pub fn active_options(&self, task_id: &str) -> Option<ContinuousUpdateOptions> {
        self.active.lock().get(task_id).cloned()
    }

    pub fn start_count(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }
}

impl BackgroundRegistrar for SimulatedRegistrar {
    fn is_task_registered(&self, _task_id: &str) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.task_defined.load(Ordering::SeqCst) })
    }

    fn has_active_registration(&self, task_id: &str) -> BoxFuture<'_, Result<bool, RegistrationError>> {
        let active = self.is_active(task_id);
        Box::pin(async move { Ok(active) })
    }

    fn start_continuous_updates(
        &self,
        task_id: &str,
        options: ContinuousUpdateOptions,
    ) -> BoxFuture<'_, Result<(), RegistrationError>> {
        let task_id = task_id.to_string();
        Box::pin(async move {
            if let Some(err) = self.start_failures.lock().pop_front() {
                return Err(err);
            }
            if !self.task_defined.load(Ordering::SeqCst) {
                return Err(RegistrationError::TaskNotDefined(task_id));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.active.lock().insert(task_id, options);
            Ok(())
        })
    }

    fn stop_continuous_updates(&self, task_id: &str) -> BoxFuture<'_, Result<(), RegistrationError>> {
        let task_id = task_id.to_string();
        Box::pin(async move {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.active.lock().remove(&task_id);
            Ok(())
        })
    }
}
