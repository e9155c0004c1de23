//! Location sharer: the producer side of the pipeline.
//!
//! [`LocationSharer`] owns one [`BusSession`] and drives it through start,
//! per-tick updates and stop. In background mode the OS delivers fixes to the
//! background task and the sharer only manages the registration; in
//! foreground mode a timer task polls the location provider.
//!
//! # In-flight writes
//!
//! Every record write happens while holding the write gate. A tick that
//! finds the gate held is a no-op ([`TickOutcome::Busy`]). Stop cancels the
//! session token first and then acquires the gate, so by the time the delete
//! is issued no write for the session is outstanding and none can start.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::config::{ProducerConfig, SharingMode};
use super::error::{PermissionKind, ShareError};
use super::session::{BusSession, Release, SessionState, StartTicket, StopDecision};
use super::write::{write_record, WriteError, WritePlan};
use crate::clock::Clock;
use crate::device::{
    BackgroundRegistrar, ContinuousUpdateOptions, LocationError, LocationProvider,
    BACKGROUND_TASK_NAME,
};
use crate::identity::{AuthSession, ANONYMOUS_SHARER};
use crate::record::{BusRecord, DeviceType, BUSES_PATH};
use crate::store::{within, FlagStore, RealtimeStore, BUS_NAME_KEY};

/// Capacity of the alert broadcast channel.
const ALERT_CHANNEL_CAPACITY: usize = 16;

/// Conditions the user should be told about while sharing.
#[derive(Debug, Clone, PartialEq)]
pub enum ShareAlert {
    GpsUnavailable,
    ServicesDisabled,
    WriteRetriesExhausted { bus: String, attempts: u32 },
    WriteRejected { bus: String, reason: String },
}

impl ShareAlert {
    pub fn message(&self) -> String {
        match self {
            ShareAlert::GpsUnavailable => {
                "GPS is not available. Please check your location settings.".to_string()
            }
            ShareAlert::ServicesDisabled => {
                "Please enable location services in your device settings.".to_string()
            }
            ShareAlert::WriteRetriesExhausted { bus, attempts } => format!(
                "Could not update the location of {} after {} attempts. Check your internet connection.",
                bus, attempts
            ),
            ShareAlert::WriteRejected { bus, reason } => {
                format!("Location update for {} was rejected: {}", bus, reason)
            }
        }
    }
}

/// Result of one update tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No session is sharing.
    Inactive,
    /// Another update is still in flight.
    Busy,
    /// The position read timed out; the next tick tries again.
    Deferred,
    /// The session was stopped while the tick ran.
    Cancelled,
    /// The fix was out of range and was not written.
    InvalidFix,
    LocationFailed(LocationError),
    WriteFailed(WriteError),
    Written { attempts: u32, interval: Duration },
}

/// Result of [`LocationSharer::stop_sharing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    NotSharing,
    AlreadyStopping,
    Stopped { label: String, record_removed: bool },
}

/// Snapshot of the sharer for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharingStatus {
    pub state: SessionState,
    pub bus: Option<String>,
    pub selected: Option<String>,
    pub interval: Duration,
    pub writes: u64,
}

/// Everything the sharer talks to.
#[derive(Clone)]
pub struct SharerCollaborators {
    pub store: Arc<dyn RealtimeStore>,
    pub flags: Arc<dyn FlagStore>,
    pub location: Arc<dyn LocationProvider>,
    /// Required in [`SharingMode::Background`].
    pub registrar: Option<Arc<dyn BackgroundRegistrar>>,
    pub auth: Arc<dyn AuthSession>,
    pub clock: Arc<dyn Clock>,
}

/// What a start attempt has done so far, for rollback.
#[derive(Debug, Default)]
struct StartProgress {
    flag_written: bool,
    record_written: bool,
    registered: bool,
}

struct SharerInner {
    store: Arc<dyn RealtimeStore>,
    flags: Arc<dyn FlagStore>,
    location: Arc<dyn LocationProvider>,
    registrar: Option<Arc<dyn BackgroundRegistrar>>,
    auth: Arc<dyn AuthSession>,
    clock: Arc<dyn Clock>,
    config: ProducerConfig,
    session: Mutex<BusSession>,
    /// Held from the first setup step of a start until its rollback is done,
    /// so a superseded start never clears the flag or registration of a
    /// newer one.
    setup_gate: tokio::sync::Mutex<()>,
    write_gate: tokio::sync::Mutex<()>,
    alerts: broadcast::Sender<ShareAlert>,
    interval_tx: watch::Sender<Duration>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Producer for one device.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct LocationSharer {
    inner: Arc<SharerInner>,
}

impl LocationSharer {
    pub fn new(collaborators: SharerCollaborators, config: ProducerConfig) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        let (interval_tx, _) = watch::channel(config.default_interval);

        Self {
            inner: Arc::new(SharerInner {
                store: collaborators.store,
                flags: collaborators.flags,
                location: collaborators.location,
                registrar: collaborators.registrar,
                auth: collaborators.auth,
                clock: collaborators.clock,
                session: Mutex::new(BusSession::new(config.default_interval)),
                setup_gate: tokio::sync::Mutex::new(()),
                write_gate: tokio::sync::Mutex::new(()),
                alerts,
                interval_tx,
                timer: Mutex::new(None),
                config,
            }),
        }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.inner.config
    }

    /// Start sharing the device position under `label`.
    ///
    /// On failure every step already taken is rolled back and the session
    /// returns to idle.
    pub async fn start_sharing(&self, label: &str) -> Result<(), ShareError> {
        let ticket = self.inner.session.lock().begin_start(label)?;
        info!(bus = %ticket.key, mode = %self.inner.config.mode, "Starting location sharing");

        let _setup = self.inner.setup_gate.lock().await;
        let mut progress = StartProgress::default();
        let result = self
            .inner
            .run_start(&ticket, &mut progress)
            .await
            .and_then(|()| {
                if self.inner.session.lock().confirm_started(ticket.generation) {
                    Ok(())
                } else {
                    Err(ShareError::Cancelled)
                }
            });

        match result {
            Ok(()) => {
                if self.inner.config.mode == SharingMode::Foreground {
                    self.spawn_timer(ticket.token.clone());
                }
                info!(bus = %ticket.key, "Location sharing started");
                Ok(())
            }
            Err(e) => {
                warn!(bus = %ticket.key, error = %e, "Start failed, rolling back");
                self.inner.rollback(&ticket, &progress).await;
                self.inner.session.lock().abort_start(ticket.generation);
                Err(e)
            }
        }
    }

    /// Read the position once and write it.
    ///
    /// Overlapping calls collapse: while one update is in flight, others
    /// return [`TickOutcome::Busy`].
    pub async fn update_location(&self) -> TickOutcome {
        self.inner.update_location().await
    }

    /// Stop sharing and delete the bus record. Safe to call repeatedly.
    pub async fn stop_sharing(&self) -> Result<StopOutcome, ShareError> {
        let decision = self.inner.session.lock().begin_stop();
        match decision {
            StopDecision::NotSharing => {
                debug!("Stop requested while not sharing");
                Ok(StopOutcome::NotSharing)
            }
            StopDecision::AlreadyStopping => {
                debug!("Stop already in progress");
                Ok(StopOutcome::AlreadyStopping)
            }
            StopDecision::StartPending => Err(ShareError::OperationInProgress),
            StopDecision::Proceed(release) => Ok(self.inner.release(release).await),
        }
    }

    /// Best-effort cleanup when the owning component goes away.
    ///
    /// Cancels a pending start, stops any active session and swallows
    /// every error.
    pub async fn teardown(&self) {
        let decision = self.inner.session.lock().begin_teardown();
        if let StopDecision::Proceed(release) = decision {
            let outcome = self.inner.release(release).await;
            debug!(?outcome, "Sharer torn down");
        }
    }

    /// Change the picker selection.
    pub fn select_bus(&self, label: &str) -> Result<(), ShareError> {
        let result = self.inner.session.lock().select(label);
        if let Err(e) = &result {
            warn!(error = %e, "Bus selection rejected");
        }
        result
    }

    pub fn status(&self) -> SharingStatus {
        let session = self.inner.session.lock();
        SharingStatus {
            state: session.state(),
            bus: session.active_label().map(str::to_string),
            selected: session.selected().map(str::to_string),
            interval: session.interval(),
            writes: session.writes(),
        }
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<ShareAlert> {
        self.inner.alerts.subscribe()
    }

    /// Current sampling interval, updated as speed changes.
    pub fn interval_changes(&self) -> watch::Receiver<Duration> {
        self.inner.interval_tx.subscribe()
    }

    fn spawn_timer(&self, token: CancellationToken) {
        let interval = self.inner.session.lock().interval();
        self.inner.interval_tx.send_replace(interval);

        let rx = self.inner.interval_tx.subscribe();
        let handle = tokio::spawn(run_timer(Arc::downgrade(&self.inner), token, rx));
        if let Some(previous) = self.inner.timer.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl SharerInner {
    async fn run_start(
        &self,
        ticket: &StartTicket,
        progress: &mut StartProgress,
    ) -> Result<(), ShareError> {
        checkpoint(ticket)?;
        let identity = self.auth.current_user().ok_or(ShareError::NotAuthenticated)?;
        debug!(user = identity.sharer_name(), "User authenticated");

        self.probe_store().await;

        if !self.location.request_foreground_permission().await.is_granted() {
            return Err(ShareError::PermissionDenied(PermissionKind::Foreground));
        }

        let background = self.config.mode == SharingMode::Background;
        if background && !self.location.request_background_permission().await.is_granted() {
            return Err(ShareError::PermissionDenied(PermissionKind::Background));
        }

        if !self.location.has_services_enabled().await {
            return Err(ShareError::ServicesDisabled);
        }

        let registrar = match (background, self.registrar.as_ref()) {
            (true, Some(registrar)) => Some(registrar),
            (true, None) => return Err(ShareError::TaskNotRegistered),
            (false, _) => None,
        };

        if let Some(registrar) = registrar {
            if registrar.has_active_registration(BACKGROUND_TASK_NAME).await? {
                info!("Stopping leftover background registration");
                registrar.stop_continuous_updates(BACKGROUND_TASK_NAME).await?;
                tokio::time::sleep(self.config.registration_settle).await;
            }
        }
        checkpoint(ticket)?;

        self.flags.remove(BUS_NAME_KEY).await?;
        progress.flag_written = true;
        self.flags.set(BUS_NAME_KEY, &ticket.label).await?;
        let stored = self.flags.get(BUS_NAME_KEY).await?;
        if stored.as_deref() != Some(ticket.label.as_str()) {
            return Err(ShareError::StorageVerification {
                expected: ticket.label.clone(),
                found: stored,
            });
        }

        if let Some(registrar) = registrar {
            if !registrar.is_task_registered(BACKGROUND_TASK_NAME).await {
                return Err(ShareError::TaskNotRegistered);
            }
        }
        checkpoint(ticket)?;

        let read = tokio::select! {
            biased;
            _ = ticket.token.cancelled() => None,
            result = self.location.current_position(self.config.initial_request()) => Some(result),
        };
        let fix = read.ok_or(ShareError::Cancelled)??;

        let record = BusRecord::from_fix(
            &fix,
            self.clock.now_ms(),
            DeviceType::StudentShare,
            identity.sharer_name(),
        )?;

        {
            let _gate = self.write_gate.lock().await;
            progress.record_written = true;
            let plan = WritePlan {
                timeout: self.config.write_timeout,
                policy: &self.config.retry,
                cancel: Some(&ticket.token),
            };
            write_record(self.store.as_ref(), self.clock.as_ref(), &ticket.key, record, plan).await?;
        }
        info!(bus = %ticket.key, "Initial location sent");

        if let Some(next) = self.session.lock().record_speed(fix.speed_or_zero()) {
            self.interval_tx.send_replace(next);
        }

        if let Some(registrar) = registrar {
            checkpoint(ticket)?;
            let options = ContinuousUpdateOptions::for_bus(
                &ticket.label,
                self.config.continuous_interval,
                self.config.distance_filter_m,
            );
            registrar
                .start_continuous_updates(BACKGROUND_TASK_NAME, options)
                .await?;
            progress.registered = true;
            debug!(task = BACKGROUND_TASK_NAME, "Background updates registered");
        }

        checkpoint(ticket)
    }

    /// Non-blocking connectivity check; failure only logs.
    async fn probe_store(&self) {
        match within(self.config.connectivity_probe_timeout, self.store.get(BUSES_PATH)).await {
            Ok(_) => debug!("Store connectivity check passed"),
            Err(e) => warn!(error = %e, "Store connectivity check failed, continuing"),
        }
    }

    async fn rollback(&self, ticket: &StartTicket, progress: &StartProgress) {
        if progress.registered || self.config.mode == SharingMode::Background {
            self.stop_registration().await;
        }

        if progress.flag_written {
            if let Err(e) = self.flags.remove(BUS_NAME_KEY).await {
                warn!(error = %e, "Failed to clear bus name during rollback");
            }
        }

        if progress.record_written {
            let _gate = self.write_gate.lock().await;
            if let Err(e) = within(self.config.write_timeout, self.store.remove(&ticket.key.path())).await {
                warn!(bus = %ticket.key, error = %e, "Failed to remove record during rollback");
            }
        }
    }

    async fn update_location(&self) -> TickOutcome {
        let (key, token) = {
            let session = self.session.lock();
            if session.state() != SessionState::Sharing {
                return TickOutcome::Inactive;
            }
            match session.active_key() {
                Some(key) => (key.clone(), session.token()),
                None => return TickOutcome::Inactive,
            }
        };

        let Ok(_gate) = self.write_gate.try_lock() else {
            trace!(bus = %key, "Update already in flight");
            return TickOutcome::Busy;
        };

        let read = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.location.current_position(self.config.tick_request()) => Some(result),
        };
        let fix = match read {
            None => return TickOutcome::Cancelled,
            Some(Ok(fix)) => fix,
            Some(Err(LocationError::Timeout)) => {
                debug!(bus = %key, "Location timeout, will retry on next interval");
                return TickOutcome::Deferred;
            }
            Some(Err(e)) => {
                warn!(bus = %key, error = %e, "Location read failed");
                match e {
                    LocationError::Unavailable => self.alert(ShareAlert::GpsUnavailable),
                    LocationError::ServicesDisabled => self.alert(ShareAlert::ServicesDisabled),
                    _ => {}
                }
                self.session.lock().record_failed_tick();
                return TickOutcome::LocationFailed(e);
            }
        };

        let shared_by = self
            .auth
            .current_user()
            .map(|user| user.sharer_name().to_string())
            .unwrap_or_else(|| ANONYMOUS_SHARER.to_string());

        let record = match BusRecord::from_fix(
            &fix,
            self.clock.now_ms(),
            DeviceType::StudentShare,
            shared_by,
        ) {
            Ok(record) => record,
            Err(e) => {
                warn!(bus = %key, error = %e, "Discarding out-of-range fix");
                return TickOutcome::InvalidFix;
            }
        };

        let plan = WritePlan {
            timeout: self.config.write_timeout,
            policy: &self.config.retry,
            cancel: Some(&token),
        };

        match write_record(self.store.as_ref(), self.clock.as_ref(), &key, record, plan).await {
            Ok(attempts) => {
                let (interval, changed) = {
                    let mut session = self.session.lock();
                    if session.state() != SessionState::Sharing {
                        return TickOutcome::Cancelled;
                    }
                    session.record_write();
                    let changed = session.record_speed(fix.speed_or_zero());
                    (session.interval(), changed)
                };
                if let Some(next) = changed {
                    info!(
                        bus = %key,
                        interval_ms = next.as_millis() as u64,
                        "Sampling interval adjusted"
                    );
                    self.interval_tx.send_replace(next);
                }
                TickOutcome::Written { attempts, interval }
            }
            Err(WriteError::Cancelled) => TickOutcome::Cancelled,
            Err(e) => {
                self.session.lock().record_failed_tick();
                match &e {
                    WriteError::Exhausted { attempts, source } => {
                        error!(bus = %key, attempts, error = %source, "Location update failed, giving up for this tick");
                        self.alert(ShareAlert::WriteRetriesExhausted {
                            bus: key.to_string(),
                            attempts: *attempts,
                        });
                    }
                    WriteError::Rejected(source) => {
                        error!(bus = %key, error = %source, "Location update rejected by store");
                        self.alert(ShareAlert::WriteRejected {
                            bus: key.to_string(),
                            reason: source.to_string(),
                        });
                    }
                    WriteError::Cancelled => {}
                }
                TickOutcome::WriteFailed(e)
            }
        }
    }

    /// Tear down a stopping session and delete its record.
    async fn release(&self, release: Release) -> StopOutcome {
        info!(bus = %release.key, "Stopping location sharing");

        let timer = self.timer.lock().take();
        if let Some(handle) = timer {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Update timer ended abnormally");
                }
            }
        }
        self.interval_tx.send_replace(self.config.default_interval);

        self.stop_registration().await;

        if let Err(e) = self.flags.remove(BUS_NAME_KEY).await {
            warn!(error = %e, "Failed to clear bus name");
        }

        let record_removed = {
            let _gate = self.write_gate.lock().await;
            match within(self.config.write_timeout, self.store.remove(&release.key.path())).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(bus = %release.key, error = %e, "Failed to remove bus record");
                    false
                }
            }
        };

        self.session.lock().finish_stop();
        info!(bus = %release.key, record_removed, "Location sharing stopped");

        StopOutcome::Stopped {
            label: release.label,
            record_removed,
        }
    }

    async fn stop_registration(&self) {
        let Some(registrar) = self.registrar.as_ref() else {
            return;
        };
        match registrar.has_active_registration(BACKGROUND_TASK_NAME).await {
            Ok(true) => match registrar.stop_continuous_updates(BACKGROUND_TASK_NAME).await {
                Ok(()) => debug!(task = BACKGROUND_TASK_NAME, "Background updates stopped"),
                Err(e) => warn!(error = %e, "Failed to stop background updates"),
            },
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to query background registration"),
        }
    }

    fn alert(&self, alert: ShareAlert) {
        // No subscribers is fine.
        let _ = self.alerts.send(alert);
    }
}

fn checkpoint(ticket: &StartTicket) -> Result<(), ShareError> {
    if ticket.token.is_cancelled() {
        Err(ShareError::Cancelled)
    } else {
        Ok(())
    }
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Foreground update loop. The timer is rebuilt whenever the interval changes.
async fn run_timer(
    inner: Weak<SharerInner>,
    token: CancellationToken,
    mut interval_rx: watch::Receiver<Duration>,
) {
    let mut period = *interval_rx.borrow_and_update();
    let mut ticker = new_ticker(period);
    debug!(interval_ms = period.as_millis() as u64, "Update timer started");

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,

            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = *interval_rx.borrow_and_update();
                if next != period {
                    period = next;
                    ticker = new_ticker(period);
                    debug!(interval_ms = period.as_millis() as u64, "Update timer rescheduled");
                }
            }

            _ = ticker.tick() => {
                let Some(sharer) = inner.upgrade() else {
                    break;
                };
                let outcome = sharer.update_location().await;
                trace!(?outcome, "Update tick finished");
            }
        }
    }

    debug!("Update timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::device::{LocationFix, PermissionStatus, SimulatedLocation, SimulatedRegistrar};
    use crate::identity::{Identity, StaticAuth};
    use crate::store::{BoxFuture, FlagStoreError, MemoryFlagStore, MemoryStore, StoreError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    /// Flag store whose first `set` parks until `release` is notified.
    #[derive(Default)]
    struct ParkedFlags {
        inner: MemoryFlagStore,
        consumed: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl FlagStore for ParkedFlags {
        fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, FlagStoreError>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> BoxFuture<'_, Result<(), FlagStoreError>> {
            let key = key.to_string();
            let value = value.to_string();
            Box::pin(async move {
                if !self.consumed.swap(true, Ordering::SeqCst) {
                    self.entered.notify_one();
                    self.release.notified().await;
                }
                self.inner.set(&key, &value).await
            })
        }

        fn remove(&self, key: &str) -> BoxFuture<'_, Result<(), FlagStoreError>> {
            self.inner.remove(key)
        }
    }

    struct Harness {
        store: MemoryStore,
        flags: Arc<MemoryFlagStore>,
        location: Arc<SimulatedLocation>,
        registrar: Arc<SimulatedRegistrar>,
        sharer: LocationSharer,
    }

    fn harness(mode: SharingMode) -> Harness {
        let store = MemoryStore::new();
        let flags = Arc::new(MemoryFlagStore::new());
        let location = Arc::new(SimulatedLocation::fixed(
            LocationFix::at(22.4607, 91.9714).with_speed(0.0),
        ));
        let registrar = Arc::new(SimulatedRegistrar::new());
        let sharer = LocationSharer::new(
            SharerCollaborators {
                store: Arc::new(store.clone()),
                flags: flags.clone(),
                location: location.clone(),
                registrar: Some(registrar.clone()),
                auth: Arc::new(StaticAuth::signed_in(Identity::new(
                    Some("Rafi".into()),
                    None,
                ))),
                clock: Arc::new(ManualClock::new(1_700_000_000_000)),
            },
            ProducerConfig::default().with_mode(mode),
        );
        Harness {
            store,
            flags,
            location,
            registrar,
            sharer,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_start_and_stop() {
        let h = harness(SharingMode::Background);
        h.sharer.start_sharing("Surma.1").await.unwrap();

        let record = BusRecord::from_value(&h.store.peek("buses/Surma_1").unwrap()).unwrap();
        assert_eq!(record.shared_by, "Rafi");
        assert_eq!(record.device_type, DeviceType::StudentShare);
        assert_eq!(h.flags.peek(BUS_NAME_KEY).as_deref(), Some("Surma.1"));
        assert!(h.registrar.is_active(BACKGROUND_TASK_NAME));
        assert_eq!(h.sharer.status().state, SessionState::Sharing);

        let outcome = h.sharer.stop_sharing().await.unwrap();
        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                label: "Surma.1".into(),
                record_removed: true
            }
        );
        assert_eq!(h.store.peek("buses/Surma_1"), None);
        assert_eq!(h.flags.peek(BUS_NAME_KEY), None);
        assert!(!h.registrar.is_active(BACKGROUND_TASK_NAME));
        assert_eq!(h.sharer.stop_sharing().await.unwrap(), StopOutcome::NotSharing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthenticated_start_fails_cleanly() {
        let store = MemoryStore::new();
        let sharer = LocationSharer::new(
            SharerCollaborators {
                store: Arc::new(store.clone()),
                flags: Arc::new(MemoryFlagStore::new()),
                location: Arc::new(SimulatedLocation::fixed(LocationFix::at(1.0, 1.0))),
                registrar: None,
                auth: Arc::new(StaticAuth::signed_out()),
                clock: Arc::new(ManualClock::new(0)),
            },
            ProducerConfig::default().with_mode(SharingMode::Foreground),
        );

        assert!(matches!(
            sharer.start_sharing("Surma").await,
            Err(ShareError::NotAuthenticated)
        ));
        assert_eq!(sharer.status().state, SessionState::Idle);
        assert_eq!(store.set_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_permission_denied_rolls_back() {
        let h = harness(SharingMode::Background);
        h.location.set_background_permission(PermissionStatus::Denied);

        let err = h.sharer.start_sharing("Surma").await.unwrap_err();
        assert!(matches!(err, ShareError::PermissionDenied(PermissionKind::Background)));
        assert_eq!(h.flags.peek(BUS_NAME_KEY), None);
        assert_eq!(h.store.peek("buses/Surma"), None);
        assert_eq!(h.sharer.status().state, SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_timeout_rolls_back_flag() {
        let h = harness(SharingMode::Background);
        h.location.push_error(LocationError::Timeout);

        let err = h.sharer.start_sharing("Surma").await.unwrap_err();
        assert!(matches!(err, ShareError::LocationTimeout));
        assert_eq!(h.flags.peek(BUS_NAME_KEY), None);
        assert_eq!(h.registrar.start_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_failure_removes_record() {
        let h = harness(SharingMode::Background);
        h.registrar
            .fail_next_start(crate::device::RegistrationError::Failed("denied".into()));

        let err = h.sharer.start_sharing("Surma").await.unwrap_err();
        assert!(matches!(err, ShareError::Registration(_)));
        assert_eq!(h.store.peek("buses/Surma"), None);
        assert_eq!(h.flags.peek(BUS_NAME_KEY), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leftover_registration_is_replaced() {
        let h = harness(SharingMode::Background);
        h.registrar.preactivate(
            BACKGROUND_TASK_NAME,
            ContinuousUpdateOptions::for_bus("Old", Duration::from_secs(5), 0.0),
        );

        h.sharer.start_sharing("Surma").await.unwrap();
        assert_eq!(h.registrar.stop_count(), 1);
        let options = h.registrar.active_options(BACKGROUND_TASK_NAME).unwrap();
        assert_eq!(options.notification.body, "Sharing for Surma");
    }

    #[tokio::test(start_paused = true)]
    async fn test_undefined_task_fails_start() {
        let h = harness(SharingMode::Background);
        h.registrar.set_task_defined(false);

        assert!(matches!(
            h.sharer.start_sharing("Surma").await,
            Err(ShareError::TaskNotRegistered)
        ));
        assert_eq!(h.store.set_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_location_adjusts_interval() {
        let h = harness(SharingMode::Background);
        h.sharer.start_sharing("Surma").await.unwrap();
        assert_eq!(h.sharer.status().interval, Duration::from_secs(10));

        h.location.push_fix(LocationFix::at(22.47, 91.98).with_speed(15.0));
        let outcome = h.sharer.update_location().await;
        assert_eq!(
            outcome,
            TickOutcome::Written {
                attempts: 1,
                interval: Duration::from_secs(3)
            }
        );
        assert_eq!(*h.sharer.interval_changes().borrow(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_location_inactive_when_idle() {
        let h = harness(SharingMode::Foreground);
        assert_eq!(h.sharer.update_location().await, TickOutcome::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_timeout_is_deferred() {
        let h = harness(SharingMode::Background);
        h.sharer.start_sharing("Surma").await.unwrap();
        h.location.push_error(LocationError::Timeout);
        assert_eq!(h.sharer.update_location().await, TickOutcome::Deferred);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_raises_alert() {
        let h = harness(SharingMode::Background);
        h.sharer.start_sharing("Surma").await.unwrap();
        let mut alerts = h.sharer.subscribe_alerts();

        h.location.push_error(LocationError::Unavailable);
        assert_eq!(
            h.sharer.update_location().await,
            TickOutcome::LocationFailed(LocationError::Unavailable)
        );
        assert_eq!(alerts.try_recv().unwrap(), ShareAlert::GpsUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_fix_not_written() {
        let h = harness(SharingMode::Background);
        h.sharer.start_sharing("Surma").await.unwrap();
        let writes = h.store.set_count();

        h.location.push_fix(LocationFix::at(91.0, 10.0));
        assert_eq!(h.sharer.update_location().await, TickOutcome::InvalidFix);
        assert_eq!(h.store.set_count(), writes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_raise_alert() {
        let h = harness(SharingMode::Background);
        h.sharer.start_sharing("Surma").await.unwrap();
        let mut alerts = h.sharer.subscribe_alerts();

        h.store.fail_next_sets(std::iter::repeat(StoreError::Network("offline".into())).take(4));
        let outcome = h.sharer.update_location().await;
        assert!(matches!(
            outcome,
            TickOutcome::WriteFailed(WriteError::Exhausted { attempts: 4, .. })
        ));
        assert_eq!(
            alerts.try_recv().unwrap(),
            ShareAlert::WriteRetriesExhausted {
                bus: "Surma".into(),
                attempts: 4
            }
        );
        // The session survives a failed tick.
        assert_eq!(h.sharer.status().state, SessionState::Sharing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_updates_collapse() {
        let h = harness(SharingMode::Background);
        h.sharer.start_sharing("Surma").await.unwrap();
        h.location.set_read_delay(Duration::from_secs(1));

        let first = h.sharer.clone();
        let second = h.sharer.clone();
        let (a, b) = tokio::join!(first.update_location(), second.update_location());

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|o| **o == TickOutcome::Busy).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, TickOutcome::Written { .. }))
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_bus_blocked_while_sharing() {
        let h = harness(SharingMode::Background);
        h.sharer.select_bus("Halda").unwrap();
        h.sharer.start_sharing("Surma").await.unwrap();

        assert!(matches!(
            h.sharer.select_bus("Halda"),
            Err(ShareError::BusChangeWhileSharing { .. })
        ));
        assert_eq!(h.sharer.status().selected.as_deref(), Some("Surma"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_timer_writes_periodically() {
        let h = harness(SharingMode::Foreground);
        h.sharer.start_sharing("Surma").await.unwrap();
        assert_eq!(h.registrar.start_count(), 0);
        let after_start = h.store.set_count();

        // Stationary: 10s interval.
        tokio::time::sleep(Duration::from_millis(10_050)).await;
        assert_eq!(h.store.set_count(), after_start + 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.store.set_count(), after_start + 2);

        h.sharer.stop_sharing().await.unwrap();
        let after_stop = h.store.set_count();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.store.set_count(), after_stop);
        assert_eq!(h.store.peek("buses/Surma"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_removes_record() {
        let h = harness(SharingMode::Foreground);
        h.sharer.start_sharing("Surma").await.unwrap();
        h.store.fail_next_removes([StoreError::Disconnected]);

        h.sharer.teardown().await;
        assert_eq!(h.sharer.status().state, SessionState::Idle);
        assert_eq!(h.flags.peek(BUS_NAME_KEY), None);
        // Removal failed but the error was swallowed.
        assert!(h.store.peek("buses/Surma").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_torn_down_start_does_not_undo_next_start() {
        let store = MemoryStore::new();
        let flags = Arc::new(ParkedFlags::default());
        let registrar = Arc::new(SimulatedRegistrar::new());
        let sharer = LocationSharer::new(
            SharerCollaborators {
                store: Arc::new(store.clone()),
                flags: flags.clone(),
                location: Arc::new(SimulatedLocation::fixed(
                    LocationFix::at(22.4607, 91.9714).with_speed(0.0),
                )),
                registrar: Some(registrar.clone()),
                auth: Arc::new(StaticAuth::signed_in(Identity::new(
                    Some("Rafi".into()),
                    None,
                ))),
                clock: Arc::new(ManualClock::new(1_700_000_000_000)),
            },
            ProducerConfig::default().with_mode(SharingMode::Background),
        );

        // First start parks inside the flag write and is torn down there.
        let first = tokio::spawn({
            let sharer = sharer.clone();
            async move { sharer.start_sharing("Surma").await }
        });
        flags.entered.notified().await;
        sharer.teardown().await;
        assert_eq!(sharer.status().state, SessionState::Idle);

        let second = tokio::spawn({
            let sharer = sharer.clone();
            async move { sharer.start_sharing("Halda").await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        flags.release.notify_one();

        assert!(matches!(first.await.unwrap(), Err(ShareError::Cancelled)));
        second.await.unwrap().unwrap();

        let status = sharer.status();
        assert_eq!(status.state, SessionState::Sharing);
        assert_eq!(status.bus.as_deref(), Some("Halda"));
        assert_eq!(flags.inner.peek(BUS_NAME_KEY).as_deref(), Some("Halda"));
        assert!(registrar.is_active(BACKGROUND_TASK_NAME));
        assert!(store.peek("buses/Halda").is_some());
        assert!(store.peek("buses/Surma").is_none());
    }
}
