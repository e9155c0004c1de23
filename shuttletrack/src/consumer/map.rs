//! Live bus map.
//!
//! [`BusMap`] owns one continuous subscription to the `buses` collection and
//! the cleanup sweeper. Every push is re-filtered and re-laid-out from
//! scratch and published as a [`MapView`] on a `watch` channel.
//!
//! # Connection states
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ◄──┐
//!                      ▲              │        │ push
//!                      │  backoff     ▼        │
//!                      └────────── Error ──────┘
//!                                     │ retries spent
//!                                     ▼
//!                           ConnectedWithWarning ──(refresh)──► Refreshing
//! ```
//!
//! A manual [`BusMap::refresh`] tears the subscription down and reopens it
//! with the retry counter reset, from any state.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::camera::{fit_camera, locate_user, CameraTarget, LocateError};
use super::cleanup::{CleanupConfig, CleanupStats, CleanupSweeper, SweepOutcome};
use super::cluster::ClusterConfig;
use super::filter::{filter_active, ActiveBus, DEFAULT_STALE_WINDOW_SECS};
use super::marker::{layout_markers, MapMarker, DEFAULT_FRESH_WINDOW_SECS};
use crate::clock::Clock;
use crate::device::LocationProvider;
use crate::record::BUSES_PATH;
use crate::retry::RetryPolicy;
use crate::store::{RealtimeStore, StoreError, Subscription};

// =============================================================================
// Configuration
// =============================================================================

/// Bus map configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMapConfig {
    /// Records older than this are hidden.
    pub stale_window: Duration,
    /// Records older than this are drawn dimmed.
    pub fresh_window: Duration,
    /// Resubscribe policy after subscription errors.
    pub retry: RetryPolicy,
    pub cluster: ClusterConfig,
    pub cleanup: CleanupConfig,
}

impl Default for BusMapConfig {
    fn default() -> Self {
        Self {
            stale_window: Duration::from_secs(DEFAULT_STALE_WINDOW_SECS),
            fresh_window: Duration::from_secs(DEFAULT_FRESH_WINDOW_SECS),
            retry: RetryPolicy::default(),
            cluster: ClusterConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl BusMapConfig {
    /// Set the staleness window for both filtering and cleanup.
    pub fn with_stale_window(mut self, window: Duration) -> Self {
        self.stale_window = window;
        self.cleanup.stale_window = window;
        self
    }

    pub fn with_fresh_window(mut self, window: Duration) -> Self {
        self.fresh_window = window;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupConfig) -> Self {
        self.cleanup = cleanup;
        self
    }
}

// =============================================================================
// View
// =============================================================================

/// Subscription health as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Subscription failed; retry `attempt` is scheduled.
    Error { attempt: u32 },
    /// Retries are spent. The last view stays up until a manual refresh.
    ConnectedWithWarning,
    /// A manual refresh is reopening the subscription.
    Refreshing,
}

impl ConnectionState {
    /// Short label for status displays.
    pub fn display_status(&self) -> String {
        match self {
            ConnectionState::Disconnected => "Disconnected".to_string(),
            ConnectionState::Connecting => "Connecting".to_string(),
            ConnectionState::Connected => "Connected".to_string(),
            ConnectionState::Error { attempt } => format!("Reconnecting (attempt {})", attempt),
            ConnectionState::ConnectedWithWarning => "Connection error - pull to refresh".to_string(),
            ConnectionState::Refreshing => "Refreshing".to_string(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// What the map currently shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapView {
    /// Active buses ordered by key.
    pub active: Vec<ActiveBus>,
    /// Render layout of `active`.
    pub markers: Vec<MapMarker>,
    pub connection: ConnectionState,
    /// Clock time of the last push received.
    pub last_updated: Option<i64>,
}

impl MapView {
    /// Whether the markers were produced by clustering.
    pub fn is_clustered(&self) -> bool {
        self.markers.len() != self.active.len()
            || self.markers.iter().any(|m| matches!(m, MapMarker::Cluster { .. }))
    }
}

// =============================================================================
// Bus Map
// =============================================================================

struct MapInner {
    store: Arc<dyn RealtimeStore>,
    clock: Arc<dyn Clock>,
    config: BusMapConfig,
    view_tx: watch::Sender<MapView>,
    snapshot: Mutex<Option<Value>>,
    refresh: Notify,
}

/// Outcome of waiting on an open subscription.
enum Interrupted {
    Shutdown,
    Refresh,
    Failed(StoreError),
}

impl MapInner {
    fn set_connection(&self, state: ConnectionState) {
        self.view_tx.send_if_modified(|view| {
            if view.connection == state {
                return false;
            }
            view.connection = state;
            true
        });
    }

    fn apply_push(&self, snapshot: Option<Value>) {
        let now = self.clock.now_ms();
        let (active, markers) = self.layout(snapshot.as_ref(), now);
        *self.snapshot.lock() = snapshot;

        debug!(active = active.len(), markers = markers.len(), "Bus map updated");
        self.view_tx.send_modify(|view| {
            view.active = active;
            view.markers = markers;
            view.connection = ConnectionState::Connected;
            view.last_updated = Some(now);
        });
    }

    fn recompute(&self) {
        let now = self.clock.now_ms();
        let (active, markers) = {
            let snapshot = self.snapshot.lock();
            self.layout(snapshot.as_ref(), now)
        };
        self.view_tx.send_modify(|view| {
            view.active = active;
            view.markers = markers;
        });
    }

    fn layout(&self, snapshot: Option<&Value>, now: i64) -> (Vec<ActiveBus>, Vec<MapMarker>) {
        let active = filter_active(snapshot, now, self.config.stale_window);
        let markers = layout_markers(&active, &self.config.cluster, now, self.config.fresh_window);
        (active, markers)
    }

    /// Consume pushes until the subscription fails or is interrupted.
    async fn pump(
        &self,
        subscription: &mut Subscription,
        attempt: &mut u32,
        shutdown: &CancellationToken,
    ) -> Interrupted {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => return Interrupted::Shutdown,

                _ = self.refresh.notified() => return Interrupted::Refresh,

                event = subscription.next() => match event {
                    Some(Ok(snapshot)) => {
                        *attempt = 0;
                        self.apply_push(snapshot);
                    }
                    Some(Err(e)) => return Interrupted::Failed(e),
                    None => return Interrupted::Failed(StoreError::Disconnected),
                },
            }
        }
    }

    /// Subscription loop; runs until shutdown.
    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut attempt: u32 = 0;
        let mut refreshing = false;

        'session: loop {
            self.set_connection(if refreshing {
                ConnectionState::Refreshing
            } else {
                ConnectionState::Connecting
            });
            refreshing = false;

            let failure = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break 'session,
                opened = self.store.subscribe(BUSES_PATH) => match opened {
                    Ok(mut subscription) => {
                        debug!("Subscribed to buses");
                        match self.pump(&mut subscription, &mut attempt, &shutdown).await {
                            Interrupted::Shutdown => break 'session,
                            Interrupted::Refresh => {
                                info!("Refreshing bus subscription");
                                attempt = 0;
                                refreshing = true;
                                continue 'session;
                            }
                            Interrupted::Failed(e) => e,
                        }
                    }
                    Err(e) => e,
                },
            };

            attempt += 1;
            match self.config.retry.delay_for_retry(attempt) {
                Some(delay) => {
                    warn!(
                        error = %failure,
                        attempt,
                        max_retries = self.config.retry.max_retries(),
                        delay_ms = delay.as_millis() as u64,
                        "Bus subscription failed, retrying"
                    );
                    self.set_connection(ConnectionState::Error { attempt });
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break 'session,
                        _ = self.refresh.notified() => {
                            attempt = 0;
                            refreshing = true;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    error!(
                        error = %failure,
                        attempts = attempt,
                        "Failed to fetch bus locations after multiple attempts"
                    );
                    self.set_connection(ConnectionState::ConnectedWithWarning);
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break 'session,
                        _ = self.refresh.notified() => {
                            attempt = 0;
                            refreshing = true;
                        }
                    }
                }
            }
        }

        self.set_connection(ConnectionState::Disconnected);
        debug!("Bus subscription loop stopped");
    }
}

/// Live consumer of the shared `buses` collection.
///
/// Dropping the map cancels its background tasks; [`BusMap::shutdown`]
/// also waits for them to finish.
pub struct BusMap {
    inner: Arc<MapInner>,
    sweeper: Arc<CleanupSweeper>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BusMap {
    /// Open the subscription and start the cleanup sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(store: Arc<dyn RealtimeStore>, clock: Arc<dyn Clock>, config: BusMapConfig) -> Self {
        let (view_tx, _) = watch::channel(MapView::default());
        let sweeper = Arc::new(CleanupSweeper::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.cleanup.clone(),
        ));
        let inner = Arc::new(MapInner {
            store,
            clock,
            config,
            view_tx,
            snapshot: Mutex::new(None),
            refresh: Notify::new(),
        });

        let shutdown = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(Arc::clone(&inner).run(shutdown.child_token())),
            tokio::spawn(Arc::clone(&sweeper).run(shutdown.child_token())),
        ];

        info!(
            stale_window_secs = inner.config.stale_window.as_secs(),
            "Bus map started"
        );

        Self {
            inner,
            sweeper,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn config(&self) -> &BusMapConfig {
        &self.inner.config
    }

    /// Current view.
    pub fn view(&self) -> MapView {
        self.inner.view_tx.borrow().clone()
    }

    /// Receiver that sees every published view.
    pub fn subscribe(&self) -> watch::Receiver<MapView> {
        self.inner.view_tx.subscribe()
    }

    pub fn connection(&self) -> ConnectionState {
        self.inner.view_tx.borrow().connection
    }

    /// Reopen the subscription from scratch with the retry counter reset.
    pub fn refresh(&self) {
        self.inner.refresh.notify_one();
    }

    /// Re-filter the last snapshot at the current clock time.
    pub fn recompute(&self) {
        self.inner.recompute();
    }

    /// Camera target fitting every active bus, or `None` when there are none.
    pub fn fit_camera(&self) -> Option<CameraTarget> {
        fit_camera(&self.inner.view_tx.borrow().active)
    }

    /// Camera target centred on the user's own position.
    pub async fn locate_user(&self, provider: &dyn LocationProvider) -> Result<CameraTarget, LocateError> {
        locate_user(provider).await
    }

    /// Run a cleanup sweep now.
    pub async fn cleanup_now(&self) -> SweepOutcome {
        self.sweeper.sweep().await
    }

    pub fn cleanup_stats(&self) -> CleanupStats {
        self.sweeper.stats()
    }

    /// Stop the subscription and sweeper and wait for both.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Bus map task ended abnormally");
            }
        }
        info!("Bus map stopped");
    }
}

impl Drop for BusMap {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
