//! Periodic deletion of expired bus records.
//!
//! Every connected map runs one [`CleanupSweeper`]. Each sweep point-reads
//! the whole `buses` collection, computes the staleness cutoff and issues
//! parallel deletes for every record older than it. Individual delete
//! failures are logged and do not stop the others. A uniform random jitter
//! is added to each period so many consumers don't sweep in lockstep.
//!
//! A record with no readable timestamp counts as timestamp 0 and is always
//! expired.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::filter::DEFAULT_STALE_WINDOW_SECS;
use crate::clock::Clock;
use crate::record::{raw_timestamp, staleness_cutoff, BusKey, BUSES_PATH};
use crate::store::{RealtimeStore, StoreError};

// =============================================================================
// Configuration
// =============================================================================

/// Default sweep period (60 seconds).
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Default upper bound for the random jitter added to each period.
pub const DEFAULT_CLEANUP_JITTER_MS: u64 = 5000;

/// Cleanup sweep configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupConfig {
    /// Base period between sweeps.
    pub interval: Duration,
    /// Jitter is drawn uniformly from `[0, jitter)`. Zero disables it.
    pub jitter: Duration,
    /// Records older than this are deleted.
    pub stale_window: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            jitter: Duration::from_millis(DEFAULT_CLEANUP_JITTER_MS),
            stale_window: Duration::from_secs(DEFAULT_STALE_WINDOW_SECS),
        }
    }
}

impl CleanupConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_stale_window(mut self, window: Duration) -> Self {
        self.stale_window = window;
        self
    }

    /// Delay before the next sweep: the interval plus a fresh jitter sample.
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.interval;
        }
        self.interval + Duration::from_millis(rand::rng().random_range(0..jitter_ms))
    }
}

// =============================================================================
// Results
// =============================================================================

/// Result of one completed sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Cutoff used, in epoch milliseconds.
    pub cutoff: i64,
    /// Records present in the collection.
    pub examined: usize,
    /// Expired records that were deleted.
    pub deleted: usize,
    /// Expired records whose delete failed.
    pub failed: usize,
}

/// What a sweep call did.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepOutcome {
    /// Another sweep was already running; nothing was done.
    AlreadyRunning,
    /// The collection could not be read.
    ReadFailed(StoreError),
    Completed(SweepReport),
}

/// Running totals shown alongside the map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupStats {
    /// Clock time of the last completed sweep.
    pub last_run: Option<i64>,
    /// Records deleted by the last completed sweep.
    pub deleted_count: usize,
    /// Records deleted since the sweeper was created.
    pub total_deleted: u64,
    /// Completed sweeps.
    pub runs: u64,
}

// =============================================================================
// Sweeper
// =============================================================================

/// Clears the running flag even if the sweep future is dropped midway.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Deletes expired records from the shared store.
pub struct CleanupSweeper {
    store: Arc<dyn RealtimeStore>,
    clock: Arc<dyn Clock>,
    config: CleanupConfig,
    running: AtomicBool,
    stats: Mutex<CleanupStats>,
}

impl CleanupSweeper {
    pub fn new(store: Arc<dyn RealtimeStore>, clock: Arc<dyn Clock>, config: CleanupConfig) -> Self {
        Self {
            store,
            clock,
            config,
            running: AtomicBool::new(false),
            stats: Mutex::new(CleanupStats::default()),
        }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    /// Snapshot of the running totals.
    pub fn stats(&self) -> CleanupStats {
        self.stats.lock().clone()
    }

    /// Whether a sweep is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one sweep now.
    ///
    /// Returns [`SweepOutcome::AlreadyRunning`] instead of starting a second
    /// concurrent sweep.
    pub async fn sweep(&self) -> SweepOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Cleanup sweep already running, skipping");
            return SweepOutcome::AlreadyRunning;
        }
        let _guard = RunningGuard(&self.running);

        let snapshot = match self.store.get(BUSES_PATH).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Cleanup sweep could not read buses");
                return SweepOutcome::ReadFailed(e);
            }
        };

        let now = self.clock.now_ms();
        let cutoff = staleness_cutoff(now, self.config.stale_window);
        let mut report = SweepReport {
            cutoff,
            ..SweepReport::default()
        };

        let expired: Vec<BusKey> = match snapshot {
            Some(Value::Object(children)) => {
                report.examined = children.len();
                children
                    .iter()
                    .filter(|(_, value)| raw_timestamp(value) < cutoff)
                    .map(|(name, _)| BusKey::from_store(name.clone()))
                    .collect()
            }
            _ => Vec::new(),
        };

        if !expired.is_empty() {
            let deletes = expired.iter().map(|key| {
                let path = key.path();
                async move {
                    let result = self.store.remove(&path).await;
                    if let Err(ref e) = result {
                        warn!(bus = %key, error = %e, "Failed to delete expired bus");
                    } else {
                        debug!(bus = %key, "Deleted expired bus");
                    }
                    result
                }
            });

            for result in join_all(deletes).await {
                match result {
                    Ok(()) => report.deleted += 1,
                    Err(_) => report.failed += 1,
                }
            }
        }

        {
            let mut stats = self.stats.lock();
            stats.last_run = Some(now);
            stats.deleted_count = report.deleted;
            stats.total_deleted += report.deleted as u64;
            stats.runs += 1;
        }

        if report.deleted > 0 || report.failed > 0 {
            info!(
                deleted = report.deleted,
                failed = report.failed,
                examined = report.examined,
                "Cleanup sweep completed"
            );
        } else {
            debug!(examined = report.examined, "Cleanup sweep found no expired buses");
        }

        SweepOutcome::Completed(report)
    }

    /// Sweep every interval (plus jitter) until `shutdown` is cancelled.
    ///
    /// The first sweep happens after one period, not immediately.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            jitter_ms = self.config.jitter.as_millis() as u64,
            "Cleanup sweeper started"
        );

        loop {
            let delay = self.config.next_delay();
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = tokio::time::sleep(delay) => {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = self.sweep() => {}
                    }
                }
            }
        }

        info!("Cleanup sweeper stopped");
    }
}
