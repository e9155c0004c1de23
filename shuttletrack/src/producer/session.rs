//! Producer session state machine.
//!
//! All producer state lives in one [`BusSession`] owned by the
//! [`LocationSharer`](super::LocationSharer); every mutation goes through a
//! transition method so start, stop, teardown and the update loop never
//! disagree about whether the device is sharing.
//!
//! # State Machine
//!
//! ```text
//! Idle --[begin_start]--> Starting --[confirm_started]--> Sharing
//! Starting --[abort_start]--> Idle
//! Sharing --[begin_stop]--> Stopping --[finish_stop]--> Idle
//! Starting|Sharing --[begin_teardown]--> Stopping
//! ```
//!
//! Each start opens a new generation with its own cancellation token.
//! Transitions that complete a start check the generation, so a start that
//! was torn down underneath cannot resurrect itself.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::error::ShareError;
use super::interval::interval_for_speed;
use crate::record::BusKey;

/// Lifecycle state of a sharing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Sharing,
    Stopping,
}

impl SessionState {
    /// User-facing status text.
    pub fn display_status(&self) -> &'static str {
        match self {
            SessionState::Idle => "Not sharing",
            SessionState::Starting => "Starting...",
            SessionState::Sharing => "Sharing",
            SessionState::Stopping => "Stopping...",
        }
    }

    /// Whether a session currently owns a bus key.
    pub fn owns_key(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Sharing)
    }
}

/// Handle on one start attempt.
#[derive(Debug, Clone)]
pub struct StartTicket {
    pub generation: u64,
    pub label: String,
    pub key: BusKey,
    pub token: CancellationToken,
}

/// Bus released by a stop or teardown.
#[derive(Debug, Clone)]
pub struct Release {
    pub label: String,
    pub key: BusKey,
}

/// Result of asking the session to stop.
#[derive(Debug, Clone)]
pub enum StopDecision {
    /// Nothing is being shared.
    NotSharing,
    /// Another stop is already running.
    AlreadyStopping,
    /// A start is still running; stop must wait for it.
    StartPending,
    /// The caller owns the release.
    Proceed(Release),
}

/// Producer-local session.
#[derive(Debug)]
pub struct BusSession {
    state: SessionState,
    generation: u64,
    selected: Option<String>,
    active: Option<(String, BusKey)>,
    token: CancellationToken,
    default_interval: Duration,
    interval: Duration,
    writes: u64,
    failed_ticks: u32,
}

impl BusSession {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            state: SessionState::Idle,
            generation: 0,
            selected: None,
            active: None,
            token: CancellationToken::new(),
            default_interval,
            interval: default_interval,
            writes: 0,
            failed_ticks: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn active_label(&self) -> Option<&str> {
        self.active.as_ref().map(|(label, _)| label.as_str())
    }

    pub fn active_key(&self) -> Option<&BusKey> {
        self.active.as_ref().map(|(_, key)| key)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn failed_ticks(&self) -> u32 {
        self.failed_ticks
    }

    /// Change the picker selection. Rejected while another bus is owned.
    pub fn select(&mut self, label: &str) -> Result<(), ShareError> {
        if self.state.owns_key() {
            if let Some(current) = self.active_label() {
                if current != label {
                    return Err(ShareError::BusChangeWhileSharing {
                        current: current.to_string(),
                        requested: label.to_string(),
                    });
                }
            }
        }
        self.selected = Some(label.to_string());
        Ok(())
    }

    /// Open a new start attempt for `label`.
    pub fn begin_start(&mut self, label: &str) -> Result<StartTicket, ShareError> {
        let key = BusKey::from_label(label).ok_or(ShareError::EmptyLabel)?;

        match self.state {
            SessionState::Starting | SessionState::Stopping => {
                return Err(ShareError::OperationInProgress)
            }
            SessionState::Sharing => {
                let current = self.active_label().unwrap_or_default().to_string();
                if current == label {
                    return Err(ShareError::AlreadySharing { label: current });
                }
                return Err(ShareError::BusChangeWhileSharing {
                    current,
                    requested: label.to_string(),
                });
            }
            SessionState::Idle => {}
        }

        self.generation += 1;
        self.state = SessionState::Starting;
        self.selected = Some(label.to_string());
        self.active = Some((label.to_string(), key.clone()));
        self.token = CancellationToken::new();
        self.interval = self.default_interval;
        self.writes = 0;
        self.failed_ticks = 0;

        Ok(StartTicket {
            generation: self.generation,
            label: label.to_string(),
            key,
            token: self.token.clone(),
        })
    }

    /// Complete a start. Returns false if the attempt was torn down meanwhile.
    pub fn confirm_started(&mut self, generation: u64) -> bool {
        if self.generation != generation
            || self.state != SessionState::Starting
            || self.token.is_cancelled()
        {
            return false;
        }
        self.state = SessionState::Sharing;
        true
    }

    /// Abandon a start attempt. No-op if a newer generation owns the session.
    pub fn abort_start(&mut self, generation: u64) {
        if self.generation != generation || self.state != SessionState::Starting {
            return;
        }
        self.token.cancel();
        self.reset();
    }

    /// Begin an explicit stop.
    pub fn begin_stop(&mut self) -> StopDecision {
        match self.state {
            SessionState::Idle => StopDecision::NotSharing,
            SessionState::Stopping => StopDecision::AlreadyStopping,
            SessionState::Starting => StopDecision::StartPending,
            SessionState::Sharing => self.enter_stopping(),
        }
    }

    /// Begin a teardown: like a stop, but also cancels a pending start.
    pub fn begin_teardown(&mut self) -> StopDecision {
        match self.state {
            SessionState::Idle => StopDecision::NotSharing,
            SessionState::Stopping => StopDecision::AlreadyStopping,
            SessionState::Starting | SessionState::Sharing => self.enter_stopping(),
        }
    }

    /// Finish a stop and return to idle with default sampling.
    pub fn finish_stop(&mut self) {
        if self.state == SessionState::Stopping {
            self.reset();
        }
    }

    /// Recompute the interval from a speed sample.
    ///
    /// Returns the new interval if it changed.
    pub fn record_speed(&mut self, speed_mps: f64) -> Option<Duration> {
        let next = interval_for_speed(speed_mps);
        if next == self.interval {
            return None;
        }
        self.interval = next;
        Some(next)
    }

    pub fn record_write(&mut self) {
        self.writes += 1;
        self.failed_ticks = 0;
    }

    pub fn record_failed_tick(&mut self) {
        self.failed_ticks += 1;
    }

    fn enter_stopping(&mut self) -> StopDecision {
        let Some((label, key)) = self.active.clone() else {
            self.reset();
            return StopDecision::NotSharing;
        };
        self.state = SessionState::Stopping;
        self.token.cancel();
        StopDecision::Proceed(Release { label, key })
    }

    fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.active = None;
        self.interval = self.default_interval;
        self.failed_ticks = 0;
    }
}
