//! Record writes with bounded retry.
//!
//! Both the foreground producer and the background task write through
//! [`write_record`]: each attempt runs under a deadline, transient failures
//! back off per the [`RetryPolicy`], and terminal failures return at once.
//!
//! When a cancellation token is supplied it is checked immediately before
//! every `set`, and backoff sleeps end early on cancellation. Once the token
//! is cancelled and the in-flight attempt has returned, no further write for
//! this record reaches the store.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::record::{BusKey, BusRecord};
use crate::retry::RetryPolicy;
use crate::store::{within, RealtimeStore, StoreError};

/// Why a record write did not land.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WriteError {
    #[error("Write cancelled")]
    Cancelled,

    #[error("Write failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("Write rejected: {0}")]
    Rejected(#[source] StoreError),
}

/// Write parameters shared by every attempt.
#[derive(Debug, Clone)]
pub struct WritePlan<'a> {
    pub timeout: Duration,
    pub policy: &'a RetryPolicy,
    pub cancel: Option<&'a CancellationToken>,
}

/// Write `record` to `key`, restamping it from `clock` on every attempt.
///
/// Returns the number of attempts made.
pub async fn write_record(
    store: &dyn RealtimeStore,
    clock: &dyn Clock,
    key: &BusKey,
    mut record: BusRecord,
    plan: WritePlan<'_>,
) -> Result<u32, WriteError> {
    let path = key.path();
    let mut attempt: u32 = 0;

    loop {
        if plan.cancel.is_some_and(|t| t.is_cancelled()) {
            return Err(WriteError::Cancelled);
        }

        attempt += 1;
        record.timestamp = clock.now_ms();
        let value = record
            .to_value()
            .map_err(|e| WriteError::Rejected(StoreError::from(e)))?;

        let err = match within(plan.timeout, store.set(&path, value)).await {
            Ok(()) => {
                debug!(bus = %key, attempt, "Record written");
                return Ok(attempt);
            }
            Err(e) => e,
        };

        if !err.is_transient() {
            warn!(bus = %key, attempt, error = %err, "Record write rejected");
            return Err(WriteError::Rejected(err));
        }

        let Some(delay) = plan.policy.delay_for_retry(attempt) else {
            return Err(WriteError::Exhausted {
                attempts: attempt,
                source: err,
            });
        };

        warn!(
            bus = %key,
            attempt,
            max_attempts = plan.policy.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Record write failed, retrying"
        );

        match plan.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(WriteError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::device::LocationFix;
    use crate::record::DeviceType;
    use crate::store::MemoryStore;

    fn record() -> BusRecord {
        BusRecord::from_fix(&LocationFix::at(22.46, 91.97), 0, DeviceType::StudentShare, "Rafi")
            .unwrap()
    }

    fn plan<'a>(policy: &'a RetryPolicy, cancel: Option<&'a CancellationToken>) -> WritePlan<'a> {
        WritePlan {
            timeout: Duration::from_secs(10),
            policy,
            cancel,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_then_succeed() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(1_000);
        let policy = RetryPolicy::default();
        let key = BusKey::from_label("Surma").unwrap();
        store.fail_next_sets([StoreError::Network("reset".into()), StoreError::Disconnected]);

        let started = tokio::time::Instant::now();
        let attempts = write_record(&store, &clock, &key, record(), plan(&policy, None))
            .await
            .unwrap();

        assert_eq!(attempts, 3);
        // 2s + 4s of backoff
        assert_eq!(started.elapsed(), Duration::from_secs(6));
        let stored = BusRecord::from_value(&store.peek("buses/Surma").unwrap()).unwrap();
        assert_eq!(stored.timestamp, 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_policy_budget() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(0);
        let policy = RetryPolicy::default();
        let key = BusKey::from_label("Surma").unwrap();
        store.fail_next_sets(std::iter::repeat(StoreError::Timeout).take(4));

        let result = write_record(&store, &clock, &key, record(), plan(&policy, None)).await;
        assert_eq!(
            result,
            Err(WriteError::Exhausted {
                attempts: 4,
                source: StoreError::Timeout
            })
        );
        assert_eq!(store.peek("buses/Surma"), None);
    }

    #[tokio::test]
    async fn test_terminal_failure_not_retried() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(0);
        let policy = RetryPolicy::default();
        let key = BusKey::from_label("Surma").unwrap();
        store.fail_next_sets([StoreError::PermissionDenied("rules".into())]);

        let result = write_record(&store, &clock, &key, record(), plan(&policy, None)).await;
        assert!(matches!(result, Err(WriteError::Rejected(StoreError::PermissionDenied(_)))));
        assert_eq!(store.set_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(0);
        let policy = RetryPolicy::default();
        let key = BusKey::from_label("Surma").unwrap();
        let token = CancellationToken::new();
        store.fail_next_sets([StoreError::Timeout]);

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let result = write_record(&store, &clock, &key, record(), plan(&policy, Some(&token))).await;
        assert_eq!(result, Err(WriteError::Cancelled));
        assert_eq!(store.peek("buses/Surma"), None);
    }

    #[tokio::test]
    async fn test_precancelled_never_writes() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(0);
        let policy = RetryPolicy::default();
        let key = BusKey::from_label("Surma").unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = write_record(&store, &clock, &key, record(), plan(&policy, Some(&token))).await;
        assert_eq!(result, Err(WriteError::Cancelled));
        assert_eq!(store.set_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_write_times_out_and_retries() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(0);
        let policy = RetryPolicy::with_base(1, Duration::from_secs(2));
        let key = BusKey::from_label("Surma").unwrap();
        store.set_write_delay(Some(Duration::from_secs(30)));

        let result = write_record(&store, &clock, &key, record(), plan(&policy, None)).await;
        assert_eq!(
            result,
            Err(WriteError::Exhausted {
                attempts: 2,
                source: StoreError::Timeout
            })
        );
    }
}
