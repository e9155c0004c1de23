//! Core traits for the shared real-time store.
//!
//! The `RealtimeStore` trait models a hierarchical key-value service with
//! atomic replace, delete, point reads and push subscriptions. Paths are
//! `/`-separated (`buses`, `buses/{key}`); values are JSON.
//!
//! # Design Principles
//!
//! - **Path-addressed JSON**: records keep the wire format other clients read
//! - **Idempotent delete**: removing a missing path succeeds
//! - **Push subscriptions**: the first event is the current value, later
//!   events are full replacements of the subscribed subtree
//! - **Dyn-compatible**: uses `Pin<Box<dyn Future>>` for trait object support

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Network-level failure talking to the service.
    #[error("Network error: {0}")]
    Network(String),

    /// The operation did not complete in time.
    #[error("Store operation timed out")]
    Timeout,

    /// The client lost its connection.
    #[error("Store client disconnected")]
    Disconnected,

    /// Security rules rejected the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The path is empty or contains forbidden characters.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Network(_) | StoreError::Timeout | StoreError::Disconnected
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// One push delivered to a subscriber: the subtree value, or `None` if empty.
pub type SubscriptionEvent = Result<Option<Value>, StoreError>;

/// A live subscription to a store path.
///
/// Dropping the subscription unsubscribes.
pub struct Subscription {
    path: String,
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Wrap an event channel; `on_drop` runs when the subscriber goes away.
    pub fn new(
        path: impl Into<String>,
        events: mpsc::UnboundedReceiver<SubscriptionEvent>,
        on_drop: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            events,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// The subscribed path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the next push. `None` means the store closed the stream.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

/// Shared real-time key-value store.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`; producers, the background task
/// and every map consumer hold the same `Arc<dyn RealtimeStore>`.
pub trait RealtimeStore: Send + Sync {
    /// Atomically replace the value at `path`.
    fn set(&self, path: &str, value: Value) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Delete the value at `path`. Deleting a missing path is not an error.
    fn remove(&self, path: &str) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Point read of `path`. Returns `Ok(None)` when nothing is stored.
    fn get(&self, path: &str) -> BoxFuture<'_, Result<Option<Value>, StoreError>>;

    /// Open a push subscription on `path`.
    fn subscribe(&self, path: &str) -> BoxFuture<'_, Result<Subscription, StoreError>>;
}

/// Run a store future under a deadline, mapping expiry to [`StoreError::Timeout`].
pub async fn within<T, F>(deadline: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}
