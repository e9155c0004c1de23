//! In-process real-time store.
//!
//! `MemoryStore` implements [`RealtimeStore`] on top of `dashmap` so the
//! whole pipeline can run without a network service: local simulations,
//! single-device demos and the test suite all use it.
//!
//! Values are stored at their full path. A read of an interior path (for
//! example `buses`) assembles the object of everything stored beneath it,
//! which is the same shape a hosted store returns.
//!
//! Failure injection hooks let tests script transient write errors,
//! subscription failures and slow reads or writes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::traits::{BoxFuture, RealtimeStore, StoreError, Subscription, SubscriptionEvent};

/// Characters not allowed inside a path segment.
const FORBIDDEN_PATH_CHARS: [char; 5] = ['.', '#', '$', '[', ']'];

struct Subscriber {
    id: u64,
    path: String,
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
}

#[derive(Default)]
struct Faults {
    set: VecDeque<StoreError>,
    remove: VecDeque<StoreError>,
    get: VecDeque<StoreError>,
    subscribe: VecDeque<StoreError>,
    write_delay: Option<Duration>,
    read_delay: Option<Duration>,
}

#[derive(Default)]
struct MemoryInner {
    entries: DashMap<String, Value>,
    subscribers: Mutex<Vec<Subscriber>>,
    faults: Mutex<Faults>,
    next_subscriber_id: AtomicU64,
    sets: AtomicU64,
    removes: AtomicU64,
}

/// In-memory [`RealtimeStore`] with push subscriptions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.inner.entries.len())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set` calls so far.
    pub fn set_count(&self) -> u64 {
        self.inner.sets.load(Ordering::Relaxed)
    }

    /// Number of successful `remove` calls so far.
    pub fn remove_count(&self) -> u64 {
        self.inner.removes.load(Ordering::Relaxed)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Synchronous snapshot of a path, bypassing failure injection.
    pub fn peek(&self, path: &str) -> Option<Value> {
        self.inner.read(path)
    }

    /// Fail the next `set` calls with the given errors, in order.
    pub fn fail_next_sets(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.inner.faults.lock().set.extend(errors);
    }

    /// Fail the next `remove` calls with the given errors, in order.
    pub fn fail_next_removes(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.inner.faults.lock().remove.extend(errors);
    }

    /// Fail the next `get` calls with the given errors, in order.
    pub fn fail_next_gets(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.inner.faults.lock().get.extend(errors);
    }

    /// Fail the next `subscribe` calls with the given errors, in order.
    pub fn fail_next_subscribes(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.inner.faults.lock().subscribe.extend(errors);
    }

    /// Delay every `set` by `delay` before it is applied.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        self.inner.faults.lock().write_delay = delay;
    }

    /// Delay every `get` by `delay` before it reads.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.inner.faults.lock().read_delay = delay;
    }

    /// Push `error` to every live subscriber and close their streams.
    pub fn break_subscriptions(&self, error: StoreError) {
        let dropped: Vec<Subscriber> = std::mem::take(&mut *self.inner.subscribers.lock());
        debug!(count = dropped.len(), error = %error, "Breaking store subscriptions");
        for sub in dropped {
            let _ = sub.tx.send(Err(error.clone()));
        }
    }
}

impl MemoryInner {
    fn read(&self, path: &str) -> Option<Value> {
        if let Some(value) = self.entries.get(path) {
            return Some(value.clone());
        }

        let prefix = format!("{}/", path);
        let mut root = Map::new();
        for entry in self.entries.iter() {
            if let Some(rest) = entry.key().strip_prefix(&prefix) {
                insert_nested(&mut root, rest, entry.value().clone());
            }
        }

        if root.is_empty() {
            None
        } else {
            Some(Value::Object(root))
        }
    }

    fn write(&self, path: &str, value: Value) {
        let prefix = format!("{}/", path);
        self.entries.retain(|k, _| !k.starts_with(&prefix));
        if value.is_null() {
            self.entries.remove(path);
        } else {
            self.entries.insert(path.to_string(), value);
        }
        self.notify(path);
    }

    fn delete(&self, path: &str) {
        let prefix = format!("{}/", path);
        self.entries.retain(|k, _| k != path && !k.starts_with(&prefix));
        self.notify(path);
    }

    /// Push the new subtree value to subscribers on, above or below `changed`.
    fn notify(&self, changed: &str) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| {
            if !paths_overlap(&sub.path, changed) {
                return true;
            }
            let value = self.read(&sub.path);
            sub.tx.send(Ok(value)).is_ok()
        });
    }

    fn take_fault(&self, pick: impl FnOnce(&mut Faults) -> &mut VecDeque<StoreError>) -> Option<StoreError> {
        let mut faults = self.faults.lock();
        pick(&mut faults).pop_front()
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|sub| sub.id != id);
        trace!(id, "Store subscription dropped");
    }
}

impl RealtimeStore for MemoryStore {
    fn set(&self, path: &str, value: Value) -> BoxFuture<'_, Result<(), StoreError>> {
        let path = path.to_string();
        Box::pin(async move {
            validate_path(&path)?;
            let delay = self.inner.faults.lock().write_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.inner.take_fault(|f| &mut f.set) {
                return Err(err);
            }
            self.inner.write(&path, value);
            self.inner.sets.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn remove(&self, path: &str) -> BoxFuture<'_, Result<(), StoreError>> {
        let path = path.to_string();
        Box::pin(async move {
            validate_path(&path)?;
            if let Some(err) = self.inner.take_fault(|f| &mut f.remove) {
                return Err(err);
            }
            self.inner.delete(&path);
            self.inner.removes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn get(&self, path: &str) -> BoxFuture<'_, Result<Option<Value>, StoreError>> {
        let path = path.to_string();
        Box::pin(async move {
            validate_path(&path)?;
            let delay = self.inner.faults.lock().read_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.inner.take_fault(|f| &mut f.get) {
                return Err(err);
            }
            Ok(self.inner.read(&path))
        })
    }

    fn subscribe(&self, path: &str) -> BoxFuture<'_, Result<Subscription, StoreError>> {
        let path = path.to_string();
        Box::pin(async move {
            validate_path(&path)?;
            if let Some(err) = self.inner.take_fault(|f| &mut f.subscribe) {
                return Err(err);
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);

            // Initial push carries the current value.
            let _ = tx.send(Ok(self.inner.read(&path)));
            self.inner.subscribers.lock().push(Subscriber {
                id,
                path: path.clone(),
                tx,
            });

            let weak: Weak<MemoryInner> = Arc::downgrade(&self.inner);
            Ok(Subscription::new(path, rx, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.unsubscribe(id);
                }
            }))
        })
    }
}

fn validate_path(path: &str) -> Result<(), StoreError> {
    if path.is_empty() || path.split('/').any(|seg| seg.is_empty()) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    if path.chars().any(|c| FORBIDDEN_PATH_CHARS.contains(&c)) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

fn paths_overlap(a: &str, b: &str) -> bool {
    a == b || is_ancestor(a, b) || is_ancestor(b, a)
}

fn is_ancestor(ancestor: &str, path: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

fn insert_nested(root: &mut Map<String, Value>, rest: &str, value: Value) {
    match rest.split_once('/') {
        None => {
            root.insert(rest.to_string(), value);
        }
        Some((head, tail)) => {
            let child = root
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = child {
                insert_nested(map, tail, value);
            }
        }
    }
}
