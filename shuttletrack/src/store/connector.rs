//! Lazily established store clients.
//!
//! The background task can run in a freshly restarted process, so it never
//! assumes a client already exists. It asks a [`StoreConnector`] on every
//! invocation; [`CachedConnector`] hands back the existing client when there
//! is one and only connects otherwise.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::traits::{BoxFuture, RealtimeStore, StoreError};

/// Produces a connected store client.
pub trait StoreConnector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn RealtimeStore>, StoreError>>;
}

/// Connector that always returns one pre-built client.
#[derive(Clone)]
pub struct SharedStoreConnector {
    store: Arc<dyn RealtimeStore>,
}

impl SharedStoreConnector {
    pub fn new(store: Arc<dyn RealtimeStore>) -> Self {
        Self { store }
    }
}

impl StoreConnector for SharedStoreConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn RealtimeStore>, StoreError>> {
        let store = Arc::clone(&self.store);
        Box::pin(async move { Ok(store) })
    }
}

/// Reuses the first successfully connected client.
///
/// Failed connection attempts are not cached; the next call tries again.
pub struct CachedConnector<C> {
    inner: C,
    client: Mutex<Option<Arc<dyn RealtimeStore>>>,
    connects: AtomicU32,
}

impl<C: StoreConnector> CachedConnector<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            client: Mutex::new(None),
            connects: AtomicU32::new(0),
        }
    }

    /// Number of times the wrapped connector was asked to connect.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Drop the cached client so the next call reconnects.
    pub async fn reset(&self) {
        self.client.lock().await.take();
    }
}

impl<C: StoreConnector> StoreConnector for CachedConnector<C> {
    fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn RealtimeStore>, StoreError>> {
        Box::pin(async move {
            let mut client = self.client.lock().await;
            if let Some(existing) = client.as_ref() {
                debug!("Reusing existing store client");
                return Ok(Arc::clone(existing));
            }

            self.connects.fetch_add(1, Ordering::Relaxed);
            let fresh = self.inner.connect().await?;
            info!("Store client initialized");
            *client = Some(Arc::clone(&fresh));
            Ok(fresh)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use parking_lot::Mutex as SyncMutex;

    struct FlakyConnector {
        store: Arc<dyn RealtimeStore>,
        failures: SyncMutex<u32>,
    }

    impl StoreConnector for FlakyConnector {
        fn connect(&self) -> BoxFuture<'_, Result<Arc<dyn RealtimeStore>, StoreError>> {
            Box::pin(async move {
                let mut failures = self.failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(StoreError::Network("no route".into()));
                }
                Ok(Arc::clone(&self.store))
            })
        }
    }

    #[tokio::test]
    async fn test_cached_connector_reuses_client() {
        let store: Arc<dyn RealtimeStore> = Arc::new(MemoryStore::new());
        let connector = CachedConnector::new(SharedStoreConnector::new(store));

        let a = connector.connect().await.unwrap();
        let b = connector.connect().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(connector.connect_count(), 1);

        connector.reset().await;
        connector.connect().await.unwrap();
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_cached_connector_retries_after_failure() {
        let connector = CachedConnector::new(FlakyConnector {
            store: Arc::new(MemoryStore::new()),
            failures: SyncMutex::new(1),
        });

        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_ok());
        assert!(connector.connect().await.is_ok());
        assert_eq!(connector.connect_count(), 2);
    }
}
