//! Restart-durable key/value flags.
//!
//! The producer writes the active bus label under [`BUS_NAME_KEY`] when a
//! session starts and clears it on stop. The background task reads it on
//! every invocation to recover which bus a fix belongs to, even after the OS
//! restarted the process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::traits::BoxFuture;

/// Flag holding the label of the bus currently being shared.
pub const BUS_NAME_KEY: &str = "BUS_NAME";

/// Errors from the durable flag store.
#[derive(Debug, Error)]
pub enum FlagStoreError {
    #[error("Flag store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Flag store file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Process-restart-durable string flags.
pub trait FlagStore: Send + Sync {
    /// Read a flag.
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, FlagStoreError>>;

    /// Write a flag, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> BoxFuture<'_, Result<(), FlagStoreError>>;

    /// Clear a flag. Clearing a missing flag succeeds.
    fn remove(&self, key: &str) -> BoxFuture<'_, Result<(), FlagStoreError>>;
}

/// Volatile flag store for tests and single-process runs.
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    flags: DashMap<String, String>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous read used by tests.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.flags.get(key).map(|v| v.clone())
    }
}

impl FlagStore for MemoryFlagStore {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, FlagStoreError>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.peek(&key)) })
    }

    fn set(&self, key: &str, value: &str) -> BoxFuture<'_, Result<(), FlagStoreError>> {
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            self.flags.insert(key, value);
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> BoxFuture<'_, Result<(), FlagStoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            self.flags.remove(&key);
            Ok(())
        })
    }
}

/// Flag store persisted as a JSON object on disk.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so a crash mid-write leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileFlagStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileFlagStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, FlagStoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| FlagStoreError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    async fn persist(&self, flags: &BTreeMap<String, String>) -> Result<(), FlagStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }

        let contents = serde_json::to_vec_pretty(flags).map_err(|source| FlagStoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), count = flags.len(), "Flags persisted");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> FlagStoreError {
        warn!(path = %self.path.display(), error = %source, "Flag store I/O failed");
        FlagStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl FlagStore for FileFlagStore {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, FlagStoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            Ok(self.load().await?.remove(&key))
        })
    }

    fn set(&self, key: &str, value: &str) -> BoxFuture<'_, Result<(), FlagStoreError>> {
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut flags = self.load().await?;
            flags.insert(key, value);
            self.persist(&flags).await
        })
    }

    fn remove(&self, key: &str) -> BoxFuture<'_, Result<(), FlagStoreError>> {
        let key = key.to_string();
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut flags = self.load().await?;
            if flags.remove(&key).is_none() {
                return Ok(());
            }
            self.persist(&flags).await
        })
    }
}
