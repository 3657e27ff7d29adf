//! Chooses and opens the storage backend for a LogManager.
//!
//! Backend resolution: an explicit `storageBackend` wins; otherwise an
//! empty `cacheFilePath` means memory, and a path gets the first compiled
//! persistent engine (SQLite, then redb). A persistent open is retried
//! once; if it still fails the store falls back to the memory engine and
//! the observer hears `on_storage_failed`, so telemetry keeps flowing for
//! the life of the process even with a broken disk.

use std::sync::Arc;

use tracing::{error, warn};

use crate::config::{BeaconConfig, StorageBackend};
use crate::observer::TelemetryObserver;
use crate::platform::Clock;
use crate::storage::engines::MemoryEngine;
use crate::storage::{OfflineStorage, StorageEngine};

fn resolve_backend(config: &BeaconConfig) -> StorageBackend {
    if let Some(backend) = config.storage_backend {
        return backend;
    }
    if config.cache_file_path.is_empty() {
        return StorageBackend::Memory;
    }
    #[cfg(feature = "sqlite")]
    {
        StorageBackend::Sqlite
    }
    #[cfg(all(not(feature = "sqlite"), feature = "redb"))]
    {
        StorageBackend::Redb
    }
    #[cfg(all(not(feature = "sqlite"), not(feature = "redb")))]
    {
        StorageBackend::Memory
    }
}

fn open_engine(backend: StorageBackend, path: &str) -> anyhow::Result<Arc<dyn StorageEngine>> {
    match backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryEngine::new())),
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite => Ok(Arc::new(super::engines::SqliteEngine::open(path)?)),
        #[cfg(not(feature = "sqlite"))]
        StorageBackend::Sqlite => anyhow::bail!("sqlite backend not compiled in"),
        #[cfg(feature = "redb")]
        StorageBackend::Redb => Ok(Arc::new(super::engines::RedbEngine::open(path)?)),
        #[cfg(not(feature = "redb"))]
        StorageBackend::Redb => anyhow::bail!("redb backend not compiled in"),
    }
}

/// Opens offline storage per the configuration, falling back to memory on
/// persistent-backend failure.
///
/// # Errors
///
/// Only fails when even the in-memory store cannot initialize, which
/// indicates a bug rather than an environment problem.
pub async fn open_storage(
    config: &BeaconConfig,
    observer: Arc<dyn TelemetryObserver>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<OfflineStorage> {
    let backend = resolve_backend(config);
    let path = config.cache_file_path.as_str();

    let engine = match open_engine(backend, path) {
        Ok(engine) => Some(engine),
        Err(first) => {
            warn!(?backend, error = %first, "storage open failed, retrying once");
            match open_engine(backend, path) {
                Ok(engine) => Some(engine),
                Err(second) => {
                    error!(?backend, error = %second, "storage open failed twice, using memory");
                    observer.on_storage_failed(&second.to_string());
                    None
                }
            }
        }
    };
    let engine = engine.unwrap_or_else(|| Arc::new(MemoryEngine::new()) as Arc<dyn StorageEngine>);

    OfflineStorage::initialize(
        engine,
        observer,
        clock,
        config.max_storage_size_bytes,
        config.max_retry_count,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::test_support::RecordingObserver;
    use crate::platform::ManualClock;

    #[tokio::test]
    async fn empty_path_selects_memory() {
        let config = BeaconConfig::for_token("t");
        let observer = Arc::new(RecordingObserver::default());
        let storage = open_storage(&config, observer.clone(), ManualClock::starting_at(0))
            .await
            .unwrap();
        storage
            .store_records(&[])
            .await
            .unwrap();
        assert_eq!(*observer.opened.lock().unwrap(), vec!["Memory"]);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn path_selects_sqlite_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BeaconConfig::for_token("t");
        config.cache_file_path = dir
            .path()
            .join("cache.db")
            .to_str()
            .unwrap()
            .to_string();
        let observer = Arc::new(RecordingObserver::default());
        let _storage = open_storage(&config, observer.clone(), ManualClock::starting_at(0))
            .await
            .unwrap();
        assert_eq!(*observer.opened.lock().unwrap(), vec!["SQLite/Default"]);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn unopenable_path_falls_back_to_memory() {
        let mut config = BeaconConfig::for_token("t");
        config.cache_file_path = "/nonexistent-dir/definitely/cache.db".to_string();
        let observer = Arc::new(RecordingObserver::default());
        let _storage = open_storage(&config, observer.clone(), ManualClock::starting_at(0))
            .await
            .unwrap();
        assert_eq!(observer.failures.lock().unwrap().len(), 1);
        assert_eq!(*observer.opened.lock().unwrap(), vec!["Memory"]);
    }
}
