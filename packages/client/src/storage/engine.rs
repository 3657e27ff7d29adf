//! Low-level storage engine trait.
//!
//! Engines are dumb, durable containers: they persist whole records by id
//! plus a string/string settings table, and know nothing about latencies,
//! reservations, eviction, or retry policy. All of that lives one layer up
//! in [`OfflineStorage`](super::OfflineStorage), so the three backends stay
//! small and the queue semantics exist exactly once.

use async_trait::async_trait;

use super::record::{RecordId, RecordMeta, StorageRecord};

/// Durable record + settings container.
///
/// Engines are accessed only from the pipeline worker; implementations may
/// still take `&self` with interior locking so they can live behind
/// `Arc<dyn StorageEngine>`.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Backend label reported through `on_storage_opened`.
    fn kind(&self) -> &'static str;

    /// `true` for volatile engines (affects `is_last_read_from_memory`).
    fn is_memory(&self) -> bool {
        false
    }

    /// `false` when the settings side store does not exist (memory engine).
    fn supports_settings(&self) -> bool {
        true
    }

    /// Inserts records atomically; an existing id is replaced.
    async fn insert(&self, records: &[StorageRecord]) -> anyhow::Result<()>;

    /// Fetches full records by id; missing ids are silently absent.
    async fn fetch(&self, ids: &[RecordId]) -> anyhow::Result<Vec<StorageRecord>>;

    /// Deletes records atomically, returning how many existed.
    async fn delete(&self, ids: &[RecordId]) -> anyhow::Result<usize>;

    /// Persists new retry counts for the given ids.
    async fn set_retry_counts(&self, updates: &[(RecordId, u16)]) -> anyhow::Result<()>;

    /// Scans all record metadata (no blobs); called once at initialization.
    async fn load_meta(&self) -> anyhow::Result<Vec<RecordMeta>>;

    /// Writes a setting; an empty value deletes the key.
    async fn store_setting(&self, name: &str, value: &str) -> anyhow::Result<()>;

    /// Reads a setting; missing keys read as the empty string.
    async fn get_setting(&self, name: &str) -> anyhow::Result<String>;

    /// Forces buffered writes to durable media.
    async fn flush(&self) -> anyhow::Result<()>;

    /// Releases backend resources. The engine must not be used afterwards.
    async fn close(&self) -> anyhow::Result<()>;
}
