//! Volatile in-memory [`StorageEngine`] backed by [`DashMap`].
//!
//! Used for tests, ephemeral workloads, and as the fallback when a
//! persistent engine cannot be opened. Identical record contract to the
//! durable engines; the settings side store intentionally does not exist.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::storage::engine::StorageEngine;
use crate::storage::record::{RecordId, RecordMeta, StorageRecord};

/// In-memory engine; everything is lost when the process exits.
#[derive(Default)]
pub struct MemoryEngine {
    records: DashMap<RecordId, StorageRecord>,
}

impl MemoryEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    fn kind(&self) -> &'static str {
        "Memory"
    }

    fn is_memory(&self) -> bool {
        true
    }

    fn supports_settings(&self) -> bool {
        false
    }

    async fn insert(&self, records: &[StorageRecord]) -> anyhow::Result<()> {
        for record in records {
            self.records.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn fetch(&self, ids: &[RecordId]) -> anyhow::Result<Vec<StorageRecord>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.clone()))
            .collect())
    }

    async fn delete(&self, ids: &[RecordId]) -> anyhow::Result<usize> {
        let mut removed = 0;
        for id in ids {
            if self.records.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn set_retry_counts(&self, updates: &[(RecordId, u16)]) -> anyhow::Result<()> {
        for (id, retry_count) in updates {
            if let Some(mut record) = self.records.get_mut(id) {
                record.retry_count = *retry_count;
            }
        }
        Ok(())
    }

    async fn load_meta(&self) -> anyhow::Result<Vec<RecordMeta>> {
        Ok(self
            .records
            .iter()
            .map(|entry| RecordMeta::from(entry.value()))
            .collect())
    }

    async fn store_setting(&self, _name: &str, _value: &str) -> anyhow::Result<()> {
        anyhow::bail!("memory engine has no settings store")
    }

    async fn get_setting(&self, _name: &str) -> anyhow::Result<String> {
        anyhow::bail!("memory engine has no settings store")
    }

    async fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.records.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use beacon_core::{EventLatency, EventPersistence};

    use super::*;

    fn record(id: &str) -> StorageRecord {
        StorageRecord::new(
            id,
            "tenant",
            EventLatency::Normal,
            EventPersistence::Normal,
            1_000,
            vec![1, 2, 3],
        )
    }

    #[tokio::test]
    async fn insert_fetch_delete_roundtrip() {
        let engine = MemoryEngine::new();
        engine.insert(&[record("a"), record("b")]).await.unwrap();

        let fetched = engine.fetch(&["a".into(), "missing".into()]).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, "a");

        assert_eq!(engine.delete(&["a".into(), "b".into()]).await.unwrap(), 2);
        assert!(engine.load_meta().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn colliding_insert_replaces() {
        let engine = MemoryEngine::new();
        engine.insert(&[record("a")]).await.unwrap();
        let mut newer = record("a");
        newer.blob = vec![9; 10];
        engine.insert(&[newer]).await.unwrap();

        let fetched = engine.fetch(&["a".into()]).await.unwrap();
        assert_eq!(fetched[0].blob, vec![9; 10]);
        assert_eq!(engine.load_meta().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn settings_are_absent() {
        let engine = MemoryEngine::new();
        assert!(engine.store_setting("k", "v").await.is_err());
        assert!(engine.get_setting("k").await.is_err());
    }
}
