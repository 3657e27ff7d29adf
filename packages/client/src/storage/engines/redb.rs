//! Durable [`StorageEngine`] over redb, an embedded key-value store.
//!
//! Alternate persistent backend for targets where SQLite is unwanted.
//! Records are MessagePack-encoded whole; settings live in a second table.
//! redb transactions give the same crash-atomicity the SQL engine gets
//! from SQLite transactions.

use anyhow::Context;
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};

use crate::storage::engine::StorageEngine;
use crate::storage::record::{RecordId, RecordMeta, StorageRecord};

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Embedded key-value engine.
pub struct RedbEngine {
    db: Database,
}

impl RedbEngine {
    /// Opens (or creates) the database at `path` and ensures both tables
    /// exist so later read transactions never race table creation.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be created or the initial commit fails.
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let db = Database::create(path)
            .with_context(|| format!("open redb store at {path:?}"))?;
        let txn = db.begin_write()?;
        {
            txn.open_table(RECORDS)?;
            txn.open_table(SETTINGS)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }
}

#[async_trait]
impl StorageEngine for RedbEngine {
    fn kind(&self) -> &'static str {
        "Redb/Init"
    }

    async fn insert(&self, records: &[StorageRecord]) -> anyhow::Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RECORDS)?;
            for record in records {
                let bytes = rmp_serde::to_vec(record).context("encode record")?;
                table.insert(record.id.as_str(), bytes.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    async fn fetch(&self, ids: &[RecordId]) -> anyhow::Result<Vec<StorageRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RECORDS)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(guard) = table.get(id.as_str())? {
                let record: StorageRecord =
                    rmp_serde::from_slice(guard.value()).context("decode record")?;
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn delete(&self, ids: &[RecordId]) -> anyhow::Result<usize> {
        let txn = self.db.begin_write()?;
        let mut removed = 0;
        {
            let mut table = txn.open_table(RECORDS)?;
            for id in ids {
                if table.remove(id.as_str())?.is_some() {
                    removed += 1;
                }
            }
        }
        txn.commit()?;
        Ok(removed)
    }

    async fn set_retry_counts(&self, updates: &[(RecordId, u16)]) -> anyhow::Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(RECORDS)?;
            for (id, retry_count) in updates {
                let bytes = table.get(id.as_str())?.map(|guard| guard.value().to_vec());
                if let Some(bytes) = bytes {
                    let mut record: StorageRecord =
                        rmp_serde::from_slice(&bytes).context("decode record")?;
                    record.retry_count = *retry_count;
                    let encoded = rmp_serde::to_vec(&record).context("encode record")?;
                    table.insert(id.as_str(), encoded.as_slice())?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    async fn load_meta(&self) -> anyhow::Result<Vec<RecordMeta>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(RECORDS)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let record: StorageRecord =
                rmp_serde::from_slice(value.value()).context("decode record")?;
            out.push(RecordMeta::from(&record));
        }
        Ok(out)
    }

    async fn store_setting(&self, name: &str, value: &str) -> anyhow::Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            if value.is_empty() {
                table.remove(name)?;
            } else {
                table.insert(name, value)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    async fn get_setting(&self, name: &str) -> anyhow::Result<String> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table
            .get(name)?
            .map(|guard| guard.value().to_string())
            .unwrap_or_default())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
