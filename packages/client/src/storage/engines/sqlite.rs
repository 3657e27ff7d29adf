//! Durable [`StorageEngine`] over an embedded SQLite database (rusqlite).
//!
//! The default persistent backend. One connection behind a mutex; the
//! pipeline worker is the only caller, the lock exists so the engine can
//! live behind `Arc<dyn StorageEngine>`. Inserts and deletes run in
//! transactions, which is what makes `store_records` / `delete_records`
//! crash-atomic.

use anyhow::Context;
use async_trait::async_trait;
use beacon_core::{EventLatency, EventPersistence};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::storage::engine::StorageEngine;
use crate::storage::record::{RecordId, RecordMeta, StorageRecord};

/// SQLite keeps a conservative bound on bound parameters per statement.
const MAX_PARAMS_PER_STATEMENT: usize = 500;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    id            TEXT PRIMARY KEY,
    tenant_token  TEXT NOT NULL,
    latency       INTEGER NOT NULL,
    persistence   INTEGER NOT NULL,
    timestamp_ms  INTEGER NOT NULL,
    retry_count   INTEGER NOT NULL DEFAULT 0,
    blob          BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_records_order
    ON records (latency DESC, timestamp_ms ASC);
CREATE TABLE IF NOT EXISTS settings (
    name   TEXT PRIMARY KEY,
    value  TEXT NOT NULL
);
";

fn latency_to_i64(latency: EventLatency) -> i64 {
    match latency {
        EventLatency::Unspecified => -1,
        EventLatency::Off => 0,
        EventLatency::Normal => 1,
        EventLatency::CostDeferred => 2,
        EventLatency::RealTime => 3,
        EventLatency::Max => 4,
    }
}

fn latency_from_i64(value: i64) -> EventLatency {
    match value {
        0 => EventLatency::Off,
        1 => EventLatency::Normal,
        2 => EventLatency::CostDeferred,
        3 => EventLatency::RealTime,
        4 => EventLatency::Max,
        _ => EventLatency::Unspecified,
    }
}

fn persistence_to_i64(persistence: EventPersistence) -> i64 {
    match persistence {
        EventPersistence::Normal => 1,
        EventPersistence::Critical => 2,
    }
}

fn persistence_from_i64(value: i64) -> EventPersistence {
    if value == 2 {
        EventPersistence::Critical
    } else {
        EventPersistence::Normal
    }
}

/// Embedded SQL engine.
pub struct SqliteEngine {
    conn: Mutex<Connection>,
}

impl SqliteEngine {
    /// Opens (or creates) the database at `path` and applies the schema.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened or the schema cannot be applied.
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite store at {path:?}"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA).context("apply sqlite schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl StorageEngine for SqliteEngine {
    fn kind(&self) -> &'static str {
        "SQLite/Default"
    }

    async fn insert(&self, records: &[StorageRecord]) -> anyhow::Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO records
                 (id, tenant_token, latency, persistence, timestamp_ms, retry_count, blob)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.id,
                    record.tenant_token,
                    latency_to_i64(record.latency),
                    persistence_to_i64(record.persistence),
                    i64::try_from(record.timestamp_ms).unwrap_or(i64::MAX),
                    i64::from(record.retry_count),
                    record.blob,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn fetch(&self, ids: &[RecordId]) -> anyhow::Result<Vec<StorageRecord>> {
        let conn = self.conn.lock();
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_PARAMS_PER_STATEMENT) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let mut stmt = conn.prepare(&format!(
                "SELECT id, tenant_token, latency, persistence, timestamp_ms, retry_count, blob
                 FROM records WHERE id IN ({placeholders})"
            ))?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok(StorageRecord {
                    id: row.get(0)?,
                    tenant_token: row.get(1)?,
                    latency: latency_from_i64(row.get(2)?),
                    persistence: persistence_from_i64(row.get(3)?),
                    timestamp_ms: row.get::<_, i64>(4)?.max(0).unsigned_abs(),
                    retry_count: u16::try_from(row.get::<_, i64>(5)?.max(0)).unwrap_or(u16::MAX),
                    blob: row.get(6)?,
                    reserved_until: 0,
                })
            })?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    async fn delete(&self, ids: &[RecordId]) -> anyhow::Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;
        for chunk in ids.chunks(MAX_PARAMS_PER_STATEMENT) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            removed += tx.execute(
                &format!("DELETE FROM records WHERE id IN ({placeholders})"),
                params_from_iter(chunk.iter()),
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    async fn set_retry_counts(&self, updates: &[(RecordId, u16)]) -> anyhow::Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare_cached("UPDATE records SET retry_count = ?1 WHERE id = ?2")?;
            for (id, retry_count) in updates {
                stmt.execute(params![i64::from(*retry_count), id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn load_meta(&self) -> anyhow::Result<Vec<RecordMeta>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_token, latency, persistence, timestamp_ms, retry_count,
                    length(blob) + length(id) + length(tenant_token)
             FROM records",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RecordMeta {
                id: row.get(0)?,
                tenant_token: row.get(1)?,
                latency: latency_from_i64(row.get(2)?),
                persistence: persistence_from_i64(row.get(3)?),
                timestamp_ms: row.get::<_, i64>(4)?.max(0).unsigned_abs(),
                retry_count: u16::try_from(row.get::<_, i64>(5)?.max(0)).unwrap_or(u16::MAX),
                size_bytes: row.get::<_, i64>(6)?.max(0).unsigned_abs(),
                reserved_until: 0,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    async fn store_setting(&self, name: &str, value: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        if value.is_empty() {
            conn.execute("DELETE FROM settings WHERE name = ?1", params![name])?;
        } else {
            conn.execute(
                "INSERT OR REPLACE INTO settings (name, value) VALUES (?1, ?2)",
                params![name, value],
            )?;
        }
        Ok(())
    }

    async fn get_setting(&self, name: &str) -> anyhow::Result<String> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE name = ?1",
                params![name],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value.unwrap_or_default())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, latency: EventLatency) -> StorageRecord {
        StorageRecord::new(
            id,
            "tenant",
            latency,
            EventPersistence::Normal,
            1_000,
            vec![1, 2, 3],
        )
    }

    fn open_temp() -> (tempfile::TempDir, SqliteEngine) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        let engine = SqliteEngine::open(path.to_str().unwrap()).unwrap();
        (dir, engine)
    }

    #[tokio::test]
    async fn roundtrip_preserves_fields() {
        let (_dir, engine) = open_temp();
        let mut stored = record("a", EventLatency::RealTime);
        stored.retry_count = 2;
        engine.insert(&[stored.clone()]).await.unwrap();

        let fetched = engine.fetch(&["a".into()]).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0], stored);
    }

    #[tokio::test]
    async fn meta_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");
        {
            let engine = SqliteEngine::open(path.to_str().unwrap()).unwrap();
            engine
                .insert(&[record("a", EventLatency::Normal)])
                .await
                .unwrap();
            engine.close().await.unwrap();
        }
        let engine = SqliteEngine::open(path.to_str().unwrap()).unwrap();
        let meta = engine.load_meta().await.unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].id, "a");
        assert_eq!(meta[0].latency, EventLatency::Normal);
    }

    #[tokio::test]
    async fn retry_counts_are_persisted() {
        let (_dir, engine) = open_temp();
        engine
            .insert(&[record("a", EventLatency::Normal)])
            .await
            .unwrap();
        engine
            .set_retry_counts(&[("a".to_string(), 3)])
            .await
            .unwrap();
        assert_eq!(engine.fetch(&["a".into()]).await.unwrap()[0].retry_count, 3);
    }

    #[tokio::test]
    async fn settings_empty_value_deletes() {
        let (_dir, engine) = open_temp();
        engine.store_setting("k", "v").await.unwrap();
        assert_eq!(engine.get_setting("k").await.unwrap(), "v");
        engine.store_setting("k", "").await.unwrap();
        assert_eq!(engine.get_setting("k").await.unwrap(), "");
        assert_eq!(engine.get_setting("missing").await.unwrap(), "");
    }

    #[tokio::test]
    async fn delete_reports_existing_only() {
        let (_dir, engine) = open_temp();
        engine
            .insert(&[record("a", EventLatency::Normal)])
            .await
            .unwrap();
        let removed = engine
            .delete(&["a".into(), "missing".into()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }
}
