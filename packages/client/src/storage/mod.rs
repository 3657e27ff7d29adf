//! Offline storage: a durable FIFO-within-priority queue of records with
//! reservation semantics and retry accounting.
//!
//! Layering mirrors the rest of the storage stack: a dumb, durable
//! [`StorageEngine`] underneath, and this orchestrator on top holding the
//! in-memory metadata index. Selection order, reservations, eviction,
//! retry caps, and observer notifications are implemented exactly once
//! here and shared by every backend.

pub mod engine;
pub mod engines;
pub mod factory;
pub mod record;

use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;
use beacon_core::EventLatency;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::observer::TelemetryObserver;
use crate::platform::Clock;

pub use engine::StorageEngine;
pub use record::{RecordId, RecordMeta, StorageRecord};

/// Setting key under which a server `Retry-After` hint is recorded.
pub const SETTING_LAST_RETRY_AFTER_MS: &str = "last_retry_after_ms";

#[derive(Debug, Default)]
struct RecordIndex {
    by_id: HashMap<RecordId, RecordMeta, RandomState>,
    total_bytes: u64,
}

impl RecordIndex {
    fn upsert(&mut self, meta: RecordMeta) {
        if let Some(old) = self.by_id.insert(meta.id.clone(), meta) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes);
        }
        // The freshly inserted meta's size is accounted by the caller to
        // keep this branch-free; see callers.
    }

    fn remove(&mut self, id: &str) -> Option<RecordMeta> {
        let removed = self.by_id.remove(id);
        if let Some(meta) = &removed {
            self.total_bytes = self.total_bytes.saturating_sub(meta.size_bytes);
        }
        removed
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LastRead {
    count: usize,
    from_memory: bool,
}

/// Durable, crash-safe record queue with reservations.
///
/// All operations are serialized by the pipeline worker; the internal
/// mutex only protects the index so diagnostics can peek concurrently.
pub struct OfflineStorage {
    engine: Arc<dyn StorageEngine>,
    observer: Arc<dyn TelemetryObserver>,
    clock: Arc<dyn Clock>,
    max_size_bytes: u64,
    max_retry_count: u16,
    index: Mutex<RecordIndex>,
    last_read: Mutex<LastRead>,
}

impl OfflineStorage {
    /// Opens the store over an already-constructed engine: loads the
    /// metadata index, clears reservations dangling from a prior process,
    /// and announces the backend to the observer (exactly once).
    ///
    /// # Errors
    ///
    /// Fails when the initial metadata scan fails.
    pub async fn initialize(
        engine: Arc<dyn StorageEngine>,
        observer: Arc<dyn TelemetryObserver>,
        clock: Arc<dyn Clock>,
        max_size_bytes: u64,
        max_retry_count: u16,
    ) -> anyhow::Result<Self> {
        let metas = engine.load_meta().await?;
        let mut index = RecordIndex::default();
        for mut meta in metas {
            meta.reserved_until = 0;
            index.total_bytes += meta.size_bytes;
            index.by_id.insert(meta.id.clone(), meta);
        }
        debug!(
            backend = engine.kind(),
            records = index.by_id.len(),
            bytes = index.total_bytes,
            "offline storage opened"
        );
        observer.on_storage_opened(engine.kind());
        Ok(Self {
            engine,
            observer,
            clock,
            max_size_bytes,
            max_retry_count,
            index: Mutex::new(index),
            last_read: Mutex::new(LastRead::default()),
        })
    }

    /// Atomically inserts records (colliding ids replace), then evicts the
    /// oldest records of the lowest persistence/latency class until the
    /// store fits `max_size_bytes` again. Evictions are reported through
    /// one `on_records_dropped` call in drop order.
    ///
    /// # Errors
    ///
    /// Propagates engine failures; on failure the index is untouched.
    pub async fn store_records(&self, records: &[StorageRecord]) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.engine.insert(records).await?;
        {
            let mut index = self.index.lock();
            for record in records {
                let meta = RecordMeta::from(record);
                index.total_bytes += meta.size_bytes;
                index.upsert(meta);
            }
        }
        metrics::counter!("beacon_records_stored_total").increment(records.len() as u64);

        let victims = self.pick_eviction_victims();
        if !victims.is_empty() {
            self.engine.delete(&victims).await?;
            {
                let mut index = self.index.lock();
                for id in &victims {
                    index.remove(id);
                }
            }
            warn!(evicted = victims.len(), "storage overflow, evicted records");
            metrics::counter!("beacon_records_evicted_total").increment(victims.len() as u64);
            self.observer.on_records_dropped(&victims);
        }
        Ok(())
    }

    /// Oldest-first victims from the lowest (persistence, latency) class
    /// until the projected total fits the budget.
    fn pick_eviction_victims(&self) -> Vec<RecordId> {
        let index = self.index.lock();
        if index.total_bytes <= self.max_size_bytes {
            return Vec::new();
        }
        let mut metas: Vec<_> = index.by_id.values().collect();
        metas.sort_by(|a, b| {
            a.persistence
                .cmp(&b.persistence)
                .then(a.latency.cmp(&b.latency))
                .then(a.timestamp_ms.cmp(&b.timestamp_ms))
                .then(a.id.cmp(&b.id))
        });
        let mut projected = index.total_bytes;
        let mut victims = Vec::new();
        for meta in metas {
            if projected <= self.max_size_bytes {
                break;
            }
            projected = projected.saturating_sub(meta.size_bytes);
            victims.push(meta.id.clone());
        }
        victims
    }

    /// Reads records without reserving them.
    ///
    /// With `shutdown == false`, returns available records of exactly the
    /// given latency (`Unspecified` = every latency). With `shutdown ==
    /// true`, returns every record — reserved included, all latencies —
    /// for diagnostics and shutdown draining. Ordering is latency
    /// descending, then timestamp ascending. `max_count == 0` means
    /// unbounded.
    ///
    /// # Errors
    ///
    /// Propagates engine fetch failures.
    pub async fn get_records(
        &self,
        shutdown: bool,
        latency: EventLatency,
        max_count: usize,
    ) -> anyhow::Result<Vec<StorageRecord>> {
        let now = self.clock.now_ms();
        let mut selected: Vec<RecordMeta> = {
            let index = self.index.lock();
            index
                .by_id
                .values()
                .filter(|meta| {
                    if shutdown {
                        true
                    } else {
                        meta.is_available(now)
                            && (latency == EventLatency::Unspecified || meta.latency == latency)
                    }
                })
                .cloned()
                .collect()
        };
        selected.sort_by(|a, b| {
            b.latency
                .cmp(&a.latency)
                .then(a.timestamp_ms.cmp(&b.timestamp_ms))
                .then(a.id.cmp(&b.id))
        });
        if max_count > 0 {
            selected.truncate(max_count);
        }
        let ids: Vec<RecordId> = selected.iter().map(|meta| meta.id.clone()).collect();
        let fetched = self.engine.fetch(&ids).await?;
        let mut by_id: HashMap<String, StorageRecord, RandomState> = fetched
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        // Preserve the selection order and reflect live reservation state.
        let mut out = Vec::with_capacity(selected.len());
        for meta in &selected {
            if let Some(mut record) = by_id.remove(meta.id.as_str()) {
                record.reserved_until = meta.reserved_until;
                record.retry_count = meta.retry_count;
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Offers available records (latency ≥ `latency_floor`) to `acceptor`
    /// in priority order: latency descending, then timestamp ascending.
    ///
    /// Each accepted record is reserved for `reservation_window_ms`. A
    /// `false` return leaves the probed record available and **stops the
    /// scan**; the scan also stops after `max_count` acceptances (`0` =
    /// unbounded) or when candidates run out. Returns the accepted count
    /// and updates the `last_read` bookkeeping.
    ///
    /// # Errors
    ///
    /// Propagates engine fetch failures.
    pub async fn get_and_reserve_records<F>(
        &self,
        mut acceptor: F,
        reservation_window_ms: u64,
        latency_floor: EventLatency,
        max_count: usize,
    ) -> anyhow::Result<usize>
    where
        F: FnMut(StorageRecord) -> bool,
    {
        let now = self.clock.now_ms();
        let mut candidates: Vec<RecordMeta> = {
            let index = self.index.lock();
            index
                .by_id
                .values()
                .filter(|meta| meta.is_available(now) && meta.latency >= latency_floor)
                .cloned()
                .collect()
        };
        candidates.sort_by(|a, b| {
            b.latency
                .cmp(&a.latency)
                .then(a.timestamp_ms.cmp(&b.timestamp_ms))
                .then(a.id.cmp(&b.id))
        });

        let reserved_until = now + reservation_window_ms;
        let mut accepted = 0usize;
        'scan: for chunk in candidates.chunks(64) {
            let ids: Vec<RecordId> = chunk.iter().map(|meta| meta.id.clone()).collect();
            let fetched = self.engine.fetch(&ids).await?;
            let mut by_id: HashMap<String, StorageRecord, RandomState> = fetched
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect();
            for meta in chunk {
                let Some(mut record) = by_id.remove(meta.id.as_str()) else {
                    continue;
                };
                record.retry_count = meta.retry_count;
                if acceptor(record) {
                    accepted += 1;
                    let mut index = self.index.lock();
                    if let Some(live) = index.by_id.get_mut(meta.id.as_str()) {
                        live.reserved_until = reserved_until;
                    }
                    if max_count > 0 && accepted >= max_count {
                        break 'scan;
                    }
                } else {
                    break 'scan;
                }
            }
        }

        *self.last_read.lock() = LastRead {
            count: accepted,
            from_memory: self.engine.is_memory(),
        };
        Ok(accepted)
    }

    /// Clears reservations for the given ids. With `increment_retry`, each
    /// record's retry count is bumped and persisted; records exceeding the
    /// retry cap are deleted and reported through one `on_records_dropped`
    /// call. A server retry hint, when present, is recorded in the
    /// [`SETTING_LAST_RETRY_AFTER_MS`] setting. Returns the dropped ids.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub async fn release_records(
        &self,
        ids: &[RecordId],
        increment_retry: bool,
        retry_after_ms: Option<u64>,
    ) -> anyhow::Result<Vec<RecordId>> {
        if let Some(ms) = retry_after_ms {
            self.store_setting(SETTING_LAST_RETRY_AFTER_MS, &ms.to_string())
                .await?;
        }

        let mut updates: Vec<(RecordId, u16)> = Vec::new();
        let mut dropped: Vec<RecordId> = Vec::new();
        {
            let mut index = self.index.lock();
            for id in ids {
                let Some(meta) = index.by_id.get_mut(id.as_str()) else {
                    continue;
                };
                meta.reserved_until = 0;
                if increment_retry {
                    let bumped = meta.retry_count.saturating_add(1);
                    if bumped > self.max_retry_count {
                        dropped.push(id.clone());
                    } else {
                        meta.retry_count = bumped;
                        updates.push((id.clone(), bumped));
                    }
                }
            }
        }

        if !updates.is_empty() {
            self.engine.set_retry_counts(&updates).await?;
        }
        if !dropped.is_empty() {
            self.engine.delete(&dropped).await?;
            {
                let mut index = self.index.lock();
                for id in &dropped {
                    index.remove(id);
                }
            }
            warn!(dropped = dropped.len(), "records exhausted retry budget");
            metrics::counter!("beacon_records_retry_exhausted_total")
                .increment(dropped.len() as u64);
            self.observer.on_records_dropped(&dropped);
        }
        Ok(dropped)
    }

    /// Unconditionally deletes records (successful upload path).
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub async fn delete_records(&self, ids: &[RecordId]) -> anyhow::Result<usize> {
        let removed = self.engine.delete(ids).await?;
        let mut index = self.index.lock();
        for id in ids {
            index.remove(id);
        }
        Ok(removed)
    }

    /// Count of available (unreserved) records at the given latency;
    /// `Unspecified` counts every latency.
    #[must_use]
    pub fn get_record_count(&self, latency: EventLatency) -> usize {
        let now = self.clock.now_ms();
        let index = self.index.lock();
        index
            .by_id
            .values()
            .filter(|meta| {
                meta.is_available(now)
                    && (latency == EventLatency::Unspecified || meta.latency == latency)
            })
            .count()
    }

    /// Total bytes currently accounted in the store.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.index.lock().total_bytes
    }

    /// How many records the most recent reservation pass handed out.
    #[must_use]
    pub fn last_read_record_count(&self) -> usize {
        self.last_read.lock().count
    }

    /// Whether the most recent reservation pass was served from memory.
    #[must_use]
    pub fn is_last_read_from_memory(&self) -> bool {
        self.last_read.lock().from_memory
    }

    /// Writes a setting; the empty string deletes the key. A no-op on the
    /// memory engine (the settings store is absent there).
    ///
    /// # Errors
    ///
    /// Propagates engine failures from persistent backends.
    pub async fn store_setting(&self, name: &str, value: &str) -> anyhow::Result<()> {
        if !self.engine.supports_settings() {
            debug!(name, "settings unavailable on this backend, ignored");
            return Ok(());
        }
        self.engine.store_setting(name, value).await
    }

    /// Reads a setting; missing keys (and the memory engine) read as `""`.
    ///
    /// # Errors
    ///
    /// Propagates engine failures from persistent backends.
    pub async fn get_setting(&self, name: &str) -> anyhow::Result<String> {
        if !self.engine.supports_settings() {
            return Ok(String::new());
        }
        self.engine.get_setting(name).await
    }

    /// Flushes buffered writes and closes the backend.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.engine.flush().await?;
        self.engine.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use beacon_core::{EventLatency, EventPersistence};

    use super::engines::MemoryEngine;
    use super::*;
    use crate::observer::test_support::RecordingObserver;
    use crate::platform::ManualClock;

    const NOW: u64 = 1_700_000_000_000;

    struct Fixture {
        storage: OfflineStorage,
        observer: Arc<RecordingObserver>,
        clock: Arc<ManualClock>,
        _dir: Option<tempfile::TempDir>,
    }

    async fn fixture_with(
        engine: Arc<dyn StorageEngine>,
        dir: Option<tempfile::TempDir>,
        max_size_bytes: u64,
    ) -> Fixture {
        let observer = Arc::new(RecordingObserver::default());
        let clock = ManualClock::starting_at(NOW);
        let storage = OfflineStorage::initialize(
            engine,
            observer.clone(),
            clock.clone(),
            max_size_bytes,
            5,
        )
        .await
        .unwrap();
        Fixture {
            storage,
            observer,
            clock,
            _dir: dir,
        }
    }

    /// Builds one fixture per compiled backend so the whole contract suite
    /// runs against every engine, like the original parameterized tests.
    async fn all_backends(max_size_bytes: u64) -> Vec<Fixture> {
        let mut fixtures = vec![
            fixture_with(Arc::new(MemoryEngine::new()), None, max_size_bytes).await,
        ];
        #[cfg(feature = "sqlite")]
        {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("contract.db");
            let engine =
                Arc::new(engines::SqliteEngine::open(path.to_str().unwrap()).unwrap());
            fixtures.push(fixture_with(engine, Some(dir), max_size_bytes).await);
        }
        #[cfg(feature = "redb")]
        {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("contract.redb");
            let engine =
                Arc::new(engines::RedbEngine::open(path.to_str().unwrap()).unwrap());
            fixtures.push(fixture_with(engine, Some(dir), max_size_bytes).await);
        }
        fixtures
    }

    fn record(id: &str, latency: EventLatency) -> StorageRecord {
        StorageRecord::new(
            id,
            "tenant",
            latency,
            EventPersistence::Normal,
            NOW,
            vec![1, 2, 3],
        )
    }

    /// Ten Normal + ten RealTime records, mirroring the original populate
    /// helper.
    async fn populate(storage: &OfflineStorage) {
        for latency in [EventLatency::Normal, EventLatency::RealTime] {
            let records: Vec<_> = (0..10)
                .map(|i| record(&format!("Fred-{i}-{latency:?}"), latency))
                .collect();
            storage.store_records(&records).await.unwrap();
        }
        assert_eq!(storage.get_record_count(EventLatency::Unspecified), 20);
    }

    #[tokio::test]
    async fn store_records_then_count_and_read_back() {
        for fx in all_backends(u64::MAX).await {
            let records: Vec<_> = (0..10)
                .map(|i| record(&format!("Fred-{i}"), EventLatency::Normal))
                .collect();
            fx.storage.store_records(&records).await.unwrap();

            assert_eq!(fx.storage.get_record_count(EventLatency::Normal), 10);
            assert_eq!(fx.storage.get_record_count(EventLatency::Unspecified), 10);
            assert_eq!(fx.storage.get_record_count(EventLatency::RealTime), 0);

            let found = fx
                .storage
                .get_records(true, EventLatency::Unspecified, 0)
                .await
                .unwrap();
            assert_eq!(found.len(), 10);
            for rec in &found {
                assert_eq!(rec.blob, vec![1, 2, 3]);
                assert_eq!(rec.latency, EventLatency::Normal);
                assert_eq!(rec.timestamp_ms, NOW);
                assert_eq!(rec.reserved_until, 0);
            }
        }
    }

    #[tokio::test]
    async fn reserve_accept_all_orders_realtime_first() {
        for fx in all_backends(u64::MAX).await {
            populate(&fx.storage).await;
            let mut found = Vec::new();
            let accepted = fx
                .storage
                .get_and_reserve_records(
                    |rec| {
                        found.push(rec);
                        true
                    },
                    5_000,
                    EventLatency::Unspecified,
                    0,
                )
                .await
                .unwrap();
            assert_eq!(accepted, 20);
            assert_eq!(fx.storage.last_read_record_count(), 20);
            for rec in &found[..10] {
                assert_eq!(rec.latency, EventLatency::RealTime);
            }
            for rec in &found[10..] {
                assert_eq!(rec.latency, EventLatency::Normal);
            }
            // Everything is reserved now; nothing is available.
            assert_eq!(fx.storage.get_record_count(EventLatency::Unspecified), 0);
        }
    }

    #[tokio::test]
    async fn acceptor_rejection_stops_the_scan() {
        for fx in all_backends(u64::MAX).await {
            populate(&fx.storage).await;
            let mut found = Vec::new();
            let mut calls = 0usize;
            let accepted = fx
                .storage
                .get_and_reserve_records(
                    |rec| {
                        calls += 1;
                        if rec.latency == EventLatency::RealTime {
                            found.push(rec);
                            true
                        } else {
                            false
                        }
                    },
                    5_000,
                    EventLatency::Unspecified,
                    0,
                )
                .await
                .unwrap();
            assert_eq!(accepted, 10);
            assert_eq!(found.len(), 10);
            // 10 accepted RealTime probes plus the first Normal rejection.
            assert_eq!(calls, 11);
            // The rejected Normal record stayed available.
            assert_eq!(fx.storage.get_record_count(EventLatency::Normal), 10);
        }
    }

    #[tokio::test]
    async fn reservation_lapses_with_the_clock() {
        for fx in all_backends(u64::MAX).await {
            fx.storage
                .store_records(&[record("r1", EventLatency::Normal)])
                .await
                .unwrap();
            let accepted = fx
                .storage
                .get_and_reserve_records(|_| true, 5_000, EventLatency::Unspecified, 0)
                .await
                .unwrap();
            assert_eq!(accepted, 1);
            assert_eq!(fx.storage.get_record_count(EventLatency::Normal), 0);

            fx.clock.advance_ms(5_000);
            assert_eq!(fx.storage.get_record_count(EventLatency::Normal), 1);
        }
    }

    #[tokio::test]
    async fn shutdown_read_returns_everything_realtime_first() {
        for fx in all_backends(u64::MAX).await {
            let records: Vec<_> = (0..20)
                .map(|i| {
                    record(
                        &format!("Fred-{i:02}"),
                        if i < 10 {
                            EventLatency::Normal
                        } else {
                            EventLatency::RealTime
                        },
                    )
                })
                .collect();
            fx.storage.store_records(&records).await.unwrap();

            let found = fx
                .storage
                .get_records(false, EventLatency::Normal, 0)
                .await
                .unwrap();
            assert_eq!(found.len(), 10);
            assert!(found.iter().all(|r| r.latency == EventLatency::Normal));

            let shutdown_found = fx
                .storage
                .get_records(true, EventLatency::Normal, 0)
                .await
                .unwrap();
            assert_eq!(shutdown_found.len(), 20);
            for rec in &shutdown_found[..10] {
                assert_eq!(rec.latency, EventLatency::RealTime);
            }
            for rec in &shutdown_found[10..] {
                assert_eq!(rec.latency, EventLatency::Normal);
            }
        }
    }

    #[tokio::test]
    async fn retry_exhaustion_drops_with_one_notification() {
        let count = 200usize;
        for fx in all_backends(u64::MAX).await {
            let records: Vec<_> = (0..count)
                .map(|i| record(&format!("r-{i:04}"), EventLatency::Normal))
                .collect();
            fx.storage.store_records(&records).await.unwrap();

            // max_retry_count = 5: six release cycles exhaust the budget.
            for cycle in 0..=5u16 {
                let mut seen = Vec::new();
                let accepted = fx
                    .storage
                    .get_and_reserve_records(
                        |rec| {
                            assert_eq!(rec.retry_count, cycle);
                            seen.push(rec.id);
                            true
                        },
                        60_000,
                        EventLatency::Unspecified,
                        0,
                    )
                    .await
                    .unwrap();
                assert_eq!(accepted, count);
                fx.storage
                    .release_records(&seen, true, None)
                    .await
                    .unwrap();
            }

            assert_eq!(fx.storage.get_record_count(EventLatency::Normal), 0);
            let drops = fx.observer.dropped.lock().unwrap();
            assert_eq!(drops.len(), 1);
            assert_eq!(drops[0].len(), count);
        }
    }

    #[tokio::test]
    async fn release_without_retry_keeps_counts() {
        for fx in all_backends(u64::MAX).await {
            fx.storage
                .store_records(&[record("r1", EventLatency::Normal)])
                .await
                .unwrap();
            let mut ids = Vec::new();
            fx.storage
                .get_and_reserve_records(
                    |rec| {
                        ids.push(rec.id);
                        true
                    },
                    5_000,
                    EventLatency::Unspecified,
                    0,
                )
                .await
                .unwrap();
            let dropped = fx.storage.release_records(&ids, false, None).await.unwrap();
            assert!(dropped.is_empty());

            let found = fx
                .storage
                .get_records(false, EventLatency::Normal, 0)
                .await
                .unwrap();
            assert_eq!(found[0].retry_count, 0);
            assert_eq!(found[0].reserved_until, 0);
        }
    }

    #[tokio::test]
    async fn settings_store_overwrite_and_delete() {
        for fx in all_backends(u64::MAX).await {
            for i in 0..10 {
                let name = format!("Fred{i}");
                fx.storage.store_setting(&name, &name).await.unwrap();
            }
            fx.storage
                .store_setting("Fred3", "another value")
                .await
                .unwrap();

            let memory = fx.storage.get_setting("Fred0").await.unwrap().is_empty();
            if memory {
                // Memory engine: settings API is absent; reads are empty.
                continue;
            }
            for i in 0..10 {
                let name = format!("Fred{i}");
                let expected = if i == 3 { "another value" } else { name.as_str() };
                assert_eq!(fx.storage.get_setting(&name).await.unwrap(), expected);
            }
            assert_eq!(fx.storage.get_setting("something").await.unwrap(), "");

            for i in 0..10 {
                let name = format!("Fred{i}");
                fx.storage.store_setting(&name, "").await.unwrap();
            }
            for i in 0..10 {
                let name = format!("Fred{i}");
                assert_eq!(fx.storage.get_setting(&name).await.unwrap(), "");
            }
        }
    }

    #[tokio::test]
    async fn overflow_evicts_lowest_class_oldest_first() {
        // Each record costs 3 (blob) + id + tenant bytes; budget fits ~3.
        for fx in all_backends(64).await {
            let mut critical = record("keep-critical", EventLatency::Normal);
            critical.persistence = EventPersistence::Critical;
            fx.storage
                .store_records(&[record("old-normal", EventLatency::Normal), critical])
                .await
                .unwrap();

            // Push the store over budget with newer low-class records.
            let mut newer = record("new-normal-0", EventLatency::Normal);
            newer.timestamp_ms = NOW + 10;
            let mut newer2 = record("new-normal-1", EventLatency::Normal);
            newer2.timestamp_ms = NOW + 20;
            fx.storage
                .store_records(&[newer, newer2])
                .await
                .unwrap();

            let drops = fx.observer.dropped.lock().unwrap();
            assert!(!drops.is_empty(), "overflow must notify");
            // Oldest Normal goes first; the Critical record survives.
            assert_eq!(drops[0][0], "old-normal");
            drop(drops);
            let remaining = fx
                .storage
                .get_records(true, EventLatency::Unspecified, 0)
                .await
                .unwrap();
            assert!(remaining.iter().any(|r| r.id == "keep-critical"));
            assert!(fx.storage.total_bytes() <= 64);
        }
    }

    #[tokio::test]
    async fn colliding_id_replaces_and_reaccounts() {
        for fx in all_backends(u64::MAX).await {
            fx.storage
                .store_records(&[record("dup", EventLatency::Normal)])
                .await
                .unwrap();
            let before = fx.storage.total_bytes();

            let mut bigger = record("dup", EventLatency::Normal);
            bigger.blob = vec![0; 100];
            fx.storage.store_records(&[bigger]).await.unwrap();

            assert_eq!(fx.storage.get_record_count(EventLatency::Unspecified), 1);
            assert_eq!(fx.storage.total_bytes(), before + 97);
        }
    }

    #[tokio::test]
    async fn initialize_clears_dangling_reservations() {
        // Only meaningful for persistent engines: re-open the same file.
        #[cfg(feature = "sqlite")]
        {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("recover.db");
            let observer = Arc::new(RecordingObserver::default());
            let clock = ManualClock::starting_at(NOW);
            {
                let engine =
                    Arc::new(engines::SqliteEngine::open(path.to_str().unwrap()).unwrap());
                let storage = OfflineStorage::initialize(
                    engine,
                    observer.clone(),
                    clock.clone(),
                    u64::MAX,
                    5,
                )
                .await
                .unwrap();
                storage
                    .store_records(&[record("r1", EventLatency::Normal)])
                    .await
                    .unwrap();
                storage
                    .get_and_reserve_records(|_| true, 600_000, EventLatency::Unspecified, 0)
                    .await
                    .unwrap();
                assert_eq!(storage.get_record_count(EventLatency::Normal), 0);
            }
            // "Restart": a fresh orchestrator over the same file sees the
            // record available again.
            let engine =
                Arc::new(engines::SqliteEngine::open(path.to_str().unwrap()).unwrap());
            let storage =
                OfflineStorage::initialize(engine, observer.clone(), clock, u64::MAX, 5)
                    .await
                    .unwrap();
            assert_eq!(storage.get_record_count(EventLatency::Normal), 1);
            assert_eq!(observer.opened.lock().unwrap().len(), 2);
        }
    }
}
