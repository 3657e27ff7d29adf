//! Record types for the offline storage layer.

use beacon_core::{EventLatency, EventPersistence};
use serde::{Deserialize, Serialize};

/// Opaque unique record identifier. Generated so that lexicographic order
/// follows creation order (zero-padded sequence prefix + uuid suffix).
pub type RecordId = String;

/// A serialized event awaiting upload.
///
/// `reserved_until == 0` means available; a positive value is the epoch
/// millisecond until which the record is claimed by an in-flight upload.
/// Reservations live only in the orchestrator's index: a process restart
/// implicitly clears them, which is exactly the recovery contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRecord {
    /// Unique id; colliding inserts replace the prior record.
    pub id: RecordId,
    /// Tenant the event is billed under.
    pub tenant_token: String,
    /// Scheduling class; decides upload order.
    pub latency: EventLatency,
    /// Durability class; decides eviction order.
    pub persistence: EventPersistence,
    /// Submission time in epoch milliseconds.
    pub timestamp_ms: u64,
    /// Opaque serialized event bytes.
    pub blob: Vec<u8>,
    /// Failed-upload count; only ever increments.
    pub retry_count: u16,
    /// Reservation deadline in epoch milliseconds; 0 = available.
    pub reserved_until: u64,
}

impl StorageRecord {
    /// Creates an available record with zero retries.
    #[must_use]
    pub fn new(
        id: impl Into<RecordId>,
        tenant_token: impl Into<String>,
        latency: EventLatency,
        persistence: EventPersistence,
        timestamp_ms: u64,
        blob: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_token: tenant_token.into(),
            latency,
            persistence,
            timestamp_ms,
            blob,
            retry_count: 0,
            reserved_until: 0,
        }
    }

    /// Approximate storage cost: blob plus id and token text.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        (self.blob.len() + self.id.len() + self.tenant_token.len()) as u64
    }
}

/// Index entry: everything the orchestrator tracks about a record except
/// its blob. Kept in memory for the whole store so selection, accounting,
/// and eviction never touch the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMeta {
    /// Record id.
    pub id: RecordId,
    /// Tenant token.
    pub tenant_token: String,
    /// Scheduling class.
    pub latency: EventLatency,
    /// Durability class.
    pub persistence: EventPersistence,
    /// Submission time.
    pub timestamp_ms: u64,
    /// Storage cost in bytes (blob + key text).
    pub size_bytes: u64,
    /// Failed-upload count.
    pub retry_count: u16,
    /// Reservation deadline; 0 = available.
    pub reserved_until: u64,
}

impl From<&StorageRecord> for RecordMeta {
    fn from(record: &StorageRecord) -> Self {
        Self {
            id: record.id.clone(),
            tenant_token: record.tenant_token.clone(),
            latency: record.latency,
            persistence: record.persistence,
            timestamp_ms: record.timestamp_ms,
            size_bytes: record.size_bytes(),
            retry_count: record.retry_count,
            reserved_until: record.reserved_until,
        }
    }
}

impl RecordMeta {
    /// `true` when the record can be handed to a new reservation.
    #[must_use]
    pub fn is_available(&self, now_ms: u64) -> bool {
        self.reserved_until == 0 || self.reserved_until <= now_ms
    }
}
