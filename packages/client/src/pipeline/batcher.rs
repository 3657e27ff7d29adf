//! Batcher: turns reserved records into upload contexts.
//!
//! One pass reserves records in priority order (stopping at the pass-level
//! byte budget, which also bounds every batch), groups them by
//! `(tenant, latency)`, and frames one request per group by concatenating
//! the stored blobs. Package ids increase monotonically per tenant.

use std::collections::HashMap;

use ahash::RandomState;
use beacon_core::{EventLatency, EventSerializer};
use std::sync::Arc;
use uuid::Uuid;

use super::context::UploadContext;
use crate::http::{HttpHeaders, HttpRequest};
use crate::storage::{OfflineStorage, StorageRecord};

/// Batching parameters, fixed at construction.
pub struct Batcher {
    serializer: Arc<dyn EventSerializer>,
    collector_url: String,
    max_payload_bytes: usize,
    max_records_per_batch: usize,
    reservation_window_ms: u64,
    package_seq: HashMap<String, u64, RandomState>,
}

impl Batcher {
    /// Creates a batcher posting to `collector_url`.
    #[must_use]
    pub fn new(
        serializer: Arc<dyn EventSerializer>,
        collector_url: String,
        max_payload_bytes: usize,
        max_records_per_batch: usize,
        reservation_window_ms: u64,
    ) -> Self {
        Self {
            serializer,
            collector_url,
            max_payload_bytes,
            max_records_per_batch,
            reservation_window_ms,
            package_seq: HashMap::default(),
        }
    }

    /// Runs one reservation pass and builds the resulting contexts,
    /// highest latency first. `tenant_ready` vetoes tenants currently in
    /// backoff; a veto ends the pass (reservation scans stop at the first
    /// rejection).
    ///
    /// # Errors
    ///
    /// Propagates storage failures; nothing is reserved in that case.
    pub async fn build_batches<F>(
        &mut self,
        storage: &OfflineStorage,
        latency_floor: EventLatency,
        tenant_ready: F,
    ) -> anyhow::Result<Vec<UploadContext>>
    where
        F: Fn(&str) -> bool,
    {
        let mut groups: HashMap<(String, EventLatency), Vec<StorageRecord>, RandomState> =
            HashMap::default();
        let mut total_bytes = 0usize;
        let max_payload = self.max_payload_bytes;

        storage
            .get_and_reserve_records(
                |record| {
                    if !tenant_ready(&record.tenant_token) {
                        return false;
                    }
                    if total_bytes > 0 && total_bytes + record.blob.len() > max_payload {
                        return false;
                    }
                    total_bytes += record.blob.len();
                    groups
                        .entry((record.tenant_token.clone(), record.latency))
                        .or_default()
                        .push(record);
                    true
                },
                self.reservation_window_ms,
                latency_floor,
                self.max_records_per_batch,
            )
            .await?;

        let mut keyed: Vec<_> = groups.into_iter().collect();
        // Highest latency first; tenants tie-break for determinism.
        keyed.sort_by(|a, b| b.0 .1.cmp(&a.0 .1).then(a.0 .0.cmp(&b.0 .0)));

        let mut contexts = Vec::with_capacity(keyed.len());
        for ((tenant, latency), records) in keyed {
            let package_id = {
                let seq = self.package_seq.entry(tenant.clone()).or_insert(0);
                let current = *seq;
                *seq += 1;
                current
            };
            let mut body = Vec::with_capacity(records.iter().map(|r| r.blob.len()).sum());
            let mut record_ids = Vec::with_capacity(records.len());
            for record in records {
                body.extend_from_slice(&record.blob);
                record_ids.push(record.id);
            }
            let mut headers = HttpHeaders::new();
            headers.push("Content-Type", self.serializer.content_type());
            headers.push("X-ApiKey", tenant.as_str());
            headers.push("X-Package-Id", package_id.to_string());
            let request = HttpRequest {
                id: Uuid::new_v4().to_string(),
                method: "POST".to_string(),
                url: self.collector_url.clone(),
                headers,
                body,
            };
            metrics::counter!("beacon_batches_built_total").increment(1);
            contexts.push(UploadContext::new(
                tenant, latency, record_ids, package_id, request,
            ));
        }
        Ok(contexts)
    }
}
