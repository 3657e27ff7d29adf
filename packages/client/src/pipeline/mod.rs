//! The upload pipeline: a single worker task owning storage, the batcher,
//! and the response controller.
//!
//! One `select!` loop drains the inbound queue into storage, runs upload
//! passes on a timer (or on demand), and applies transport responses:
//! delete on success, release-and-back-off on retriable failure, drop on
//! poison, pause on auth rejection. Everything stateful lives on this one
//! task; the rest of the SDK only sends it messages.

pub mod backoff;
pub mod batcher;
pub mod context;
pub mod inbound;

use std::collections::{HashSet, VecDeque};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::time::Duration;

use ahash::RandomState;
use beacon_core::EventLatency;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub use backoff::{parse_retry_after, BackoffPolicy, TenantBackoff};
pub use batcher::Batcher;
pub use context::UploadContext;
pub use inbound::InboundQueue;

use crate::config::BeaconConfig;
use crate::http::manager::HttpClientManager;
use crate::http::HttpResult;
use crate::observer::TelemetryObserver;
use crate::platform::Clock;
use crate::storage::engines::MemoryEngine;
use crate::storage::{OfflineStorage, StorageRecord};

/// How many queued events one loop iteration moves into storage.
const INBOUND_BATCH: usize = 128;

/// Control messages from the façade to the worker.
#[derive(Debug)]
pub enum ControlCommand {
    /// Stop producing new upload batches; in-flight requests drain.
    Pause,
    /// Resume batching and forget auth pauses and backoff state.
    Resume,
    /// Run an upload pass now, ahead of the idle timer.
    UploadNow,
    /// Ack `true` once the pipeline is quiescent.
    Flush(SyncSender<bool>),
    /// Graceful shutdown; ack when storage is closed.
    Close(SyncSender<()>),
}

/// The pipeline worker. Constructed and run on the dedicated worker
/// thread's runtime; owns every piece of upload state.
pub struct PipelineWorker {
    config: Arc<BeaconConfig>,
    storage: OfflineStorage,
    batcher: Batcher,
    backoff: TenantBackoff,
    hcm: HttpClientManager,
    inbound: Arc<InboundQueue>,
    control_rx: mpsc::Receiver<ControlCommand>,
    done_rx: mpsc::Receiver<UploadContext>,
    observer: Arc<dyn TelemetryObserver>,
    clock: Arc<dyn Clock>,
    paused: bool,
    closing: bool,
    in_flight: usize,
    active_pairs: HashSet<(String, EventLatency), RandomState>,
    pending: VecDeque<UploadContext>,
    flush_waiters: Vec<SyncSender<bool>>,
}

impl PipelineWorker {
    /// Wires the worker together.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<BeaconConfig>,
        storage: OfflineStorage,
        batcher: Batcher,
        hcm: HttpClientManager,
        inbound: Arc<InboundQueue>,
        control_rx: mpsc::Receiver<ControlCommand>,
        done_rx: mpsc::Receiver<UploadContext>,
        observer: Arc<dyn TelemetryObserver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            storage,
            batcher,
            backoff: TenantBackoff::new(BackoffPolicy::default()),
            hcm,
            inbound,
            control_rx,
            done_rx,
            observer,
            clock,
            paused: false,
            closing: false,
            in_flight: 0,
            active_pairs: HashSet::default(),
            pending: VecDeque::new(),
            flush_waiters: Vec::new(),
        }
    }

    /// Runs until closed. Consumes the worker.
    pub async fn run(mut self) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.upload_interval_ms.max(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(name = %self.config.name, "pipeline worker started");
        loop {
            tokio::select! {
                batch = self.inbound.pop_batch(INBOUND_BATCH) => {
                    if !batch.is_empty() {
                        self.store_records(&batch).await;
                    }
                }
                cmd = self.control_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.handle_control(cmd).await {
                                break;
                            }
                        }
                        None => {
                            // Façade dropped without Close: shut down anyway.
                            self.shutdown().await;
                            break;
                        }
                    }
                }
                Some(ctx) = self.done_rx.recv() => {
                    self.on_request_done(ctx).await;
                }
                _ = ticker.tick() => {
                    self.upload_pass().await;
                }
            }
            self.dispatch_pending().await;
            self.check_flush_waiters();
        }
        info!(name = %self.config.name, "pipeline worker stopped");
    }

    /// Persists a batch of inbound records, retrying once and then
    /// swapping in a fresh in-memory store so ingestion keeps working.
    /// Records already on disk stay there for the next process run.
    async fn store_records(&mut self, records: &[StorageRecord]) {
        let Err(first) = self.storage.store_records(records).await else {
            return;
        };
        warn!(error = %first, "store failed, retrying once");
        let Err(second) = self.storage.store_records(records).await else {
            return;
        };
        error!(error = %second, "store failed twice, falling back to memory");
        self.observer.on_storage_failed(&second.to_string());
        match OfflineStorage::initialize(
            Arc::new(MemoryEngine::new()),
            self.observer.clone(),
            self.clock.clone(),
            self.config.max_storage_size_bytes,
            self.config.max_retry_count,
        )
        .await
        {
            Ok(memory) => {
                self.storage = memory;
                if let Err(e) = self.storage.store_records(records).await {
                    error!(error = %e, "in-memory store failed, batch lost");
                }
            }
            Err(e) => error!(error = %e, "in-memory fallback failed, batch lost"),
        }
    }

    async fn handle_control(&mut self, cmd: ControlCommand) -> bool {
        match cmd {
            ControlCommand::Pause => {
                debug!("transmission paused");
                self.paused = true;
            }
            ControlCommand::Resume => {
                debug!("transmission resumed");
                self.paused = false;
                self.backoff.clear_all();
                self.upload_pass().await;
            }
            ControlCommand::UploadNow => {
                self.upload_pass().await;
            }
            ControlCommand::Flush(ack) => {
                self.flush_waiters.push(ack);
            }
            ControlCommand::Close(ack) => {
                self.shutdown().await;
                let _ = ack.try_send(());
                return true;
            }
        }
        false
    }

    /// One batching pass: reserve, group, queue for dispatch.
    async fn upload_pass(&mut self) {
        if self.paused || self.closing {
            return;
        }
        let now = self.clock.now_ms();
        let backoff = &self.backoff;
        match self
            .batcher
            .build_batches(&self.storage, EventLatency::Normal, |tenant| {
                backoff.is_ready(tenant, now)
            })
            .await
        {
            Ok(contexts) => self.pending.extend(contexts),
            Err(e) => warn!(error = %e, "batching pass failed"),
        }
    }

    /// Moves queued contexts into flight, honoring the concurrency cap and
    /// one-in-flight-per-pair sequencing. Contexts whose tenant fell into
    /// backoff after batching give their records back instead of waiting.
    async fn dispatch_pending(&mut self) {
        if self.paused && !self.closing {
            return;
        }
        let now = self.clock.now_ms();
        let mut requeue = VecDeque::new();
        while let Some(ctx) = self.pending.pop_front() {
            if self.in_flight >= self.config.max_concurrent_uploads {
                requeue.push_back(ctx);
                continue;
            }
            let pair = ctx.pair();
            if self.active_pairs.contains(&pair) {
                requeue.push_back(ctx);
                continue;
            }
            if !self.backoff.is_ready(&ctx.tenant_token, now) {
                if let Err(e) = self
                    .storage
                    .release_records(&ctx.record_ids, false, None)
                    .await
                {
                    warn!(error = %e, "release of deferred batch failed");
                }
                continue;
            }
            self.active_pairs.insert(pair);
            self.in_flight += 1;
            self.hcm.send_request(ctx);
        }
        self.pending = requeue;
    }

    /// Applies a completed upload per the retry decision table.
    async fn on_request_done(&mut self, ctx: UploadContext) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.active_pairs.remove(&ctx.pair());

        let tenant = ctx.tenant_token.clone();
        let ids = ctx.record_ids;
        let now = self.clock.now_ms();
        let Some(response) = ctx.http_response else {
            // Defensive: treat a response-less completion as aborted.
            let _ = self.storage.release_records(&ids, false, None).await;
            return;
        };
        let status = response.status_code;
        let retry_after = parse_retry_after(&response.headers, now);

        if response.result == HttpResult::Aborted {
            debug!(tenant = %tenant, records = ids.len(), "upload aborted");
            metrics::counter!("beacon_uploads_aborted_total").increment(1);
            if let Err(e) = self.storage.release_records(&ids, false, retry_after).await {
                warn!(error = %e, "release after abort failed");
            }
        } else if response.result == HttpResult::Ok && (200..300).contains(&status) {
            debug!(tenant = %tenant, records = ids.len(), duration_ms = ctx.duration_ms, "upload ok");
            metrics::counter!("beacon_uploads_ok_total").increment(1);
            metrics::counter!("beacon_records_uploaded_total").increment(ids.len() as u64);
            if let Err(e) = self.storage.delete_records(&ids).await {
                warn!(error = %e, "delete after success failed");
            }
            self.backoff.on_success(&tenant);
        } else if status == 401 || status == 403 {
            warn!(tenant = %tenant, status, "collector rejected credentials, pausing tenant");
            metrics::counter!("beacon_uploads_auth_failed_total").increment(1);
            if let Err(e) = self.storage.release_records(&ids, true, retry_after).await {
                warn!(error = %e, "release after auth failure failed");
            }
            self.observer.on_auth_error(&tenant, status);
            self.backoff.pause(&tenant);
        } else if response.result == HttpResult::Ok
            && (400..500).contains(&status)
            && status != 408
            && status != 429
        {
            // Permanent rejection: the payload is poisoned, drop it.
            warn!(tenant = %tenant, status, records = ids.len(), "payload rejected, dropping");
            metrics::counter!("beacon_uploads_poisoned_total").increment(1);
            if let Err(e) = self.storage.delete_records(&ids).await {
                warn!(error = %e, "delete of poisoned records failed");
            }
        } else {
            // Retriable: 408/429/5xx, network or local failure, odd 1xx/3xx.
            if let Some(ms) = retry_after {
                self.backoff.set_retry_after(&tenant, ms);
            }
            if let Err(e) = self.storage.release_records(&ids, true, retry_after).await {
                warn!(error = %e, "release after failure failed");
            }
            let delay_ms = self.backoff.on_failure(&tenant, now);
            debug!(tenant = %tenant, status, delay_ms, "upload failed, backing off");
            metrics::counter!("beacon_uploads_retried_total").increment(1);
        }

        if !self.closing {
            // Re-arm the batcher: capacity freed up.
            self.upload_pass().await;
        }
    }

    /// Nothing queued, nothing pending, nothing in flight.
    fn quiescent(&self) -> bool {
        self.in_flight == 0 && self.pending.is_empty() && self.inbound.is_empty()
    }

    fn check_flush_waiters(&mut self) {
        if self.flush_waiters.is_empty() || !self.quiescent() {
            return;
        }
        for waiter in self.flush_waiters.drain(..) {
            let _ = waiter.try_send(true);
        }
    }

    /// Graceful shutdown: drain the inbound queue to storage, cancel
    /// uploads, apply their aborted completions, close the backend.
    async fn shutdown(&mut self) {
        self.closing = true;
        self.inbound.close();
        loop {
            let batch = self.inbound.pop_batch(INBOUND_BATCH).await;
            if batch.is_empty() {
                break;
            }
            self.store_records(&batch).await;
        }
        self.hcm.cancel_all_requests();
        while self.in_flight > 0 {
            match tokio::time::timeout(Duration::from_secs(2), self.done_rx.recv()).await {
                Ok(Some(ctx)) => self.on_request_done(ctx).await,
                _ => break,
            }
        }
        for waiter in self.flush_waiters.drain(..) {
            let _ = waiter.try_send(true);
        }
        if let Err(e) = self.storage.shutdown().await {
            warn!(error = %e, "storage shutdown failed");
        }
    }
}
