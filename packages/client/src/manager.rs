//! LogManager façade: the public, thread-safe surface of one SDK instance.
//!
//! A LogManager owns one pipeline worker thread (a current-thread tokio
//! runtime driving [`PipelineWorker`](crate::pipeline::PipelineWorker)),
//! the host semantic context, and a table of loggers keyed by
//! `(tenant, source, scope)`. Every public method either enqueues onto
//! the inbound queue or signals the worker and returns; nothing here
//! blocks on the network.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use beacon_core::{
    is_valid_name, ContextScope, EventLatency, EventProperties, EventProperty, EventSerializer,
    SemanticContext, WireEvent,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::BeaconConfig;
use crate::enrich::{
    CommonFieldsDecorator, DataInspectorDecorator, DecoratorChain, SemanticContextDecorator,
};
use crate::error::{LogEventError, OpenError};
use crate::http::manager::HttpClientManager;
use crate::http::HttpClient;
use crate::observer::{NullObserver, TelemetryObserver};
use crate::pipeline::{Batcher, ControlCommand, InboundQueue, PipelineWorker};
use crate::platform::{Clock, Platform};
use crate::storage::{factory as storage_factory, StorageRecord};

/// Everything a LogManager needs injected. Tests swap in fakes; embedders
/// mostly use [`ManagerDeps::standard`].
pub struct ManagerDeps {
    /// Clock and friends.
    pub platform: Platform,
    /// Upload transport.
    pub http_client: Arc<dyn HttpClient>,
    /// Wire codec.
    pub serializer: Arc<dyn EventSerializer>,
    /// Diagnostic sink.
    pub observer: Arc<dyn TelemetryObserver>,
}

impl ManagerDeps {
    /// Production wiring: system clock, MessagePack codec, the compiled
    /// transport (reqwest when available, otherwise a refusing stub).
    #[must_use]
    pub fn standard() -> Self {
        #[cfg(feature = "reqwest-client")]
        let http_client: Arc<dyn HttpClient> =
            match crate::http::reqwest_client::ReqwestHttpClient::new() {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    error!(error = %e, "transport init failed, uploads disabled");
                    Arc::new(crate::http::NoopHttpClient)
                }
            };
        #[cfg(not(feature = "reqwest-client"))]
        let http_client: Arc<dyn HttpClient> = Arc::new(crate::http::NoopHttpClient);

        Self {
            platform: Platform::system(),
            http_client,
            serializer: Arc::new(beacon_core::MsgPackSerializer),
            observer: Arc::new(NullObserver),
        }
    }
}

/// State shared between the manager and its loggers.
struct ManagerShared {
    config: Arc<BeaconConfig>,
    inbound: Arc<InboundQueue>,
    serializer: Arc<dyn EventSerializer>,
    clock: Arc<dyn Clock>,
    record_seq: AtomicU64,
    closed: AtomicBool,
}

type LoggerKey = (String, String, ContextScope);

/// One SDK instance.
pub struct LogManager {
    shared: Arc<ManagerShared>,
    host_context: Arc<RwLock<SemanticContext>>,
    loggers: DashMap<LoggerKey, Arc<Logger>>,
    control_tx: mpsc::Sender<ControlCommand>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl LogManager {
    /// Validates the configuration and starts the pipeline worker.
    ///
    /// Prefer [`crate::factory::create_log_manager`], which also enforces
    /// per-process instance uniqueness.
    ///
    /// # Errors
    ///
    /// Configuration problems map to [`OpenError::Config`]; a worker
    /// thread that cannot start maps to [`OpenError::Worker`].
    pub fn start(config: BeaconConfig, deps: ManagerDeps) -> Result<Arc<Self>, OpenError> {
        config.validate()?;
        let config = Arc::new(config);
        let clock = deps.platform.clock.clone();

        let inbound = Arc::new(InboundQueue::new(
            config.max_inbound_events,
            config.inbound_overflow_policy,
        ));
        let (control_tx, control_rx) = mpsc::channel(32);
        let (done_tx, done_rx) = mpsc::channel(config.max_concurrent_uploads * 2);

        let worker = {
            let config = config.clone();
            let inbound = inbound.clone();
            let clock = clock.clone();
            let observer = deps.observer;
            let http_client = deps.http_client;
            let serializer = deps.serializer.clone();
            std::thread::Builder::new()
                .name("beacon-pipeline".to_string())
                .spawn(move || {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build();
                    let runtime = match runtime {
                        Ok(rt) => rt,
                        Err(e) => {
                            error!(error = %e, "pipeline runtime failed to start");
                            return;
                        }
                    };
                    runtime.block_on(async move {
                        let storage = match storage_factory::open_storage(
                            &config,
                            observer.clone(),
                            clock.clone(),
                        )
                        .await
                        {
                            Ok(storage) => storage,
                            Err(e) => {
                                error!(error = %e, "offline storage failed to open");
                                return;
                            }
                        };
                        let batcher = Batcher::new(
                            serializer,
                            config.collector_url.clone(),
                            config.max_payload_bytes,
                            config.max_records_per_batch,
                            config.reservation_window_ms,
                        );
                        let hcm = HttpClientManager::new(http_client, clock.clone(), done_tx);
                        PipelineWorker::new(
                            config, storage, batcher, hcm, inbound, control_rx, done_rx,
                            observer, clock,
                        )
                        .run()
                        .await;
                    });
                })
                .map_err(|e| OpenError::Worker(e.to_string()))?
        };

        Ok(Arc::new(Self {
            shared: Arc::new(ManagerShared {
                config,
                inbound,
                serializer: deps.serializer,
                clock,
                record_seq: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
            host_context: Arc::new(RwLock::new(SemanticContext::new())),
            loggers: DashMap::new(),
            control_tx,
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// This instance's configuration.
    #[must_use]
    pub fn config(&self) -> &BeaconConfig {
        &self.shared.config
    }

    /// Returns (memoizing) the logger for `(token, source, scope)`. An
    /// empty token selects the configured primary token.
    #[must_use]
    pub fn get_logger(
        &self,
        tenant_token: &str,
        source: &str,
        scope: ContextScope,
    ) -> Arc<Logger> {
        let token = if tenant_token.is_empty() {
            self.shared.config.primary_token.as_str()
        } else {
            tenant_token
        };
        let key = (token.to_string(), source.to_string(), scope);
        self.loggers
            .entry(key)
            .or_insert_with(|| {
                let context = Arc::new(RwLock::new(SemanticContext::new()));
                let inspector = Arc::new(DataInspectorDecorator::new(token));
                let chain = DecoratorChain::new(vec![
                    Arc::new(CommonFieldsDecorator::new(
                        token,
                        source,
                        self.shared.clock.clone(),
                    )),
                    Arc::new(SemanticContextDecorator::new(
                        self.host_context.clone(),
                        context.clone(),
                        scope,
                    )),
                    inspector.clone(),
                ]);
                Arc::new(Logger {
                    tenant_token: token.to_string(),
                    source: source.to_string(),
                    scope,
                    context,
                    inspector,
                    chain,
                    shared: self.shared.clone(),
                })
            })
            .clone()
    }

    /// The default logger: primary token, no source, configured scope.
    #[must_use]
    pub fn logger(&self) -> Arc<Logger> {
        self.get_logger("", "", self.shared.config.scope())
    }

    /// Logs an event through the default logger.
    ///
    /// # Errors
    ///
    /// See [`Logger::log_event`].
    pub fn log_event(&self, event: EventProperties) -> Result<(), LogEventError> {
        self.logger().log_event(event)
    }

    /// Sets a host-level semantic context value, visible to every logger
    /// whose scope merges the host context.
    ///
    /// # Errors
    ///
    /// Rejects keys that fail property-name validation.
    pub fn set_context(
        &self,
        key: &str,
        value: impl Into<EventProperty>,
    ) -> Result<(), LogEventError> {
        if !is_valid_name(key) {
            return Err(LogEventError::InvalidEvent(
                beacon_core::EventError::InvalidPropertyName(key.to_string()),
            ));
        }
        self.host_context.write().set(key, value);
        Ok(())
    }

    /// Stops producing upload batches; queued records stay put and
    /// in-flight requests drain naturally.
    pub fn pause_transmission(&self) {
        self.send_control(ControlCommand::Pause);
    }

    /// Resumes batching and clears per-tenant backoff and auth pauses.
    pub fn resume_transmission(&self) {
        self.send_control(ControlCommand::Resume);
    }

    /// Asks the pipeline for an upload pass ahead of the idle timer.
    pub fn upload_now(&self) {
        self.send_control(ControlCommand::UploadNow);
    }

    /// Blocks up to `flushTimeoutMs` until the pipeline is quiescent
    /// (inbound queue drained, no batches pending or in flight). Returns
    /// `false` on timeout. Safe to call repeatedly.
    #[must_use]
    pub fn flush(&self) -> bool {
        let (ack_tx, ack_rx) = std_mpsc::sync_channel(1);
        if !self.send_control(ControlCommand::Flush(ack_tx)) {
            return false;
        }
        let timeout = Duration::from_millis(self.shared.config.flush_timeout_ms);
        ack_rx.recv_timeout(timeout).unwrap_or(false)
    }

    /// Graceful teardown: flush, cancel in-flight uploads, close storage,
    /// join the worker. Pending records remain on disk for the next run.
    /// Idempotent; called automatically on drop.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(name = %self.shared.config.name, "closing log manager");
        let _ = self.flush();
        let (ack_tx, ack_rx) = std_mpsc::sync_channel(1);
        if self.send_control(ControlCommand::Close(ack_tx)) {
            let timeout =
                Duration::from_millis(self.shared.config.flush_timeout_ms.saturating_add(5_000));
            if ack_rx.recv_timeout(timeout).is_err() {
                warn!("pipeline close timed out");
            }
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("pipeline worker panicked");
            }
        }
    }

    /// `true` once [`close`](Self::close) has begun.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn send_control(&self, cmd: ControlCommand) -> bool {
        let mut cmd = cmd;
        // The control channel is small but the worker drains it quickly;
        // bounded retry instead of blocking so async callers never wedge.
        for _ in 0..100 {
            match self.control_tx.try_send(cmd) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Full(back)) => {
                    cmd = back;
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
        }
        warn!("control channel congested, command dropped");
        false
    }
}

impl Drop for LogManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// Produces events under one `(tenant, source, scope)` triple.
pub struct Logger {
    tenant_token: String,
    source: String,
    scope: ContextScope,
    context: Arc<RwLock<SemanticContext>>,
    inspector: Arc<DataInspectorDecorator>,
    chain: DecoratorChain,
    shared: Arc<ManagerShared>,
}

impl Logger {
    /// The tenant token this logger bills to.
    #[must_use]
    pub fn tenant_token(&self) -> &str {
        &self.tenant_token
    }

    /// The source string stamped on this logger's events.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// This logger's context scope.
    #[must_use]
    pub fn scope(&self) -> ContextScope {
        self.scope
    }

    /// The logger's data inspector, for registering custom rules.
    #[must_use]
    pub fn inspector(&self) -> &Arc<DataInspectorDecorator> {
        &self.inspector
    }

    /// Sets a per-logger semantic context value.
    ///
    /// # Errors
    ///
    /// Rejects keys that fail property-name validation.
    pub fn set_context(
        &self,
        key: &str,
        value: impl Into<EventProperty>,
    ) -> Result<(), LogEventError> {
        if !is_valid_name(key) {
            return Err(LogEventError::InvalidEvent(
                beacon_core::EventError::InvalidPropertyName(key.to_string()),
            ));
        }
        self.context.write().set(key, value);
        Ok(())
    }

    /// Enriches, serializes, and enqueues one event.
    ///
    /// Submission order from one logger is preserved through the queue and
    /// storage. Only queue overflow and closure are surfaced; transport
    /// and storage failures are observable via the diagnostic observer.
    ///
    /// # Errors
    ///
    /// [`LogEventError::InboundQueueFull`] under sustained overload with
    /// the `Block` policy, [`LogEventError::Closed`] after close.
    pub fn log_event(&self, event: EventProperties) -> Result<(), LogEventError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(LogEventError::Closed);
        }
        metrics::counter!("beacon_events_logged_total").increment(1);

        let mut event = event;
        if event.pop_sample < 100.0 {
            let draw: f64 = rand::Rng::random_range(&mut rand::rng(), 0.0..100.0);
            if draw >= event.pop_sample {
                metrics::counter!("beacon_events_sampled_out_total").increment(1);
                return Ok(());
            }
        }
        if !self.chain.decorate(&mut event) {
            return Ok(());
        }
        let latency = event.effective_latency();
        if latency == EventLatency::Off {
            return Ok(());
        }
        let persistence = event.persistence;
        let wire = WireEvent {
            tenant_token: self.tenant_token.clone(),
            latency,
            persistence,
            event,
        };
        let blob = match self.shared.serializer.serialize(&wire) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(event = wire.event.name(), error = %e, "event not serializable, dropped");
                metrics::counter!("beacon_events_unserializable_total").increment(1);
                return Ok(());
            }
        };
        let seq = self.shared.record_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("{seq:016x}-{}", Uuid::new_v4());
        let record = StorageRecord::new(
            id,
            self.tenant_token.clone(),
            latency,
            persistence,
            wire.event.timestamp_ms,
            blob,
        );
        self.shared.inbound.push(
            record,
            Duration::from_millis(self.shared.config.log_event_timeout_ms),
        )
    }
}
