//! Runtime configuration for a LogManager instance.
//!
//! Parsed from JSON (the same document the C-style facade accepts) or
//! synthesized from a bare tenant token. Field names are camelCase on the
//! wire; unknown keys are ignored so embedders can ship forward-compatible
//! configs.

use beacon_core::{combine_hashes, fnv1a_hash, ContextScope};
use serde::Deserialize;

use crate::error::ConfigError;

/// Default collector endpoint.
pub const DEFAULT_COLLECTOR_URL: &str = "https://collector.beacon.dev/v2/track";

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_collector_url() -> String {
    DEFAULT_COLLECTOR_URL.to_string()
}

fn default_max_storage_size_bytes() -> u64 {
    3 * 1024 * 1024
}

fn default_max_retry_count() -> u16 {
    5
}

fn default_max_payload_bytes() -> usize {
    512 * 1024
}

fn default_flush_timeout_ms() -> u64 {
    10_000
}

fn default_upload_interval_ms() -> u64 {
    2_000
}

fn default_max_inbound_events() -> usize {
    2_048
}

fn default_log_event_timeout_ms() -> u64 {
    500
}

fn default_max_concurrent_uploads() -> usize {
    4
}

fn default_max_records_per_batch() -> usize {
    500
}

fn default_reservation_window_ms() -> u64 {
    120_000
}

/// Which storage engine backs the offline queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Embedded SQL engine (rusqlite).
    Sqlite,
    /// Embedded key-value engine (redb).
    Redb,
    /// Volatile in-memory queue; settings are not persisted.
    Memory,
}

/// What `log_event` does when the inbound queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InboundOverflowPolicy {
    /// Wait up to `logEventTimeoutMs`, then fail with `InboundQueueFull`.
    #[default]
    Block,
    /// Evict the oldest queued event to make room; never blocks.
    DropOldest,
}

/// Host/scope sub-object (`"config"` in the JSON document).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleConfig {
    /// `"*"` claims the host role; anything else names a guest module.
    pub host: String,
    /// Context scope string, parsed via [`ContextScope::parse`].
    pub scope: String,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            host: "*".to_string(),
            scope: "CONTEXT_SCOPE_ALL".to_string(),
        }
    }
}

/// Full runtime configuration of one LogManager.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconConfig {
    /// Module name, used in diagnostics.
    #[serde(default)]
    pub name: String,
    /// Module version string.
    #[serde(default = "default_version")]
    pub version: String,
    /// Default tenant token events are billed under.
    #[serde(default)]
    pub primary_token: String,
    /// Host/scope block.
    #[serde(default)]
    pub config: ModuleConfig,
    /// On-disk store path; empty selects the in-memory engine.
    #[serde(default)]
    pub cache_file_path: String,
    /// HTTPS collector endpoint.
    #[serde(default = "default_collector_url")]
    pub collector_url: String,
    /// Offline storage overflow threshold in bytes.
    #[serde(default = "default_max_storage_size_bytes")]
    pub max_storage_size_bytes: u64,
    /// Per-record retry cap; exceeding it drops the record.
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u16,
    /// Upper bound on one upload payload.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// How long `flush` waits for quiescence.
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    /// Idle timer period for upload passes.
    #[serde(default = "default_upload_interval_ms")]
    pub upload_interval_ms: u64,
    /// Capacity of the inbound event queue.
    #[serde(default = "default_max_inbound_events")]
    pub max_inbound_events: usize,
    /// How long `log_event` may wait for queue space under `Block`.
    #[serde(default = "default_log_event_timeout_ms")]
    pub log_event_timeout_ms: u64,
    /// Behavior when the inbound queue is full.
    #[serde(default)]
    pub inbound_overflow_policy: InboundOverflowPolicy,
    /// Maximum parallel upload requests across tenant/latency pairs.
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
    /// Maximum records reserved into one batching pass.
    #[serde(default = "default_max_records_per_batch")]
    pub max_records_per_batch: usize,
    /// How long a reservation shields a record from re-batching.
    #[serde(default = "default_reservation_window_ms")]
    pub reservation_window_ms: u64,
    /// Explicit backend selection; `None` resolves from the path and the
    /// compiled features.
    #[serde(default)]
    pub storage_backend: Option<StorageBackend>,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("all fields defaulted")
    }
}

impl BeaconConfig {
    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MalformedJson`] for unparseable input and
    /// whatever [`validate`](Self::validate) reports for bad field values.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration the C-style facade synthesizes for a bare
    /// tenant token: guest scope, no host context access, derived name.
    #[must_use]
    pub fn from_token(token: &str, handle: u64) -> Self {
        let mut config = Self::default();
        config.name = format!("capi-client-{handle}");
        config.primary_token = token.to_string();
        config.config.host = "*".to_string();
        config.config.scope = "CONTEXT_SCOPE_NONE".to_string();
        config
    }

    /// Convenience constructor for in-process embedders.
    #[must_use]
    pub fn for_token(token: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.primary_token = token.into();
        config
    }

    /// Checks cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingToken`] when no tenant token is set
    /// and [`ConfigError::InvalidValue`] for out-of-range numerics.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary_token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.collector_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue("collectorUrl is empty".into()));
        }
        if self.max_inbound_events == 0 {
            return Err(ConfigError::InvalidValue(
                "maxInboundEvents must be positive".into(),
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "maxPayloadBytes must be positive".into(),
            ));
        }
        if self.max_concurrent_uploads == 0 {
            return Err(ConfigError::InvalidValue(
                "maxConcurrentUploads must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The parsed context scope.
    #[must_use]
    pub fn scope(&self) -> ContextScope {
        ContextScope::parse(&self.config.scope)
    }

    /// `true` when this instance claims the host role.
    #[must_use]
    pub fn is_host(&self) -> bool {
        self.config.host == "*"
    }

    /// Identity of this instance: FNV-1a over token, host, and scope.
    /// Two configs with the same fingerprint would collide in the factory.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let hash = fnv1a_hash(self.primary_token.as_bytes());
        let hash = combine_hashes(hash, self.config.host.as_bytes());
        combine_hashes(hash, self.config.scope.as_bytes())
    }
}
