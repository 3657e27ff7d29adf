//! Public error types for the client crate.
//!
//! Internal layers (storage engines, pipeline internals) use `anyhow` and
//! stay inside the crate; these enums are the errors embedders see.

use beacon_core::event::EventError;

/// Configuration rejected at parse or validation time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration JSON could not be parsed.
    #[error("malformed configuration JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
    /// No tenant token was provided.
    #[error("missing primary tenant token")]
    MissingToken,
    /// A field value is out of range or inconsistent.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Why `log_event` did not enqueue an event.
///
/// Transport and storage problems are never surfaced here; they are
/// observable only through the diagnostic observer.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum LogEventError {
    /// The bounded inbound queue stayed full for the configured wait.
    #[error("inbound event queue is full")]
    InboundQueueFull,
    /// The event failed validation.
    #[error(transparent)]
    InvalidEvent(#[from] EventError),
    /// The manager has been closed.
    #[error("log manager is closed")]
    Closed,
}

/// Why the factory refused to create a LogManager.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// An instance with the same configuration fingerprint is already live.
    #[error("a log manager with this configuration is already open")]
    AlreadyOpen,
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The worker could not be started.
    #[error("failed to start pipeline worker: {0}")]
    Worker(String),
}
