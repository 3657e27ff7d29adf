//! Diagnostic observer: the SDK's only synchronous feedback channel.
//!
//! The pipeline never returns transport or storage errors to callers;
//! embedders that care register a [`TelemetryObserver`]. Notifications are
//! invoked on the pipeline thread and must return quickly.

use std::sync::Arc;

/// Receiver for diagnostic notifications from storage and transport.
///
/// All methods default to no-ops so implementors override only what they
/// watch. Used as `Arc<dyn TelemetryObserver>`.
pub trait TelemetryObserver: Send + Sync {
    /// Storage opened successfully; `backend` names the implementation
    /// (`"SQLite/Default"`, `"Redb/Init"`, `"Memory"`).
    fn on_storage_opened(&self, backend: &str) {
        let _ = backend;
    }

    /// Storage failed to open or perform I/O; the pipeline may have fallen
    /// back to the in-memory engine.
    fn on_storage_failed(&self, reason: &str) {
        let _ = reason;
    }

    /// Records left the store without being delivered: retry exhaustion or
    /// overflow eviction. One call covers one drop batch; ids are in drop
    /// order.
    fn on_records_dropped(&self, ids: &[String]) {
        let _ = ids;
    }

    /// The collector rejected a tenant's credentials (HTTP 401/403).
    fn on_auth_error(&self, tenant_token: &str, status_code: u16) {
        let _ = (tenant_token, status_code);
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl TelemetryObserver for NullObserver {}

/// Fans notifications out to multiple observers in registration order.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn TelemetryObserver>>,
}

impl CompositeObserver {
    /// Creates a composite over the given observers.
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn TelemetryObserver>>) -> Self {
        Self { observers }
    }

    /// Adds an observer after construction.
    pub fn add(&mut self, observer: Arc<dyn TelemetryObserver>) {
        self.observers.push(observer);
    }
}

impl TelemetryObserver for CompositeObserver {
    fn on_storage_opened(&self, backend: &str) {
        for observer in &self.observers {
            observer.on_storage_opened(backend);
        }
    }

    fn on_storage_failed(&self, reason: &str) {
        for observer in &self.observers {
            observer.on_storage_failed(reason);
        }
    }

    fn on_records_dropped(&self, ids: &[String]) {
        for observer in &self.observers {
            observer.on_records_dropped(ids);
        }
    }

    fn on_auth_error(&self, tenant_token: &str, status_code: u16) {
        for observer in &self.observers {
            observer.on_auth_error(tenant_token, status_code);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use super::TelemetryObserver;

    /// Observer that records every notification for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingObserver {
        /// Backend labels from `on_storage_opened`.
        pub opened: Mutex<Vec<String>>,
        /// Failure reasons from `on_storage_failed`.
        pub failures: Mutex<Vec<String>>,
        /// One entry per `on_records_dropped` call.
        pub dropped: Mutex<Vec<Vec<String>>>,
        /// `(tenant, status)` pairs from `on_auth_error`.
        pub auth_errors: Mutex<Vec<(String, u16)>>,
    }

    impl TelemetryObserver for RecordingObserver {
        fn on_storage_opened(&self, backend: &str) {
            self.opened.lock().unwrap().push(backend.to_string());
        }

        fn on_storage_failed(&self, reason: &str) {
            self.failures.lock().unwrap().push(reason.to_string());
        }

        fn on_records_dropped(&self, ids: &[String]) {
            self.dropped.lock().unwrap().push(ids.to_vec());
        }

        fn on_auth_error(&self, tenant_token: &str, status_code: u16) {
            self.auth_errors
                .lock()
                .unwrap()
                .push((tenant_token.to_string(), status_code));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::test_support::RecordingObserver;
    use super::*;

    #[test]
    fn composite_fans_out_in_order() {
        let a = Arc::new(RecordingObserver::default());
        let b = Arc::new(RecordingObserver::default());
        let composite = CompositeObserver::new(vec![a.clone(), b.clone()]);

        composite.on_storage_opened("Memory");
        composite.on_records_dropped(&["r1".into(), "r2".into()]);

        for observer in [&a, &b] {
            assert_eq!(*observer.opened.lock().unwrap(), vec!["Memory"]);
            assert_eq!(
                *observer.dropped.lock().unwrap(),
                vec![vec!["r1".to_string(), "r2".to_string()]]
            );
        }
    }
}
