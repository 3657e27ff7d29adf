//! Process-wide LogManager factory.
//!
//! One live instance per configuration fingerprint (`primaryToken` +
//! `config.host` + `config.scope`). Creating a duplicate fails with
//! [`OpenError::AlreadyOpen`]; releasing the fingerprint tears the
//! instance down after a graceful close.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::BeaconConfig;
use crate::error::OpenError;
use crate::manager::{LogManager, ManagerDeps};

static REGISTRY: Lazy<Mutex<HashMap<u64, Arc<LogManager>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Creates and registers a LogManager with production wiring.
///
/// # Errors
///
/// [`OpenError::AlreadyOpen`] for a duplicate fingerprint, plus whatever
/// [`LogManager::start`] reports.
pub fn create_log_manager(config: BeaconConfig) -> Result<Arc<LogManager>, OpenError> {
    create_log_manager_with(config, ManagerDeps::standard())
}

/// Creates and registers a LogManager with explicit dependencies.
///
/// # Errors
///
/// [`OpenError::AlreadyOpen`] for a duplicate fingerprint, plus whatever
/// [`LogManager::start`] reports.
pub fn create_log_manager_with(
    config: BeaconConfig,
    deps: ManagerDeps,
) -> Result<Arc<LogManager>, OpenError> {
    config.validate()?;
    let fingerprint = config.fingerprint();
    let mut registry = REGISTRY.lock();
    if registry.contains_key(&fingerprint) {
        return Err(OpenError::AlreadyOpen);
    }
    let manager = LogManager::start(config, deps)?;
    registry.insert(fingerprint, manager.clone());
    debug!(fingerprint, "log manager registered");
    Ok(manager)
}

/// Looks up a live instance by fingerprint.
#[must_use]
pub fn get_log_manager(fingerprint: u64) -> Option<Arc<LogManager>> {
    REGISTRY.lock().get(&fingerprint).cloned()
}

/// Releases the instance with this fingerprint: deregisters it and runs a
/// graceful close. Returns `false` when no such instance is live.
pub fn release_log_manager(fingerprint: u64) -> bool {
    let manager = REGISTRY.lock().remove(&fingerprint);
    match manager {
        Some(manager) => {
            manager.close();
            debug!(fingerprint, "log manager released");
            true
        }
        None => false,
    }
}

/// Number of live instances in this process.
#[must_use]
pub fn active_manager_count() -> usize {
    REGISTRY.lock().len()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::http::test_support::MockHttpClient;
    use crate::observer::NullObserver;
    use crate::platform::{ManualClock, Platform};

    fn deps() -> ManagerDeps {
        ManagerDeps {
            platform: Platform::manual(ManualClock::starting_at(0)),
            http_client: Arc::new(MockHttpClient::with_status(200)),
            serializer: Arc::new(beacon_core::MsgPackSerializer),
            observer: Arc::new(NullObserver),
        }
    }

    #[test]
    fn duplicate_fingerprint_is_rejected() {
        let config = BeaconConfig::for_token("factory-dup-token");
        let fingerprint = config.fingerprint();
        let _manager = create_log_manager_with(config.clone(), deps()).unwrap();

        assert!(matches!(
            create_log_manager_with(config, deps()),
            Err(OpenError::AlreadyOpen)
        ));
        assert!(release_log_manager(fingerprint));
    }

    #[test]
    fn release_allows_reopening() {
        let config = BeaconConfig::for_token("factory-reopen-token");
        let fingerprint = config.fingerprint();

        let first = create_log_manager_with(config.clone(), deps()).unwrap();
        assert!(release_log_manager(fingerprint));
        assert!(first.is_closed());
        assert!(!release_log_manager(fingerprint));

        let second = create_log_manager_with(config, deps()).unwrap();
        assert!(get_log_manager(fingerprint).is_some());
        assert!(release_log_manager(fingerprint));
        drop(second);
    }

    #[test]
    fn distinct_tokens_coexist() {
        let a = BeaconConfig::for_token("factory-co-a");
        let b = BeaconConfig::for_token("factory-co-b");
        let fa = a.fingerprint();
        let fb = b.fingerprint();
        let _ma = create_log_manager_with(a, deps()).unwrap();
        let _mb = create_log_manager_with(b, deps()).unwrap();
        assert_ne!(fa, fb);
        assert!(release_log_manager(fa));
        assert!(release_log_manager(fb));
    }
}
