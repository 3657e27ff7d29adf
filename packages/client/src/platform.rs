//! Platform capability: the clock the SDK schedules by.
//!
//! Every component that needs wall-clock time receives an injected
//! [`Clock`] instead of calling the OS directly, so tests can drive time
//! deterministically with [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock source, in milliseconds since the Unix epoch.
///
/// Used as `Arc<dyn Clock>`.
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_ms(&self) -> u64;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        // Millisecond epoch timestamps fit in u64 for any realistic date.
        #[allow(clippy::cast_possible_truncation)]
        {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64
        }
    }
}

/// A clock tests can set and advance by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Creates a manual clock starting at the given epoch milliseconds.
    #[must_use]
    pub fn starting_at(millis: u64) -> Arc<Self> {
        let clock = Self::default();
        clock.millis.store(millis, Ordering::SeqCst);
        Arc::new(clock)
    }

    /// Moves the clock forward.
    pub fn advance_ms(&self, delta: u64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time.
    pub fn set_ms(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Bundle of platform capabilities handed to the pipeline.
///
/// Small today (just the clock); network and filesystem probes would slot
/// in here rather than as process-wide singletons.
#[derive(Clone)]
pub struct Platform {
    /// The wall clock.
    pub clock: Arc<dyn Clock>,
}

impl Platform {
    /// Real platform: system clock.
    #[must_use]
    pub fn system() -> Self {
        Self {
            clock: Arc::new(SystemClock),
        }
    }

    /// Test platform over a manual clock.
    #[must_use]
    pub fn manual(clock: Arc<ManualClock>) -> Self {
        Self { clock }
    }
}
