//! Per-tenant retry backoff: exponential with jitter, server-overridable.

use ahash::RandomState;
use rand::Rng;
use std::collections::HashMap;

use crate::http::HttpHeaders;

/// Shape of the exponential backoff curve.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base_ms: u64,
    /// Multiplier per consecutive failure.
    pub factor: u32,
    /// Upper bound on the computed delay.
    pub cap_ms: u64,
    /// Symmetric jitter fraction applied to the computed delay.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            factor: 2,
            cap_ms: 30_000,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Delay for the `failures`-th consecutive failure (0-based), jittered.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> u64 {
        let exponent = failures.min(16);
        let raw = self
            .base_ms
            .saturating_mul(u64::from(self.factor).saturating_pow(exponent));
        let capped = raw.min(self.cap_ms);
        if self.jitter <= f64::EPSILON {
            return capped;
        }
        let scale = rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
        // Delays are far below 2^52; the cast is exact enough.
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            ((capped as f64) * scale) as u64
        }
    }
}

#[derive(Debug, Default)]
struct TenantState {
    failures: u32,
    ready_at_ms: u64,
    override_ms: Option<u64>,
}

/// Per-tenant backoff bookkeeping, owned by the pipeline controller.
#[derive(Default)]
pub struct TenantBackoff {
    policy: BackoffPolicy,
    states: HashMap<String, TenantState, RandomState>,
}

impl TenantBackoff {
    /// Creates bookkeeping with the given curve.
    #[must_use]
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            states: HashMap::default(),
        }
    }

    /// Records a failed attempt; returns the delay before the tenant's
    /// next attempt. A pending `Retry-After` override wins over the
    /// computed delay and is consumed.
    pub fn on_failure(&mut self, tenant: &str, now_ms: u64) -> u64 {
        let state = self.states.entry(tenant.to_string()).or_default();
        let delay = state
            .override_ms
            .take()
            .unwrap_or_else(|| self.policy.delay_for(state.failures));
        state.failures = state.failures.saturating_add(1);
        state.ready_at_ms = now_ms.saturating_add(delay);
        delay
    }

    /// Clears a tenant's backoff after a successful upload.
    pub fn on_success(&mut self, tenant: &str) {
        self.states.remove(tenant);
    }

    /// Installs a server `Retry-After` override for the next attempt.
    pub fn set_retry_after(&mut self, tenant: &str, delay_ms: u64) {
        self.states
            .entry(tenant.to_string())
            .or_default()
            .override_ms = Some(delay_ms);
    }

    /// Parks a tenant until further notice (auth rejection).
    pub fn pause(&mut self, tenant: &str) {
        self.states
            .entry(tenant.to_string())
            .or_default()
            .ready_at_ms = u64::MAX;
    }

    /// Drops all state; every tenant becomes ready (resume path).
    pub fn clear_all(&mut self) {
        self.states.clear();
    }

    /// Whether the tenant may be batched now.
    #[must_use]
    pub fn is_ready(&self, tenant: &str, now_ms: u64) -> bool {
        self.states
            .get(tenant)
            .is_none_or(|state| state.ready_at_ms <= now_ms)
    }
}

/// Parses a `Retry-After` header value into a delay from `now_ms`:
/// delta-seconds or an RFC-2822 HTTP-date. Unparseable values yield `None`
/// and the computed backoff stands.
#[must_use]
pub fn parse_retry_after(headers: &HttpHeaders, now_ms: u64) -> Option<u64> {
    let value = headers.get("Retry-After")?.trim();
    if value.is_empty() {
        return None;
    }
    if value.bytes().all(|b| b.is_ascii_digit()) {
        return value.parse::<u64>().ok().map(|secs| secs * 1_000);
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let target_ms = u64::try_from(date.timestamp_millis()).ok()?;
    Some(target_ms.saturating_sub(now_ms))
}
