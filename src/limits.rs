use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::{info, warn};
use tokio::time::{Duration, sleep};

use crate::metrics::METRICS;
use crate::provider::api::MeasurementApi;

// ------------------------------------------------------------
// Backoff policy
// ------------------------------------------------------------
//
// All retry sleeps in the gate and the driver go through an
// injected policy instead of magic constants, so simulated-time
// tests can exercise the loops deterministically.
//
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Same delay on every attempt
    Fixed(Duration),

    /// Doubles per attempt, never exceeding `cap`
    Capped { base: Duration, cap: Duration },

    /// Driven by the provider's quota reset, padded by `pad`.
    /// Falls back to `pad` when no reset value is available.
    ResetDriven { pad: Duration },
}

impl BackoffPolicy {
    /// Delay before the given retry attempt (0-based).
    ///
    /// `reset_secs` carries the provider-reported reset where one
    /// exists; only `ResetDriven` consumes it.
    pub fn delay(&self, attempt: u32, reset_secs: Option<u64>) -> Duration {
        match *self {
            BackoffPolicy::Fixed(d) => d,
            BackoffPolicy::Capped { base, cap } => {
                let grown = base.saturating_mul(1u32 << attempt.min(16));
                grown.min(cap)
            }
            BackoffPolicy::ResetDriven { pad } => match reset_secs {
                Some(reset) => Duration::from_secs(reset) + pad,
                None => pad,
            },
        }
    }
}

/// Retry delay after a failed quota fetch.
pub fn default_fetch_retry() -> BackoffPolicy {
    BackoffPolicy::Fixed(Duration::from_secs(5))
}

/// Wait until a zeroed quota replenishes: reset + 1s.
pub fn default_reset_wait() -> BackoffPolicy {
    BackoffPolicy::ResetDriven { pad: Duration::from_secs(1) }
}

// ------------------------------------------------------------
// Rate-limit gate
// ------------------------------------------------------------

/// Admits callers into the provider's creation quota.
///
/// `admit()` suspends (never busy-waits) until at least one unit of
/// creation quota is available and returns the authoritative
/// remaining count at the moment of the check.
///
/// Callers decrement a local shadow counter per consumed unit and
/// only re-admit once the shadow hits zero or the provider rejects a
/// creation with a quota error mid-batch. That keeps the loops at
/// one quota round trip per batch rather than one per request.
///
/// CONTRACT:
/// - Never returns zero.
/// - A failed quota fetch is transient: retried indefinitely on a
///   fixed short delay so the collector keeps running unattended.
pub struct RateLimitGate {
    api: Arc<dyn MeasurementApi>,
    fetch_retry: BackoffPolicy,
    reset_wait: BackoffPolicy,
}

impl RateLimitGate {
    pub fn new(api: Arc<dyn MeasurementApi>) -> Self {
        Self {
            api,
            fetch_retry: default_fetch_retry(),
            reset_wait: default_reset_wait(),
        }
    }

    /// Replaces both backoff policies. Used by simulated-time tests.
    pub fn with_policies(
        mut self,
        fetch_retry: BackoffPolicy,
        reset_wait: BackoffPolicy,
    ) -> Self {
        self.fetch_retry = fetch_retry;
        self.reset_wait = reset_wait;
        self
    }

    /// Blocks (via scheduler suspension) until creation quota is
    /// available; returns the remaining count.
    pub async fn admit(&self) -> u64 {
        loop {
            let limits = match self.api.get_limits().await {
                Ok(l) => l,
                Err(e) => {
                    warn!("Failed to get limits ({}), retrying...", e);
                    sleep(self.fetch_retry.delay(0, None)).await;
                    continue;
                }
            };

            if limits.remaining == 0 {
                let wait = self.reset_wait.delay(0, Some(limits.reset_secs));
                info!("Rate limit reached. Waiting {}s...", wait.as_secs());
                METRICS.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
                sleep(wait).await;
                continue;
            }

            return limits.remaining;
        }
    }
}
