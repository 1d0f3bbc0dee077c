//! Exponential-backoff rate limiter for the reconcile queue (§4.2):
//! default base 5ms, max 1000s.

use std::collections::HashMap;
use std::time::Duration;

/// Default base delay for the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
/// Default ceiling no computed delay may exceed.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Per-key exponential backoff: `base * 2^failures`, capped at `max_delay`.
/// `forget` resets a key's failure count, matching client-go's
/// `RateLimitingInterface.Forget`.
pub struct ExponentialRateLimiter {
    base_delay: Duration,
    max_delay: Duration,
    failures: HashMap<String, u32>,
}

impl Default for ExponentialRateLimiter {
    fn default() -> Self {
        ExponentialRateLimiter::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl ExponentialRateLimiter {
    /// Builds a rate limiter with explicit base/max delays.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        ExponentialRateLimiter { base_delay, max_delay, failures: HashMap::new() }
    }

    /// Records another failure for `key` and returns the delay to wait
    /// before the next attempt.
    pub fn next_delay(&mut self, key: &str) -> Duration {
        let count = self.failures.entry(key.to_string()).or_insert(0);
        let exp = (*count).min(32);
        *count += 1;
        let scaled = self.base_delay.as_secs_f64() * 2f64.powi(exp as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// Number of consecutive failures recorded for `key` so far.
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Clears `key`'s failure history (called after a successful reconcile).
    pub fn forget(&mut self, key: &str) {
        self.failures.remove(key);
    }
}
