//! Per-item exponential backoff

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Delay before the first retry of a failing key
pub const MIN_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Upper bound on the delay between retries
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Exponential failure rate limiter: `base * 2^failures`, capped at `max`.
///
/// Each call to [`when`](Self::when) counts as one more failure of the item
/// until [`forget`](Self::forget) resets it.
#[derive(Debug)]
pub struct ExponentialFailureRateLimiter {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl ExponentialFailureRateLimiter {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn when(&self, item: &str) -> Duration {
        let exp = {
            let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
            let count = failures.entry(item.to_string()).or_insert(0);
            let exp = *count;
            *count = count.saturating_add(1);
            exp
        };
        self.backoff(exp)
    }

    fn backoff(&self, exp: u32) -> Duration {
        2u32.checked_pow(exp)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    pub fn num_requeues(&self, item: &str) -> u32 {
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.get(item).copied().unwrap_or(0)
    }

    pub fn forget(&self, item: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.remove(item);
    }
}

impl Default for ExponentialFailureRateLimiter {
    fn default() -> Self {
        Self::new(MIN_RETRY_DELAY, MAX_RETRY_DELAY)
    }
}
