//! Fixed-spacing limiter.

use crate::domain::normalize_domain;
use crate::rate_limit::{RateLimitConfig, RateLimitStats, RateLimiter};
use crate::time::{Clock, Sleeper, TokioClock, TokioSleeper};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Limiter that enforces a fixed delay between requests to the same domain.
///
/// No feedback, no bursts: it remembers only when each domain was last hit
/// and spaces the next request `delay_ms * weight` milliseconds after it.
/// `set_limit` and `on_response` are deliberate no-ops so callers can swap
/// this in anywhere an [`AdaptiveRateLimiter`](crate::AdaptiveRateLimiter)
/// is accepted.
#[derive(Debug)]
pub struct SimpleRateLimiter {
    delay_ms: u64,
    last_request: Mutex<HashMap<String, u64>>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for SimpleRateLimiter {
    fn default() -> Self {
        Self::new(500)
    }
}

impl SimpleRateLimiter {
    /// Create a limiter spacing same-domain requests `delay_ms` apart.
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            last_request: Mutex::new(HashMap::new()),
            clock: Arc::new(TokioClock::default()),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Override the clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Override the sleeper (deterministic tests).
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.last_request.lock().expect("rate limiter state poisoned")
    }
}

#[async_trait]
impl RateLimiter for SimpleRateLimiter {
    async fn acquire(&self, domain: &str, weight: u32) {
        let domain = normalize_domain(domain);
        // A domain with no recorded request needs no spacing.
        let wait = {
            let map = self.lock();
            match map.get(&domain) {
                None => 0,
                Some(&last) => {
                    let elapsed = self.clock.now_millis().saturating_sub(last);
                    (self.delay_ms * u64::from(weight)).saturating_sub(elapsed)
                }
            }
        };
        if wait > 0 {
            self.sleeper.sleep(Duration::from_millis(wait)).await;
        }
        self.lock().insert(domain, self.clock.now_millis());
    }

    fn try_acquire(&self, domain: &str, weight: u32) -> bool {
        let domain = normalize_domain(domain);
        let mut map = self.lock();
        let now = self.clock.now_millis();
        let allowed = match map.get(&domain) {
            None => true,
            Some(&last) => now.saturating_sub(last) >= self.delay_ms * u64::from(weight),
        };
        if allowed {
            map.insert(domain, now);
        }
        allowed
    }

    fn set_limit(&self, _domain: &str, _config: RateLimitConfig) {
        // Fixed spacing by construction; per-domain limits are not supported.
    }

    fn stats(&self, domain: &str) -> RateLimitStats {
        let domain = normalize_domain(domain);
        let last_request_time = self.lock().get(&domain).copied().unwrap_or(0);
        RateLimitStats {
            requests_per_second: 1000.0 / self.delay_ms as f64,
            available_tokens: 1.0,
            consecutive_errors: 0,
            last_error_time: 0,
            last_request_time,
            is_throttled: false,
            domain,
        }
    }

    fn on_response(&self, _domain: &str, _status: u16, _retry_after_secs: Option<u64>) {
        // Not adaptive.
    }

    fn reset(&self, domain: &str) {
        self.lock().remove(&normalize_domain(domain));
    }

    fn reset_all(&self) {
        self.lock().clear();
    }
}
