//! Feedback-driven token-bucket limiter.
//!
//! Each domain owns a token bucket refilled lazily on access (no background
//! timer). When adaptive feedback is enabled, observed HTTP outcomes steer
//! the per-domain rate, AIMD-style: sharp multiplicative cuts on 429/5xx,
//! gradual 10%-per-success recovery capped at the configured default. A
//! `Retry-After` header turns into negative tokens — a cooldown debt the
//! bucket must refill through before the next request goes out.

use crate::domain::normalize_domain;
use crate::dynamic::DynamicConfig;
use crate::rate_limit::{ConfigError, RateLimitConfig, RateLimitStats, RateLimiter};
use crate::time::{Clock, Sleeper, TokioClock, TokioSleeper};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Floor applied when a 429 halves the rate. The 503 decay path has no such
/// floor; repeated 503s may push the rate below this value.
pub const MIN_ADAPTIVE_RATE: f64 = 0.1;

#[derive(Debug)]
struct DomainState {
    config: RateLimitConfig,
    tokens: f64,
    last_refill: u64,
    consecutive_errors: u32,
    last_error_time: u64,
    last_request_time: u64,
}

/// Token-bucket limiter with adaptive per-domain rates.
///
/// The default config seeds every lazily created domain and caps recovery;
/// it lives in a [`DynamicConfig`] so it can be retuned at runtime via
/// [`set_default_limit`](Self::set_default_limit). All per-domain state sits
/// behind one mutex; critical sections are O(1) and the lock is never held
/// across an `.await`.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    default_config: DynamicConfig<RateLimitConfig>,
    states: Mutex<HashMap<String, DomainState>>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for AdaptiveRateLimiter {
    fn default() -> Self {
        Self {
            default_config: DynamicConfig::new(RateLimitConfig::default()),
            states: Mutex::new(HashMap::new()),
            clock: Arc::new(TokioClock::default()),
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl AdaptiveRateLimiter {
    /// Create a limiter whose lazily created domains start from
    /// `default_config`, validating its invariants.
    pub fn new(default_config: RateLimitConfig) -> Result<Self, ConfigError> {
        default_config.validate()?;
        Ok(Self { default_config: DynamicConfig::new(default_config), ..Self::default() })
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

    /// Replace the default limits used for new domains and as the adaptive
    /// recovery ceiling. Domains that already have state keep their current
    /// config until feedback or [`set_limit`](RateLimiter::set_limit)
    /// changes it.
    pub fn set_default_limit(&self, config: RateLimitConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.default_config.set(config);
        Ok(())
    }

    /// The default limits currently in effect.
    pub fn default_limit(&self) -> RateLimitConfig {
        *self.default_config.get()
    }

    fn state_mut<'a>(
        &self,
        map: &'a mut HashMap<String, DomainState>,
        domain: &str,
        now: u64,
    ) -> &'a mut DomainState {
        let default = *self.default_config.get();
        map.entry(domain.to_string()).or_insert_with(|| DomainState {
            config: default,
            tokens: f64::from(default.burst_size),
            last_refill: now,
            consecutive_errors: 0,
            last_error_time: 0,
            last_request_time: 0,
        })
    }

    fn refill(state: &mut DomainState, now: u64) {
        let elapsed = now.saturating_sub(state.last_refill);
        if elapsed > 0 {
            let added = elapsed as f64 * state.config.requests_per_second / 1000.0;
            state.tokens = (state.tokens + added).min(f64::from(state.config.burst_size));
            state.last_refill = now;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DomainState>> {
        self.states.lock().expect("rate limiter state poisoned")
    }
}

#[async_trait]
impl RateLimiter for AdaptiveRateLimiter {
    async fn acquire(&self, domain: &str, weight: u32) {
        let domain = normalize_domain(domain);
        loop {
            // Decide under the lock, wait outside it. The wait is a hint:
            // another acquirer may have drained the refill by the time we
            // wake, so we always re-check.
            let wait = {
                let mut map = self.lock();
                let now = self.clock.now_millis();
                let state = self.state_mut(&mut map, &domain, now);
                Self::refill(state, now);
                if state.tokens >= f64::from(weight) {
                    state.tokens -= f64::from(weight);
                    state.last_request_time = now;
                    None
                } else {
                    let deficit = f64::from(weight) - state.tokens;
                    let wait_ms =
                        (deficit / state.config.requests_per_second * 1000.0).ceil() as u64;
                    Some(Duration::from_millis(wait_ms.min(state.config.max_delay_ms)))
                }
            };
            match wait {
                None => return,
                Some(delay) => self.sleeper.sleep(delay).await,
            }
        }
    }

    fn try_acquire(&self, domain: &str, weight: u32) -> bool {
        let domain = normalize_domain(domain);
        let mut map = self.lock();
        // Unknown domains are allowed permissively and left stateless.
        let Some(state) = map.get_mut(&domain) else { return true };
        let now = self.clock.now_millis();
        Self::refill(state, now);
        if state.tokens >= f64::from(weight) {
            state.tokens -= f64::from(weight);
            state.last_request_time = now;
            true
        } else {
            false
        }
    }

    fn set_limit(&self, domain: &str, config: RateLimitConfig) {
        let domain = normalize_domain(domain);
        let mut map = self.lock();
        let now = self.clock.now_millis();
        let state = self.state_mut(&mut map, &domain, now);
        // Wholesale replacement; tokens above a shrunken burst cap are
        // clamped by the next refill rather than immediately.
        state.config = config;
    }

    fn stats(&self, domain: &str) -> RateLimitStats {
        let domain = normalize_domain(domain);
        let mut map = self.lock();
        match map.get_mut(&domain) {
            Some(state) => {
                Self::refill(state, self.clock.now_millis());
                RateLimitStats {
                    requests_per_second: state.config.requests_per_second,
                    available_tokens: state.tokens,
                    consecutive_errors: state.consecutive_errors,
                    last_error_time: state.last_error_time,
                    last_request_time: state.last_request_time,
                    is_throttled: state.tokens < 1.0,
                    domain,
                }
            }
            None => {
                let default = *self.default_config.get();
                RateLimitStats {
                    requests_per_second: default.requests_per_second,
                    available_tokens: f64::from(default.burst_size),
                    consecutive_errors: 0,
                    last_error_time: 0,
                    last_request_time: 0,
                    is_throttled: false,
                    domain,
                }
            }
        }
    }

    fn on_response(&self, domain: &str, status: u16, retry_after_secs: Option<u64>) {
        let domain = normalize_domain(domain);
        let mut map = self.lock();
        let now = self.clock.now_millis();
        let ceiling = self.default_config.get().requests_per_second;
        let state = self.state_mut(&mut map, &domain, now);
        if !state.config.adaptive_enabled {
            return;
        }
        match status {
            429 => {
                state.consecutive_errors += 1;
                state.last_error_time = now;
                let rate = (state.config.requests_per_second * 0.5).max(MIN_ADAPTIVE_RATE);
                state.config = RateLimitConfig { requests_per_second: rate, ..state.config };
                tracing::warn!(
                    target: "floodgate::rate_limit",
                    domain = %domain,
                    rate,
                    "upstream rate limited; halving request rate"
                );
                if let Some(retry_after) = retry_after_secs {
                    if retry_after > 0 {
                        // Mandatory cooldown: the bucket must refill through
                        // this debt before anything else goes out.
                        state.tokens = -(retry_after as f64);
                        tracing::debug!(
                            target: "floodgate::rate_limit",
                            domain = %domain,
                            retry_after,
                            "honoring retry-after cooldown"
                        );
                    }
                }
            }
            200..=299 => {
                if state.consecutive_errors > 0 {
                    state.consecutive_errors = 0;
                    let rate = (state.config.requests_per_second * 1.1).min(ceiling);
                    state.config = RateLimitConfig { requests_per_second: rate, ..state.config };
                    tracing::debug!(
                        target: "floodgate::rate_limit",
                        domain = %domain,
                        rate,
                        "upstream recovered; raising request rate"
                    );
                }
            }
            503 => {
                state.consecutive_errors += 1;
                let rate = state.config.requests_per_second * 0.7;
                state.config = RateLimitConfig { requests_per_second: rate, ..state.config };
                tracing::debug!(
                    target: "floodgate::rate_limit",
                    domain = %domain,
                    rate,
                    "upstream overloaded; reducing request rate"
                );
            }
            500..=599 => {
                state.consecutive_errors += 1;
                let rate = state.config.requests_per_second * 0.9;
                state.config = RateLimitConfig { requests_per_second: rate, ..state.config };
                tracing::debug!(
                    target: "floodgate::rate_limit",
                    domain = %domain,
                    rate,
                    "upstream error; trimming request rate"
                );
            }
            _ => {}
        }
    }

    fn reset(&self, domain: &str) {
        self.lock().remove(&normalize_domain(domain));
    }

    fn reset_all(&self) {
        self.lock().clear();
    }
}
