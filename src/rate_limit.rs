//! Per-domain rate limiting.
//!
//! This module provides the outbound-call pacing layer:
//! - [`RateLimiter`]: the policy-agnostic contract callers program against.
//! - [`AdaptiveRateLimiter`]: token bucket with feedback-driven (AIMD) rate
//!   adjustment from observed HTTP outcomes.
//! - [`SimpleRateLimiter`]: fixed spacing between requests, no feedback.
//!
//! # Architecture
//!
//! State is keyed by the canonical domain (see [`crate::normalize_domain`])
//! and created lazily on first use. Each limiter instance guards its whole
//! domain map with one mutex; every critical section is O(1) and the lock is
//! never held across an `.await`, so a long wait for one domain cannot stall
//! bookkeeping for another. Waiting happens in a recheck loop: compute the
//! deficit, sleep, re-check — never a single fixed sleep, because concurrent
//! acquirers may drain tokens added in the meantime.

use async_trait::async_trait;

pub mod adaptive;
pub mod simple;

pub use adaptive::AdaptiveRateLimiter;
pub use simple::SimpleRateLimiter;

/// Contract shared by every limiter policy.
///
/// Callers are policy-agnostic: the scheduler and middleware take an
/// `Arc<dyn RateLimiter>` and never learn which policy is behind it. No
/// operation fails in normal use; `acquire` waits instead of erroring.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until `weight` tokens are available for `domain`, then consume
    /// them. Suspends the calling task; never blocks a worker thread.
    async fn acquire(&self, domain: &str, weight: u32);

    /// Consume `weight` tokens if immediately available. A domain with no
    /// recorded state is allowed permissively and no state is created.
    fn try_acquire(&self, domain: &str, weight: u32) -> bool;

    /// Replace `domain`'s limits wholesale; effective on its next refill.
    fn set_limit(&self, domain: &str, config: RateLimitConfig);

    /// Snapshot of `domain`'s current state, after an opportunistic refill.
    fn stats(&self, domain: &str) -> RateLimitStats;

    /// Feed back the outcome of a completed call for adaptive policies.
    /// `retry_after_secs` carries the `Retry-After` header when present.
    fn on_response(&self, domain: &str, status: u16, retry_after_secs: Option<u64>);

    /// Drop `domain`'s state; the next use starts from a full burst.
    fn reset(&self, domain: &str);

    /// Drop all per-domain state.
    fn reset_all(&self);
}

/// Per-domain limits. A plain value: adjustments replace it wholesale.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimitConfig {
    /// Sustained request rate; also the token refill rate. Must be > 0.
    pub requests_per_second: f64,
    /// Token cap: how many requests may go out back-to-back. Must be >= 1.
    pub burst_size: u32,
    /// Declared minimum spacing between requests. Carried for compatibility
    /// with existing configs but not consulted by any current policy.
    pub min_delay_ms: u64,
    /// Upper bound on a single wait inside `acquire`; very low rates reach
    /// their full delay over several recheck iterations.
    pub max_delay_ms: u64,
    /// Enables feedback-driven rate adjustment in adaptive policies.
    pub adaptive_enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 2.0,
            burst_size: 5,
            min_delay_ms: 100,
            max_delay_ms: 10_000,
            adaptive_enabled: true,
        }
    }
}

impl RateLimitConfig {
    /// Validate the invariants that keep wait math meaningful.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(ConfigError::InvalidRate { provided: self.requests_per_second });
        }
        if self.burst_size == 0 {
            return Err(ConfigError::InvalidBurst);
        }
        Ok(())
    }
}

/// Rejected limiter configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// `requests_per_second` must be a positive finite number.
    #[error("requests_per_second must be > 0 (got {provided})")]
    InvalidRate {
        /// Value provided by the caller.
        provided: f64,
    },
    /// `burst_size` must be at least 1.
    #[error("burst_size must be >= 1")]
    InvalidBurst,
}

/// Read-only snapshot of one domain's limiter state.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimitStats {
    /// Normalized domain the snapshot describes.
    pub domain: String,
    /// Rate currently in effect (may differ from the configured default
    /// while adaptive feedback is active).
    pub requests_per_second: f64,
    /// Tokens available right now; negative while a cooldown debt is owed.
    pub available_tokens: f64,
    /// Consecutive error responses since the last success.
    pub consecutive_errors: u32,
    /// Milliseconds timestamp of the last 429 response, 0 if none.
    pub last_error_time: u64,
    /// Milliseconds timestamp of the last granted request, 0 if none.
    pub last_request_time: u64,
    /// Whether the next single-weight acquire would have to wait.
    pub is_throttled: bool,
}
