//! Convenient re-exports for common Floodgate types.
pub use crate::{
    error::QueueError,
    middleware::{ResponseMeta, ThrottleLayer},
    queue::{Priority, RequestQueue, RequestQueueConfig},
    rate_limit::{
        AdaptiveRateLimiter, RateLimitConfig, RateLimitStats, RateLimiter, SimpleRateLimiter,
    },
    normalize_domain,
};
