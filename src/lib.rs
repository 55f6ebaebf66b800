#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Floodgate
//!
//! Outbound-call governor for services that fetch from many independent
//! third-party hosts: an adaptive per-domain token-bucket rate limiter plus
//! a priority-ordered, concurrency-bounded request scheduler.
//!
//! ## Features
//!
//! - **Per-domain token buckets** with lazy refill and weighted acquires
//! - **Adaptive (AIMD) feedback** from observed HTTP outcomes: sharp cuts on
//!   429/5xx, `Retry-After` honored as a cooldown, gradual recovery
//! - **Priority scheduling** with bounded queues and end-to-end backpressure
//! - **Interchangeable policies** behind one [`RateLimiter`] trait
//! - **Tower middleware** wiring acquire → call → feedback around a service
//! - **Deterministic tests** via injectable clock/sleeper seams
//!
//! ## Quick Start
//!
//! ```rust
//! use floodgate::{
//!     AdaptiveRateLimiter, Priority, RateLimitConfig, RateLimiter, RequestQueue,
//!     RequestQueueConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = Arc::new(AdaptiveRateLimiter::new(RateLimitConfig::default()).unwrap());
//!     let queue = RequestQueue::new(RequestQueueConfig::default())
//!         .with_rate_limiter(limiter.clone());
//!
//!     let body = queue
//!         .enqueue("https://example.org/feed.xml", Priority::High, || async {
//!             // the actual HTTP call lives here
//!             Ok::<_, std::io::Error>("<rss/>")
//!         })
//!         .await
//!         .unwrap();
//!     assert_eq!(body, "<rss/>");
//!
//!     // Feed the observed outcome back so the limiter can adapt.
//!     limiter.on_response("example.org", 200, None);
//! }
//! ```

pub mod domain;
pub mod dynamic;
pub mod error;
pub mod middleware;
pub mod prelude;
pub mod queue;
pub mod rate_limit;
pub mod time;

// Re-exports
pub use domain::normalize_domain;
pub use dynamic::DynamicConfig;
pub use error::QueueError;
pub use middleware::{ResponseMeta, ThrottleLayer, ThrottleService};
pub use queue::{Priority, RequestQueue, RequestQueueConfig};
pub use rate_limit::{
    AdaptiveRateLimiter, ConfigError, RateLimitConfig, RateLimitStats, RateLimiter,
    SimpleRateLimiter,
};
pub use time::{
    Clock, InstantSleeper, ManualClock, Sleeper, TokioClock, TokioSleeper, TrackingSleeper,
};
