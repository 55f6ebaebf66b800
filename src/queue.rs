//! Priority-ordered, concurrency-bounded request scheduling.
//!
//! [`RequestQueue`] sequences asynchronous units of work per domain: callers
//! enqueue work with a [`Priority`], a per-domain drain task executes it in
//! priority order behind the rate limiter, and the caller suspends until its
//! own unit of work finishes — so backpressure reaches all the way back to
//! the producer. Admission is bounded: a full domain queue rejects new work
//! immediately with [`QueueError::QueueFull`] instead of buffering without
//! limit.

use crate::domain::normalize_domain;
use crate::error::QueueError;
use crate::rate_limit::RateLimiter;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Execution priority of a queued request. Higher runs first; equal
/// priorities keep arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// Scheduler limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestQueueConfig {
    /// Upper bound on in-flight requests per domain.
    pub max_concurrent_per_domain: usize,
    /// Declared global in-flight bound. Accepted for configuration
    /// compatibility but NOT enforced; enforcing it would change the
    /// observable backpressure behavior.
    pub max_concurrent_total: usize,
    /// Pending entries allowed per domain before `enqueue` rejects.
    pub max_queue_size_per_domain: usize,
    /// Declared per-request timeout. Accepted for configuration
    /// compatibility but NOT enforced; work runs to completion.
    pub request_timeout_ms: u64,
}

impl Default for RequestQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_domain: 2,
            max_concurrent_total: 10,
            max_queue_size_per_domain: 50,
            request_timeout_ms: 60_000,
        }
    }
}

/// A pending entry: priority plus the type-erased job. The job owns the
/// caller's one-shot sender; dropping it unstarted resolves the caller with
/// `Cancelled` via the channel's closed-sender signal.
struct QueuedRequest {
    priority: Priority,
    job: BoxFuture<'static, ()>,
}

#[derive(Default)]
struct Bookkeeping {
    queues: HashMap<String, VecDeque<QueuedRequest>>,
    active: HashMap<String, usize>,
    processing: HashSet<String>,
}

struct QueueCore {
    config: RequestQueueConfig,
    limiter: Option<Arc<dyn RateLimiter>>,
    state: Mutex<Bookkeeping>,
}

/// Per-domain priority scheduler gated by a [`RateLimiter`].
///
/// The handle is cheap to clone; clones share one scheduler. All
/// bookkeeping (queues, in-flight counters, the set of live drain tasks)
/// sits behind a single mutex that is never held across an `.await`.
#[derive(Clone)]
pub struct RequestQueue {
    core: Arc<QueueCore>,
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("config", &self.core.config)
            .field("total_queued", &self.total_queue_size())
            .finish()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(RequestQueueConfig::default())
    }
}

impl RequestQueue {
    /// Create a scheduler with the given limits and no rate limiter.
    pub fn new(config: RequestQueueConfig) -> Self {
        Self { core: Arc::new(QueueCore { config, limiter: None, state: Mutex::default() }) }
    }

    /// Gate every executed request behind `limiter.acquire(domain, 1)`.
    /// Intended to follow [`new`](Self::new) directly, before the handle is
    /// cloned or any work is enqueued.
    pub fn with_rate_limiter(self, limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            core: Arc::new(QueueCore {
                config: self.core.config,
                limiter: Some(limiter),
                state: Mutex::default(),
            }),
        }
    }

    /// Enqueue `op` for `domain` and wait for its result.
    ///
    /// The returned future resolves only once the work itself has run (or
    /// was rejected/cancelled): admission alone does not count as progress.
    ///
    /// # Errors
    /// - [`QueueError::QueueFull`] immediately if the domain's pending queue
    ///   is at capacity.
    /// - [`QueueError::Cancelled`] if the entry is removed before starting.
    /// - [`QueueError::Inner`] carrying the work's own error.
    pub async fn enqueue<T, E, Fut, Op>(
        &self,
        domain: &str,
        priority: Priority,
        op: Op,
    ) -> Result<T, QueueError<E>>
    where
        T: Send + 'static,
        E: Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        Op: FnOnce() -> Fut + Send + 'static,
    {
        let domain = normalize_domain(domain);
        let (tx, rx) = oneshot::channel::<Result<T, E>>();
        let job = async move {
            let result = op().await;
            // The caller may have stopped waiting; nothing to do then.
            let _ = tx.send(result);
        }
        .boxed();

        {
            let mut state = self.lock();
            let queue = state.queues.entry(domain.clone()).or_default();
            if queue.len() >= self.core.config.max_queue_size_per_domain {
                tracing::warn!(
                    target: "floodgate::queue",
                    domain = %domain,
                    limit = self.core.config.max_queue_size_per_domain,
                    "rejecting request; domain queue is full"
                );
                return Err(QueueError::QueueFull {
                    domain,
                    limit: self.core.config.max_queue_size_per_domain,
                });
            }
            // Stable priority order: insert before the first entry of
            // strictly lower priority.
            let at = queue
                .iter()
                .position(|entry| entry.priority < priority)
                .unwrap_or(queue.len());
            queue.insert(at, QueuedRequest { priority, job });
            self.spawn_drain_if_idle(&mut state, &domain);
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(QueueError::Inner(e)),
            Err(_) => Err(QueueError::Cancelled),
        }
    }

    /// Drop every pending (not yet started) entry for `domain`, resolving
    /// each waiting caller with [`QueueError::Cancelled`]. In-flight work is
    /// not interrupted.
    pub fn cancel(&self, domain: &str) {
        let domain = normalize_domain(domain);
        let dropped = {
            let mut state = self.lock();
            match state.queues.get_mut(&domain) {
                Some(queue) => std::mem::take(queue),
                None => return,
            }
        };
        if !dropped.is_empty() {
            tracing::debug!(
                target: "floodgate::queue",
                domain = %domain,
                cancelled = dropped.len(),
                "cancelled pending requests"
            );
        }
    }

    /// Drop every pending entry across all domains.
    pub fn cancel_all(&self) {
        let dropped: Vec<QueuedRequest> = {
            let mut state = self.lock();
            state.queues.drain().flat_map(|(_, queue)| queue).collect()
        };
        if !dropped.is_empty() {
            tracing::debug!(
                target: "floodgate::queue",
                cancelled = dropped.len(),
                "cancelled all pending requests"
            );
        }
    }

    /// Pending (not started) entries for `domain`.
    pub fn queue_size(&self, domain: &str) -> usize {
        let domain = normalize_domain(domain);
        self.lock().queues.get(&domain).map_or(0, VecDeque::len)
    }

    /// Pending entries across all domains.
    pub fn total_queue_size(&self) -> usize {
        self.lock().queues.values().map(VecDeque::len).sum()
    }

    /// Whether a drain task is currently live for `domain`.
    pub fn is_processing(&self, domain: &str) -> bool {
        self.lock().processing.contains(&normalize_domain(domain))
    }

    fn lock(&self) -> MutexGuard<'_, Bookkeeping> {
        self.core.state.lock().expect("scheduler state poisoned")
    }

    /// Start a drain task for `domain` unless one is already live. Must be
    /// called with the lock held so the processing-set check is atomic with
    /// the insert that makes the new entry visible.
    fn spawn_drain_if_idle(&self, state: &mut Bookkeeping, domain: &str) {
        if !state.processing.insert(domain.to_string()) {
            return;
        }
        let this = self.clone();
        let domain = domain.to_string();
        tokio::spawn(async move { this.drain(domain).await });
    }

    /// One logical drain task per domain: repeatedly pop and execute the
    /// highest-priority entry until the queue empties or the concurrency
    /// bound is hit. Exit and processing-set removal happen under one lock
    /// acquisition, so `enqueue` can never observe a live-looking task that
    /// has already decided to stop.
    async fn drain(self, domain: String) {
        loop {
            let next = {
                let mut guard = self.lock();
                let state = &mut *guard;
                match state.queues.get_mut(&domain) {
                    None => {
                        state.processing.remove(&domain);
                        None
                    }
                    Some(queue) if queue.is_empty() => {
                        state.queues.remove(&domain);
                        state.processing.remove(&domain);
                        None
                    }
                    Some(queue) => {
                        let active = state.active.get(&domain).copied().unwrap_or(0);
                        if active >= self.core.config.max_concurrent_per_domain {
                            // Leave the remainder queued; a future enqueue
                            // restarts the drain.
                            state.processing.remove(&domain);
                            None
                        } else {
                            let entry = queue.pop_front();
                            if entry.is_some() {
                                *state.active.entry(domain.clone()).or_insert(0) += 1;
                            }
                            entry
                        }
                    }
                }
            };

            let Some(entry) = next else { return };

            if let Some(limiter) = &self.core.limiter {
                limiter.acquire(&domain, 1).await;
            }

            // The job resolves the caller's slot itself; a failing unit of
            // work is delivered there and never tears down this task.
            entry.job.await;

            let mut state = self.lock();
            match state.active.get_mut(&domain) {
                Some(active) if *active > 1 => *active -= 1,
                _ => {
                    state.active.remove(&domain);
                }
            }
        }
    }
}
