//! Live-updatable shared config handles.
//!
//! `DynamicConfig<T>` wraps `ArcSwap` so readers pay one atomic load and
//! writers replace the value wholesale. The adaptive limiter keeps its
//! default limits in one of these: the defaults seed lazily created domains
//! and cap recovery, and an operator can retune them without restarting.

use arc_swap::ArcSwap;
use std::sync::Arc;

/// Shared value with cheap snapshot reads and whole-value replacement.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    inner: Arc<ArcSwap<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
    }

    /// Snapshot of the current value.
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Replace the value wholesale. Readers holding an old snapshot keep it.
    pub fn set(&self, value: T) {
        self.inner.store(Arc::new(value));
    }
}
