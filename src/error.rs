//! Error type for scheduled work.

use std::fmt;

/// Outcome of an enqueued unit of work that did not succeed.
///
/// Only `QueueFull` is raised at admission time; everything after admission
/// is delivered through the caller's result slot. `Cancelled` is a distinct
/// outcome meaning the work was never started, not that it ran and failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError<E> {
    /// The domain's pending queue was already at capacity; nothing was
    /// enqueued. The caller must back off or drop the request.
    QueueFull {
        /// Normalized domain whose queue rejected the request.
        domain: String,
        /// Configured `max_queue_size_per_domain` at rejection time.
        limit: usize,
    },
    /// The request was removed from the queue before it started.
    Cancelled,
    /// The unit of work ran and failed; its error is delivered verbatim.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for QueueError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull { domain, limit } => {
                write!(f, "request queue full for '{}' ({} pending)", domain, limit)
            }
            Self::Cancelled => write!(f, "request cancelled before it started"),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for QueueError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> QueueError<E> {
    /// Check if admission was rejected because the queue was full.
    pub fn is_queue_full(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }

    /// Check if the request was cancelled before starting.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this wraps the work's own error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Extract the work's own error, if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the work's own error, if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Rejecting domain and queue limit, if admission was rejected.
    pub fn queue_full_info(&self) -> Option<(&str, usize)> {
        match self {
            Self::QueueFull { domain, limit } => Some((domain.as_str(), *limit)),
            _ => None,
        }
    }
}
