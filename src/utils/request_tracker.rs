//! In-flight request accounting for a single static server.
//!
//! Each request holds a [`RequestGuard`] for as long as it is being handled;
//! the guard decrements the active count on drop, so early returns and
//! cancelled handlers are accounted for.
use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    total: AtomicU64,
}

/// Counts active and total requests. Cheap to clone (Arc inside).
#[derive(Debug, Clone, Default)]
pub struct RequestTracker {
    counters: Arc<Counters>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request; it stays active until the guard drops.
    pub fn track(&self) -> RequestGuard {
        self.counters.active.fetch_add(1, Ordering::Relaxed);
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        RequestGuard {
            counters: self.counters.clone(),
        }
    }

    /// Requests currently being handled.
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::Relaxed)
    }

    /// Requests handled since the tracker was created.
    pub fn total(&self) -> u64 {
        self.counters.total.load(Ordering::Relaxed)
    }

    pub fn is_idle(&self) -> bool {
        self.active() == 0
    }
}

/// Marks one request as in flight.
#[derive(Debug)]
pub struct RequestGuard {
    counters: Arc<Counters>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tracking() {
        let tracker = RequestTracker::new();
        assert!(tracker.is_idle());

        let first = tracker.track();
        let second = tracker.clone().track();
        assert_eq!(tracker.active(), 2);
        assert!(!tracker.is_idle());

        drop(first);
        assert_eq!(tracker.active(), 1);
        drop(second);
        assert!(tracker.is_idle());
        assert_eq!(tracker.total(), 2);
    }
}
