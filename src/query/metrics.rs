use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use quanta::{Clock, Instant};

/// Self-instrumentation of a [`crate::Query`].
///
/// Written only by the collecting thread, readable from any thread at any time.
#[derive(Debug)]
pub struct QueryMetrics {
    clock: Clock,
    collected: AtomicU64,
    collection_nanos: AtomicU64,
    collections: AtomicU64,
}

/// Point-in-time copy of a query's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryStatus {
    pub collected_count: u64,
    pub collection_duration: Duration,
    pub collection_count: u64,
}

impl QueryMetrics {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        QueryMetrics {
            clock,
            collected: AtomicU64::new(0),
            collection_nanos: AtomicU64::new(0),
            collections: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Starts timing one collection; the counters are updated when the guard drops.
    #[must_use]
    pub(crate) const fn start_collection(&self, start: Instant) -> CollectionGuard<'_> {
        CollectionGuard { metrics: self, start, collected: 0 }
    }

    #[must_use]
    pub fn status(&self) -> QueryStatus {
        QueryStatus {
            collected_count: self.collected.load(Ordering::Relaxed),
            collection_duration: Duration::from_nanos(self.collection_nanos.load(Ordering::Relaxed)),
            collection_count: self.collections.load(Ordering::Relaxed),
        }
    }
}

impl Default for QueryMetrics {
    fn default() -> Self {
        QueryMetrics::new(Clock::new())
    }
}

pub(crate) struct CollectionGuard<'a> {
    metrics: &'a QueryMetrics,
    start: Instant,
    pub(crate) collected: usize,
}

impl Drop for CollectionGuard<'_> {
    fn drop(&mut self) {
        let elapsed = self.metrics.clock.now().saturating_duration_since(self.start);
        let elapsed = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);

        self.metrics
            .collected
            .fetch_add(self.collected as u64, Ordering::Relaxed);
        self.metrics.collections.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .collection_nanos
            .fetch_add(elapsed, Ordering::Relaxed);
    }
}
