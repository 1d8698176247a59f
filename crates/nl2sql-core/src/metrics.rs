//! Global atomic counters for pipeline observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters — no allocations, no locking.
pub struct Metrics {
    queries_processed: AtomicU64,
    subqueries_executed: AtomicU64,
    subgraph_retries: AtomicU64,
    breaker_trips: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            queries_processed: AtomicU64::new(0),
            subqueries_executed: AtomicU64::new(0),
            subgraph_retries: AtomicU64::new(0),
            breaker_trips: AtomicU64::new(0),
        }
    }

    /// Increment the queries-processed counter by one (one per `run_pipeline` call).
    pub fn inc_queries_processed(&self) {
        self.queries_processed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "queries_processed", "counter incremented");
    }

    /// Increment the subqueries-executed counter by one (one per completed subgraph run).
    pub fn inc_subqueries_executed(&self) {
        self.subqueries_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "subqueries_executed", "counter incremented");
    }

    /// Increment the subgraph-retries counter by one (one per PLAN/VALIDATE refine loop).
    pub fn inc_subgraph_retries(&self) {
        self.subgraph_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "subgraph_retries", "counter incremented");
    }

    /// Increment the breaker-trips counter by one (one per breaker Closed -> Open transition).
    pub fn inc_breaker_trips(&self) {
        self.breaker_trips.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "breaker_trips", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a run, daemon tick, etc.)
    /// rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            queries_processed = self.queries_processed(),
            subqueries_executed = self.subqueries_executed(),
            subgraph_retries = self.subgraph_retries(),
            breaker_trips = self.breaker_trips(),
        );
    }

    /// Read the current queries-processed count.
    pub fn queries_processed(&self) -> u64 {
        self.queries_processed.load(Ordering::Relaxed)
    }

    /// Read the current subqueries-executed count.
    pub fn subqueries_executed(&self) -> u64 {
        self.subqueries_executed.load(Ordering::Relaxed)
    }

    /// Read the current subgraph-retries count.
    pub fn subgraph_retries(&self) -> u64 {
        self.subgraph_retries.load(Ordering::Relaxed)
    }

    /// Read the current breaker-trips count.
    pub fn breaker_trips(&self) -> u64 {
        self.breaker_trips.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.queries_processed.store(0, Ordering::Relaxed);
        self.subqueries_executed.store(0, Ordering::Relaxed);
        self.subgraph_retries.store(0, Ordering::Relaxed);
        self.breaker_trips.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.queries_processed(), 0);
        m.inc_queries_processed();
        m.inc_queries_processed();
        assert_eq!(m.queries_processed(), 2);

        m.inc_subqueries_executed();
        assert_eq!(m.subqueries_executed(), 1);

        m.inc_subgraph_retries();
        m.inc_subgraph_retries();
        m.inc_breaker_trips();
        assert_eq!(m.subgraph_retries(), 2);
        assert_eq!(m.breaker_trips(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_queries_processed();
        m.inc_subqueries_executed();
        m.inc_subgraph_retries();
        m.inc_breaker_trips();
        m.reset();
        assert_eq!(m.queries_processed(), 0);
        assert_eq!(m.subqueries_executed(), 0);
        assert_eq!(m.subgraph_retries(), 0);
        assert_eq!(m.breaker_trips(), 0);
    }
}
