//! Build and merge counters.
//!
//! Components that report progress take an optional sink
//! (`Option<Arc<dyn MetricsSink>>`). A missing sink is a no-op, never an
//! error. [`Metrics`] is the built-in, lock-free implementation.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use segstore::metrics::{Metrics, MetricsSink, DOCS_RECLAIMED};
//!
//! let metrics = Arc::new(Metrics::new());
//! metrics.increase(DOCS_RECLAIMED, 3);
//! assert_eq!(metrics.snapshot().docs_reclaimed, 3);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub const DOCS_BUILT: &str = "docs_built";
pub const DOCS_REWRITTEN: &str = "docs_rewritten";
pub const DOCS_DELETED: &str = "docs_deleted";
pub const DOCS_SKIPPED: &str = "docs_skipped";
pub const SEGMENTS_DUMPED: &str = "segments_dumped";
pub const MERGES_COMPLETED: &str = "merges_completed";
pub const MERGES_CANCELLED: &str = "merges_cancelled";
pub const DOCS_RECLAIMED: &str = "docs_reclaimed";
pub const RECLAIM_MISSING_ATTRIBUTE: &str = "reclaim_missing_attribute";
pub const POSTINGS_TRUNCATED: &str = "postings_truncated";

/// External counter sink.
pub trait MetricsSink: Send + Sync {
    fn increase(&self, counter: &str, delta: u64);
}

/// Shared optional sink handle.
pub type SharedSink = Option<Arc<dyn MetricsSink>>;

/// Report to an optional sink.
#[inline]
pub fn report(sink: &SharedSink, counter: &str, delta: u64) {
    if let Some(sink) = sink {
        if delta > 0 {
            sink.increase(counter, delta);
        }
    }
}

/// Thread-safe counter set. All counters are `AtomicU64`; recording is O(1)
/// and never blocks.
pub struct Metrics {
    docs_built: AtomicU64,
    docs_rewritten: AtomicU64,
    docs_deleted: AtomicU64,
    docs_skipped: AtomicU64,
    segments_dumped: AtomicU64,
    merges_completed: AtomicU64,
    merges_cancelled: AtomicU64,
    docs_reclaimed: AtomicU64,
    reclaim_missing_attribute: AtomicU64,
    postings_truncated: AtomicU64,
    /// Counters reported under names this struct does not know.
    other: AtomicU64,
    started_at: Instant,
}

/// Point-in-time copy of all counters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub docs_built: u64,
    pub docs_rewritten: u64,
    pub docs_deleted: u64,
    pub docs_skipped: u64,
    pub segments_dumped: u64,
    pub merges_completed: u64,
    pub merges_cancelled: u64,
    pub docs_reclaimed: u64,
    pub reclaim_missing_attribute: u64,
    pub postings_truncated: u64,
    pub other: u64,
    pub uptime_secs: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            docs_built: AtomicU64::new(0),
            docs_rewritten: AtomicU64::new(0),
            docs_deleted: AtomicU64::new(0),
            docs_skipped: AtomicU64::new(0),
            segments_dumped: AtomicU64::new(0),
            merges_completed: AtomicU64::new(0),
            merges_cancelled: AtomicU64::new(0),
            docs_reclaimed: AtomicU64::new(0),
            reclaim_missing_attribute: AtomicU64::new(0),
            postings_truncated: AtomicU64::new(0),
            other: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    fn counter(&self, name: &str) -> &AtomicU64 {
        match name {
            DOCS_BUILT => &self.docs_built,
            DOCS_REWRITTEN => &self.docs_rewritten,
            DOCS_DELETED => &self.docs_deleted,
            DOCS_SKIPPED => &self.docs_skipped,
            SEGMENTS_DUMPED => &self.segments_dumped,
            MERGES_COMPLETED => &self.merges_completed,
            MERGES_CANCELLED => &self.merges_cancelled,
            DOCS_RECLAIMED => &self.docs_reclaimed,
            RECLAIM_MISSING_ATTRIBUTE => &self.reclaim_missing_attribute,
            POSTINGS_TRUNCATED => &self.postings_truncated,
            _ => &self.other,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            docs_built: load(&self.docs_built),
            docs_rewritten: load(&self.docs_rewritten),
            docs_deleted: load(&self.docs_deleted),
            docs_skipped: load(&self.docs_skipped),
            segments_dumped: load(&self.segments_dumped),
            merges_completed: load(&self.merges_completed),
            merges_cancelled: load(&self.merges_cancelled),
            docs_reclaimed: load(&self.docs_reclaimed),
            reclaim_missing_attribute: load(&self.reclaim_missing_attribute),
            postings_truncated: load(&self.postings_truncated),
            other: load(&self.other),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for Metrics {
    fn increase(&self, counter: &str, delta: u64) {
        self.counter(counter).fetch_add(delta, Ordering::Relaxed);
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_named_counters() {
        let m = Metrics::new();
        m.increase(DOCS_BUILT, 5);
        m.increase(DOCS_RECLAIMED, 2);
        m.increase(POSTINGS_TRUNCATED, 1);
        m.increase("something_else", 9);

        let snap = m.snapshot();
        assert_eq!(snap.docs_built, 5);
        assert_eq!(snap.docs_reclaimed, 2);
        assert_eq!(snap.postings_truncated, 1);
        assert_eq!(snap.other, 9);
        assert_eq!(snap.merges_completed, 0);
    }

    #[test]
    fn test_report_without_sink_is_noop() {
        let sink: SharedSink = None;
        report(&sink, DOCS_RECLAIMED, 10);
    }

    #[test]
    fn test_report_through_shared_sink() {
        let metrics = Arc::new(Metrics::new());
        let sink: SharedSink = Some(metrics.clone());
        report(&sink, MERGES_COMPLETED, 1);
        report(&sink, MERGES_COMPLETED, 0);
        assert_eq!(metrics.snapshot().merges_completed, 1);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        m.increase(DOCS_BUILT, 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().docs_built, 4000);
    }
}
