//! Monotonic, lock-free job counters, serialised to the job directory's
//! `.result` file on completion.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic counters tracking one job's progress. Cheap to share: every
/// field is an independent atomic, so concurrent workers never contend on
/// a lock to report an outcome.
#[derive(Default)]
pub struct Metric {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    skip: AtomicU64,
    overwrite: AtomicU64,
    not_overwrite: AtomicU64,
    exist: AtomicU64,
    update: AtomicU64,
    start_unix_ms: AtomicI64,
    end_unix_ms: AtomicI64,
}

/// A point-in-time, serialisable snapshot of [`Metric`], written to the
/// job directory's `.result` file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Items emitted by the work provider.
    pub total: u64,
    /// Items that completed successfully.
    pub success: u64,
    /// Items that failed.
    pub failure: u64,
    /// Items skipped (filtered or already-done).
    pub skip: u64,
    /// Destinations overwritten.
    pub overwrite: u64,
    /// Destinations left untouched because overwrite was declined.
    pub not_overwrite: u64,
    /// Destinations that already existed prior to the call.
    pub exist: u64,
    /// Destinations whose metadata was updated rather than replaced.
    pub update: u64,
    /// Job start time, Unix epoch milliseconds.
    pub start_unix_ms: i64,
    /// Job end time, Unix epoch milliseconds; zero while the job is running.
    pub end_unix_ms: i64,
}

impl MetricSnapshot {
    /// The number of items that have reached a terminal state so far.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.success + self.failure + self.skip + self.not_overwrite + self.overwrite + self.exist + self.update
    }
}

impl Metric {
    /// Builds a fresh, zeroed metric with no start time recorded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records job start, in epoch milliseconds supplied by the caller
    /// (kept out of this crate so tests stay deterministic).
    pub fn start(&self, now_unix_ms: i64) {
        self.start_unix_ms.store(now_unix_ms, Ordering::SeqCst);
    }

    /// Records job end.
    pub fn end(&self, now_unix_ms: i64) {
        self.end_unix_ms.store(now_unix_ms, Ordering::SeqCst);
    }

    /// Increments the total-emitted counter.
    pub fn add_total(&self, n: u64) {
        self.total.fetch_add(n, Ordering::SeqCst);
    }

    /// Increments the success counter.
    pub fn add_success(&self) {
        self.success.fetch_add(1, Ordering::SeqCst);
    }

    /// Increments the failure counter.
    pub fn add_failure(&self) {
        self.failure.fetch_add(1, Ordering::SeqCst);
    }

    /// Increments the skip counter.
    pub fn add_skip(&self) {
        self.skip.fetch_add(1, Ordering::SeqCst);
    }

    /// Increments the overwrite counter.
    pub fn add_overwrite(&self) {
        self.overwrite.fetch_add(1, Ordering::SeqCst);
    }

    /// Increments the not-overwrite counter.
    pub fn add_not_overwrite(&self) {
        self.not_overwrite.fetch_add(1, Ordering::SeqCst);
    }

    /// Increments the exist counter.
    pub fn add_exist(&self) {
        self.exist.fetch_add(1, Ordering::SeqCst);
    }

    /// Increments the update counter.
    pub fn add_update(&self) {
        self.update.fetch_add(1, Ordering::SeqCst);
    }

    /// Takes a consistent-enough snapshot for reporting. Individual fields
    /// may be read at slightly different instants under concurrent
    /// updates; callers needing a single atomic view should quiesce
    /// workers first.
    #[must_use]
    pub fn snapshot(&self) -> MetricSnapshot {
        MetricSnapshot {
            total: self.total.load(Ordering::SeqCst),
            success: self.success.load(Ordering::SeqCst),
            failure: self.failure.load(Ordering::SeqCst),
            skip: self.skip.load(Ordering::SeqCst),
            overwrite: self.overwrite.load(Ordering::SeqCst),
            not_overwrite: self.not_overwrite.load(Ordering::SeqCst),
            exist: self.exist.load(Ordering::SeqCst),
            update: self.update.load(Ordering::SeqCst),
            start_unix_ms: self.start_unix_ms.load(Ordering::SeqCst),
            end_unix_ms: self.end_unix_ms.load(Ordering::SeqCst),
        }
    }
}
