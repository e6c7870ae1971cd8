//! Per-test metrics and the run-wide statistics aggregator owned exclusively by the Collector.

use std::time::Duration;

/// Per-test accumulator. Durations compose additively across all RPC calls made for a single
/// test; the two counters distinguish the comparator's fast path from its detailed-diff path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TestMetrics {
    /// Total round-trip time across all RPC calls for this test.
    pub(crate) round_trip_time: Duration,
    /// Total time spent serializing requests / diff artifacts.
    pub(crate) marshalling_time: Duration,
    /// Total time spent deserializing fixtures and responses.
    pub(crate) unmarshalling_time: Duration,
    /// Number of structural diffs attempted by a diff backend.
    pub(crate) comparison_count: u64,
    /// Number of fast-path byte-equal matches.
    pub(crate) equal_count: u64,
}

impl TestMetrics {
    /// Folds `other` into `self`, summing every field.
    pub(crate) fn merge(&mut self, other: TestMetrics) {
        self.round_trip_time += other.round_trip_time;
        self.marshalling_time += other.marshalling_time;
        self.unmarshalling_time += other.unmarshalling_time;
        self.comparison_count += other.comparison_count;
        self.equal_count += other.equal_count;
    }
}

/// The aggregate statistics for a run, accumulated across all loop iterations. Owned
/// exclusively by the Collector task; the scheduler increments only its own `scheduled` /
/// `skipped` counters, which live here for single-writer convenience but are never read or
/// written concurrently by more than one task at a time.
#[derive(Debug, Clone, Default)]
pub(crate) struct Statistics {
    /// Number of tests that completed successfully.
    pub(crate) success: u64,
    /// Number of tests that completed with a failure.
    pub(crate) failure: u64,
    /// Number of tests that were skipped by the filter.
    pub(crate) skipped: u64,
    /// Number of tests submitted to the scheduler.
    pub(crate) scheduled: u64,
    /// Sum of per-test metrics across every executed test.
    pub(crate) metrics: TestMetrics,
}

impl Statistics {
    /// Number of tests actually executed (success + failure).
    pub(crate) fn executed(&self) -> u64 {
        self.success + self.failure
    }

    /// Records the outcome of one executed test.
    pub(crate) fn record(&mut self, success: bool, metrics: TestMetrics) {
        if success {
            self.success += 1;
        } else {
            self.failure += 1;
        }
        self.metrics.merge(metrics);
    }

    /// Records a skipped test.
    pub(crate) fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    /// Records a scheduled (submitted) test.
    pub(crate) fn record_scheduled(&mut self) {
        self.scheduled += 1;
    }
}
