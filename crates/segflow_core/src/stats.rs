//! Engine statistics.
//!
//! Counters are bumped by the operators, sorts and group-bys running on an
//! [`Engine`](crate::Engine) and can be read while work is in progress.
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = Engine::new(Config::default())?;
//! // ... run a sort ...
//! let stats = engine.stats().snapshot();
//! println!("sorted {} rows in {} segments", stats.rows_sorted, stats.segments_sorted);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine-wide counters.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct EngineStats {
    batches_emitted: AtomicU64,
    rows_materialized: AtomicU64,
    rows_sorted: AtomicU64,
    segments_sorted: AtomicU64,
    segments_copied: AtomicU64,
    rows_partitioned: AtomicU64,
    chunks_flushed: AtomicU64,
    rows_spilled: AtomicU64,
    rows_merged: AtomicU64,
    rows_deduplicated: AtomicU64,
}

impl EngineStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_batch(&self, rows: u64) {
        self.batches_emitted.fetch_add(1, Ordering::Relaxed);
        self.rows_materialized.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn record_sorted_segment(&self, rows: u64) {
        self.segments_sorted.fetch_add(1, Ordering::Relaxed);
        self.rows_sorted.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn record_copied_segment(&self) {
        self.segments_copied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_partitioned(&self, rows: u64) {
        self.rows_partitioned.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn record_chunk(&self, rows: u64) {
        self.chunks_flushed.fetch_add(1, Ordering::Relaxed);
        self.rows_spilled.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn record_merged(&self, rows: u64) {
        self.rows_merged.fetch_add(rows, Ordering::Relaxed);
    }

    pub(crate) fn record_deduplicated(&self, rows: u64) {
        self.rows_deduplicated.fetch_add(rows, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of batches drained by sinks.
    pub fn batches_emitted(&self) -> u64 {
        self.batches_emitted.load(Ordering::Relaxed)
    }

    /// Returns the number of rows written by sinks.
    pub fn rows_materialized(&self) -> u64 {
        self.rows_materialized.load(Ordering::Relaxed)
    }

    /// Returns the number of rows sorted in memory.
    pub fn rows_sorted(&self) -> u64 {
        self.rows_sorted.load(Ordering::Relaxed)
    }

    /// Returns the number of segments sorted in memory.
    pub fn segments_sorted(&self) -> u64 {
        self.segments_sorted.load(Ordering::Relaxed)
    }

    /// Returns the number of segments written without sorting.
    pub fn segments_copied(&self) -> u64 {
        self.segments_copied.load(Ordering::Relaxed)
    }

    /// Returns the number of rows scattered into key ranges.
    pub fn rows_partitioned(&self) -> u64 {
        self.rows_partitioned.load(Ordering::Relaxed)
    }

    /// Returns the number of sorted chunks flushed by group-by buckets.
    pub fn chunks_flushed(&self) -> u64 {
        self.chunks_flushed.load(Ordering::Relaxed)
    }

    /// Returns the number of rows written to bucket chunks.
    pub fn rows_spilled(&self) -> u64 {
        self.rows_spilled.load(Ordering::Relaxed)
    }

    /// Returns the number of rows produced by k-way merges.
    pub fn rows_merged(&self) -> u64 {
        self.rows_merged.load(Ordering::Relaxed)
    }

    /// Returns the number of rows dropped as duplicates.
    pub fn rows_deduplicated(&self) -> u64 {
        self.rows_deduplicated.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            batches_emitted: self.batches_emitted(),
            rows_materialized: self.rows_materialized(),
            rows_sorted: self.rows_sorted(),
            segments_sorted: self.segments_sorted(),
            segments_copied: self.segments_copied(),
            rows_partitioned: self.rows_partitioned(),
            chunks_flushed: self.chunks_flushed(),
            rows_spilled: self.rows_spilled(),
            rows_merged: self.rows_merged(),
            rows_deduplicated: self.rows_deduplicated(),
        }
    }
}

/// A point-in-time snapshot of engine statistics.
///
/// Unlike `EngineStats`, this is a plain struct that can be serialized,
/// compared, or passed across threads without atomics.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize)]
pub struct StatsSnapshot {
    /// Batches drained by sinks.
    pub batches_emitted: u64,
    /// Rows written by sinks.
    pub rows_materialized: u64,
    /// Rows sorted in memory.
    pub rows_sorted: u64,
    /// Segments sorted in memory.
    pub segments_sorted: u64,
    /// Segments written without sorting: flagged presorted or found in order.
    pub segments_copied: u64,
    /// Rows scattered into key ranges.
    pub rows_partitioned: u64,
    /// Sorted chunks flushed by group-by buckets.
    pub chunks_flushed: u64,
    /// Rows written to bucket chunks.
    pub rows_spilled: u64,
    /// Rows produced by k-way merges.
    pub rows_merged: u64,
    /// Rows dropped as duplicates.
    pub rows_deduplicated: u64,
}

impl StatsSnapshot {
    /// Returns the difference between this snapshot and an earlier one.
    #[must_use]
    pub fn delta(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            batches_emitted: self.batches_emitted.saturating_sub(earlier.batches_emitted),
            rows_materialized: self
                .rows_materialized
                .saturating_sub(earlier.rows_materialized),
            rows_sorted: self.rows_sorted.saturating_sub(earlier.rows_sorted),
            segments_sorted: self.segments_sorted.saturating_sub(earlier.segments_sorted),
            segments_copied: self.segments_copied.saturating_sub(earlier.segments_copied),
            rows_partitioned: self.rows_partitioned.saturating_sub(earlier.rows_partitioned),
            chunks_flushed: self.chunks_flushed.saturating_sub(earlier.chunks_flushed),
            rows_spilled: self.rows_spilled.saturating_sub(earlier.rows_spilled),
            rows_merged: self.rows_merged.saturating_sub(earlier.rows_merged),
            rows_deduplicated: self
                .rows_deduplicated
                .saturating_sub(earlier.rows_deduplicated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = EngineStats::new();
        stats.record_batch(10);
        stats.record_batch(5);
        stats.record_sorted_segment(100);
        stats.record_chunk(7);

        assert_eq!(stats.batches_emitted(), 2);
        assert_eq!(stats.rows_materialized(), 15);
        assert_eq!(stats.segments_sorted(), 1);
        assert_eq!(stats.rows_sorted(), 100);
        assert_eq!(stats.chunks_flushed(), 1);
        assert_eq!(stats.rows_spilled(), 7);
    }

    #[test]
    fn snapshot_delta() {
        let stats = EngineStats::new();
        stats.record_merged(4);
        let before = stats.snapshot();
        stats.record_merged(6);
        stats.record_deduplicated(2);
        let delta = stats.snapshot().delta(&before);
        assert_eq!(delta.rows_merged, 6);
        assert_eq!(delta.rows_deduplicated, 2);
        assert_eq!(delta.rows_sorted, 0);
    }
}
