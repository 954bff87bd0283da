//! Block cache counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing block cache activity.
///
/// All counters are relaxed atomics and may be read while the cache is in use.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Reads served by an already-open file handle.
    handle_hits: AtomicU64,
    /// Reads that had to open the backing file.
    handle_misses: AtomicU64,
    /// Cached handles found unusable and purged.
    stale_handles: AtomicU64,
    /// Keys removed by capacity pressure or explicit eviction.
    evictions: AtomicU64,
    /// Successful writes.
    writes: AtomicU64,
    /// Total bytes written.
    bytes_written: AtomicU64,
    /// Total bytes read.
    bytes_read: AtomicU64,
}

impl CacheStats {
    /// Number of reads served by a cached handle.
    pub fn handle_hits(&self) -> u64 {
        self.handle_hits.load(Ordering::Relaxed)
    }

    /// Number of reads that opened the backing file.
    pub fn handle_misses(&self) -> u64 {
        self.handle_misses.load(Ordering::Relaxed)
    }

    /// Number of stale handles purged.
    pub fn stale_handles(&self) -> u64 {
        self.stale_handles.load(Ordering::Relaxed)
    }

    /// Number of evicted keys.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Number of successful writes.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Total bytes written.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Total bytes read.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub(crate) fn record_handle_hit(&self) {
        self.handle_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handle_miss(&self) {
        self.handle_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale_handle(&self) {
        self.stale_handles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, bytes: usize) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self, bytes: usize) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}
