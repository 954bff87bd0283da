//! Stress helpers for the shared-state primitives.
//!
//! These drive the block cache and the sort byte budget from many threads
//! at once and report what they observed.

use segflow_core::parallel::ByteBudget;
use segflow_storage::BlockCache;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Size of written values in bytes.
    pub value_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 200,
            threads: 4,
            value_size: 256,
        }
    }
}

/// Value written under `key` by the stress helpers.
pub fn stress_value(key: &str, size: usize) -> Vec<u8> {
    key.bytes().cycle().take(size.max(1)).collect()
}

/// Each thread writes its own keys, then reads every one back.
///
/// A write rejection or a read returning different bytes counts as a
/// failure.
pub fn stress_cache_write_read(cache: &BlockCache, config: &StressConfig) -> StressTestResult {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for t in 0..config.threads {
            let (successful, failed) = (&successful, &failed);
            scope.spawn(move || {
                let mut out = Vec::new();
                for i in 0..config.operations {
                    let key = format!("t{t}-k{i}");
                    let value = stress_value(&key, config.value_size);
                    let ok = cache.write(&key, &value)
                        && cache.read(&key, &mut out) == Some(value.len())
                        && out == value;
                    let counter = if ok { successful } else { failed };
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Every thread writes the same keys with its own value.
///
/// Returns the number of writes that reported success. Exactly one writer
/// per key should win; the stored value must be that winner's.
pub fn stress_cache_contended_writes(cache: &BlockCache, config: &StressConfig) -> usize {
    let winners = AtomicUsize::new(0);
    thread::scope(|scope| {
        for t in 0..config.threads {
            let winners = &winners;
            scope.spawn(move || {
                for i in 0..config.operations {
                    let key = format!("shared-{i}");
                    let value = stress_value(&format!("{key}-{t}"), config.value_size);
                    if cache.write(&key, &value) {
                        winners.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });
    winners.load(Ordering::Relaxed)
}

/// Threads repeatedly reserve `sizes[i % sizes.len()]` bytes from `budget`
/// and hold each reservation briefly.
///
/// Returns the highest in-flight total observed while a reservation was
/// held.
pub fn stress_budget(budget: &ByteBudget, sizes: &[u64], config: &StressConfig) -> u64 {
    let peak = AtomicU64::new(0);
    thread::scope(|scope| {
        for t in 0..config.threads {
            let peak = &peak;
            scope.spawn(move || {
                for i in 0..config.operations {
                    let size = sizes[(t + i) % sizes.len()];
                    let _guard = budget.acquire(size);
                    peak.fetch_max(budget.in_flight(), Ordering::Relaxed);
                    thread::yield_now();
                }
            });
        }
    });
    peak.load(Ordering::Relaxed)
}
