//! Fixed-size worker pool.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

/// A fixed-size pool of worker threads.
///
/// Work is synchronous: a worker blocks on I/O. Tasks are claimed from a
/// shared atomic counter so each index is processed exactly once, in
/// roughly ascending order.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    num_threads: usize,
}

impl WorkerPool {
    /// Creates a pool with `num_threads` workers.
    ///
    /// # Errors
    ///
    /// Returns an error if the threads cannot be spawned.
    pub fn new(num_threads: usize) -> CoreResult<Self> {
        let num_threads = num_threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("segflow-worker-{i}"))
            .build()
            .map_err(|e| CoreError::invalid_config(format!("cannot build worker pool: {e}")))?;
        debug!(num_threads, "worker pool started");
        Ok(Self { pool, num_threads })
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Runs `task(i)` for every `i` in `0..count` on the pool and waits for
    /// all of them.
    ///
    /// Workers claim indices one at a time. After the first failure no new
    /// index is claimed; tasks already running finish. A panicking task
    /// propagates the panic to the caller.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by a task.
    pub fn run_indexed<F>(&self, count: usize, task: F) -> CoreResult<()>
    where
        F: Fn(usize) -> CoreResult<()> + Sync,
    {
        if count == 0 {
            return Ok(());
        }
        let next = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let first_error: Mutex<Option<CoreError>> = Mutex::new(None);
        let workers = self.num_threads.min(count);

        self.pool.scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|_| loop {
                    if failed.load(Ordering::Acquire) {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::AcqRel);
                    if i >= count {
                        break;
                    }
                    if let Err(e) = task(i) {
                        failed.store(true, Ordering::Release);
                        first_error.lock().get_or_insert(e);
                        break;
                    }
                });
            }
        });

        match first_error.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("num_threads", &self.num_threads)
            .finish()
    }
}
