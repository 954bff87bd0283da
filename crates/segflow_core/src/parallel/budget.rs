//! Shared byte budget with blocking admission.

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// A pool of bytes that concurrent workers reserve before loading data.
///
/// [`acquire`](Self::acquire) blocks until the request fits. A request
/// larger than the whole budget is admitted once nothing else is in
/// flight, and while it is held no other request is admitted. This keeps
/// memory bounded by `max(limit, largest request)` and guarantees every
/// request eventually runs.
#[derive(Debug)]
pub struct ByteBudget {
    limit: u64,
    in_flight: Mutex<u64>,
    released: Condvar,
}

impl ByteBudget {
    /// Creates a budget of `limit` bytes.
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            in_flight: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    /// Returns the budget size.
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Returns the number of bytes currently reserved.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        *self.in_flight.lock()
    }

    /// Reserves `bytes`, blocking until they fit.
    pub fn acquire(&self, bytes: u64) -> BudgetGuard<'_> {
        let mut in_flight = self.in_flight.lock();
        while !self.admits(*in_flight, bytes) {
            self.released.wait(&mut in_flight);
        }
        *in_flight += bytes;
        if bytes > self.limit {
            debug!(bytes, limit = self.limit, "admitted oversized reservation alone");
        }
        BudgetGuard {
            budget: self,
            bytes,
        }
    }

    /// Reserves `bytes` if they fit right now.
    pub fn try_acquire(&self, bytes: u64) -> Option<BudgetGuard<'_>> {
        let mut in_flight = self.in_flight.lock();
        if !self.admits(*in_flight, bytes) {
            return None;
        }
        *in_flight += bytes;
        Some(BudgetGuard {
            budget: self,
            bytes,
        })
    }

    fn admits(&self, in_flight: u64, bytes: u64) -> bool {
        in_flight == 0 || in_flight.saturating_add(bytes) <= self.limit
    }

    fn release(&self, bytes: u64) {
        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(bytes);
        drop(in_flight);
        self.released.notify_all();
    }
}

/// A reservation on a [`ByteBudget`], returned when dropped.
#[derive(Debug)]
pub struct BudgetGuard<'a> {
    budget: &'a ByteBudget,
    bytes: u64,
}

impl BudgetGuard<'_> {
    /// Returns the number of reserved bytes.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for BudgetGuard<'_> {
    fn drop(&mut self) {
        self.budget.release(self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[test]
    fn reservations_add_up() {
        let budget = ByteBudget::new(100);
        let a = budget.acquire(60);
        assert_eq!(budget.in_flight(), 60);
        assert!(budget.try_acquire(50).is_none());
        let b = budget.try_acquire(40).unwrap();
        assert_eq!(budget.in_flight(), 100);
        drop(a);
        drop(b);
        assert_eq!(budget.in_flight(), 0);
    }

    #[test]
    fn oversized_admitted_only_when_idle() {
        let budget = ByteBudget::new(100);
        let small = budget.acquire(10);
        assert!(budget.try_acquire(500).is_none());
        drop(small);

        let big = budget.acquire(500);
        assert_eq!(big.bytes(), 500);
        assert!(budget.try_acquire(1).is_none());
        assert!(budget.try_acquire(0).is_none());
        drop(big);
        assert!(budget.try_acquire(1).is_some());
    }

    #[test]
    fn blocked_acquire_wakes_on_release() {
        let budget = ByteBudget::new(100);
        let held = budget.acquire(80);
        std::thread::scope(|s| {
            let waiter = s.spawn(|| {
                let g = budget.acquire(50);
                g.bytes()
            });
            std::thread::sleep(Duration::from_millis(20));
            assert!(!waiter.is_finished());
            drop(held);
            assert_eq!(waiter.join().unwrap(), 50);
        });
        assert_eq!(budget.in_flight(), 0);
    }

    #[test]
    fn never_exceeds_limit_under_contention() {
        let budget = ByteBudget::new(100);
        let peak = AtomicU64::new(0);
        std::thread::scope(|s| {
            for t in 0..8u64 {
                let budget = &budget;
                let peak = &peak;
                s.spawn(move || {
                    for _ in 0..50 {
                        let _g = budget.acquire(10 + t * 5);
                        peak.fetch_max(budget.in_flight(), Ordering::Relaxed);
                    }
                });
            }
        });
        assert!(peak.load(Ordering::Relaxed) <= 100);
        assert_eq!(budget.in_flight(), 0);
    }
}
