//! Reference counters that latch at zero.
//!
//! Both counters track a non-negative count with one extra rule: once the count reaches zero it
//! stays zero.  `increment_if_not_zero` refuses to revive a dead count, which is what makes these
//! usable for reference counting schemes where "the last reference dropped" must be a one-way
//! transition (weak-to-strong upgrades, object reclamation, and similar).
//!
//! [`LockFreeStickyCounter`] is the straightforward CAS-loop version.  [`WaitFreeStickyCounter`]
//! has the same external contract but completes every operation in a bounded number of atomic
//! read-modify-writes, paying for it with two reserved flag bits in the counter word.
//!
//! All operations are relaxed: the counter carries no data-publication responsibility.  Callers
//! that free a resource when `decrement` reports the latch must order that access themselves.

use crate::sync::{AtomicU64, Ordering};

/// A lock-free zero-sticky reference counter.
///
/// `increment_if_not_zero` runs a CAS loop, so a stream of contending updates can starve one
/// thread; at least one thread always makes progress.
pub struct LockFreeStickyCounter {
    counter: AtomicU64,
}

impl LockFreeStickyCounter {
    /// Create a counter holding `initial`.
    pub fn new(initial: u64) -> Self {
        Self {
            counter: AtomicU64::new(initial),
        }
    }

    /// Increment the counter, unless it already reached zero.
    ///
    /// Returns true if the increment happened.  Once any call observes zero the counter can never
    /// leave zero again: every later call also observes zero and declines.
    pub fn increment_if_not_zero(&self) -> bool {
        let mut value = self.counter.load(Ordering::Relaxed);
        while value != 0 {
            match self.counter.compare_exchange_weak(
                value,
                value + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) => value = current,
            }
        }
        false
    }

    /// Decrement the counter.
    ///
    /// Returns true for exactly the call that took the counter to zero.  Calls must be balanced
    /// against the initial value plus successful increments; decrementing past zero wraps the
    /// underlying word and is a caller bug.
    pub fn decrement(&self) -> bool {
        self.counter.fetch_sub(1, Ordering::Relaxed) == 1
    }

    /// The current count.
    pub fn read(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for LockFreeStickyCounter {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Counter has latched to zero.
const ZERO: u64 = 1 << 63;
/// A reader latched the counter on a decrementer's behalf and the "reached zero" report is owed.
const HELPED: u64 = 1 << 62;

/// A wait-free zero-sticky reference counter.
///
/// Same contract as [`LockFreeStickyCounter`], but every operation finishes in a bounded number
/// of atomic operations regardless of contention.  The trick is that zero is recorded as a
/// monotonic flag bit rather than as the numeric value 0: `increment_if_not_zero` can then be an
/// unconditional `fetch_add` whose result is judged by the flag alone, with no undo and no loop.
///
/// Once the `ZERO` flag is set the low 62 bits of the word are meaningless and are never
/// surfaced; `read` reports 0 for any latched word.
pub struct WaitFreeStickyCounter {
    counter: AtomicU64,
}

impl WaitFreeStickyCounter {
    /// Create a counter holding `initial`.
    ///
    /// # Panics
    ///
    /// Panics if `initial` collides with the flag bits, i.e. `initial >= 1 << 62`.
    pub fn new(initial: u64) -> Self {
        assert!(
            initial & (ZERO | HELPED) == 0,
            "initial count must fit in 62 bits"
        );
        Self {
            counter: AtomicU64::new(initial),
        }
    }

    /// Increment the counter, unless it already reached zero.
    ///
    /// A single `fetch_add`.  If the counter had already latched, the add bumps the dead low bits
    /// but the flag stays set, so the call is correctly reported as failed and the stale bits are
    /// never read.
    pub fn increment_if_not_zero(&self) -> bool {
        self.counter.fetch_add(1, Ordering::Relaxed) & ZERO == 0
    }

    /// Decrement the counter.
    ///
    /// Returns true for exactly one call over the counter's lifetime: the one credited with
    /// reaching zero.  A decrement that drives the numeric field to 0 may still lose the latch to
    /// a concurrent `increment_if_not_zero`; externally that is indistinguishable from the
    /// increment having happened first, so the call reports false.
    pub fn decrement(&self) -> bool {
        if self.counter.fetch_sub(1, Ordering::Relaxed) == 1 {
            let current = self.counter.load(Ordering::Relaxed);
            match self
                .counter
                .compare_exchange(current, ZERO, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return true,
                // A reader beat us to the latch and left HELPED up for us; take the credit (the
                // exchange settles which decrementer gets it if several race here).
                Err(actual) => {
                    if actual & HELPED != 0 && self.counter.swap(ZERO, Ordering::Relaxed) & HELPED != 0
                    {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// The current count, 0 if latched.
    ///
    /// A read that observes the word mid-transition (numerically 0 but not yet flagged) helps by
    /// latching it, setting `HELPED` so the decrementer still gets its unique report.
    pub fn read(&self) -> u64 {
        let mut value = self.counter.load(Ordering::Relaxed);
        if value == 0 {
            match self.counter.compare_exchange(
                0,
                ZERO | HELPED,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return 0,
                Err(actual) => value = actual,
            }
        }
        if value & ZERO != 0 {
            0
        } else {
            value
        }
    }
}

impl Default for WaitFreeStickyCounter {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sync::{spawn, wrap_test};

    // Both counters expose the same contract; the suite runs each test against both through this
    // trait.
    trait Counter: Send + Sync + 'static {
        fn with_count(initial: u64) -> Self;
        fn increment_if_not_zero(&self) -> bool;
        fn decrement(&self) -> bool;
        fn read(&self) -> u64;
    }

    impl Counter for LockFreeStickyCounter {
        fn with_count(initial: u64) -> Self {
            Self::new(initial)
        }
        fn increment_if_not_zero(&self) -> bool {
            self.increment_if_not_zero()
        }
        fn decrement(&self) -> bool {
            self.decrement()
        }
        fn read(&self) -> u64 {
            self.read()
        }
    }

    impl Counter for WaitFreeStickyCounter {
        fn with_count(initial: u64) -> Self {
            Self::new(initial)
        }
        fn increment_if_not_zero(&self) -> bool {
            self.increment_if_not_zero()
        }
        fn decrement(&self) -> bool {
            self.decrement()
        }
        fn read(&self) -> u64 {
            self.read()
        }
    }

    fn increment_works<C: Counter>() {
        let counter = C::with_count(1);
        assert_eq!(counter.read(), 1);
        assert!(counter.increment_if_not_zero());
        assert_eq!(counter.read(), 2);
    }

    fn increment_fails_after_latch<C: Counter>() {
        let counter = C::with_count(1);
        assert!(counter.decrement());
        assert_eq!(counter.read(), 0);
        assert!(!counter.increment_if_not_zero());
        assert_eq!(counter.read(), 0);
    }

    fn only_the_last_decrement_reports<C: Counter>() {
        let counter = C::with_count(1);
        assert!(counter.increment_if_not_zero());
        assert!(!counter.decrement());
        assert!(counter.decrement());
        assert_eq!(counter.read(), 0);
    }

    /// Two threads decrement a count of two; exactly one of them must be credited with the latch.
    fn racing_decrements_latch_once<C: Counter>() {
        let counter = Arc::new(C::with_count(2));

        let threads: Vec<_> = (0..2)
            .map(|_| {
                let counter = counter.clone();
                spawn(move || counter.decrement())
            })
            .collect();

        let reports = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|&reported| reported)
            .count();

        assert_eq!(reports, 1);
        assert_eq!(counter.read(), 0);
        assert!(!counter.increment_if_not_zero());
    }

    /// A decrement to zero racing a read must still produce exactly one latch report, even when
    /// the read is the one that flips the flag.
    fn read_may_help_but_never_steals_the_report<C: Counter>() {
        let counter = Arc::new(C::with_count(1));

        let decrementer = {
            let counter = counter.clone();
            spawn(move || counter.decrement())
        };
        let reader = {
            let counter = counter.clone();
            spawn(move || counter.read())
        };

        assert!(decrementer.join().unwrap());
        let observed = reader.join().unwrap();
        assert!(observed == 0 || observed == 1, "read saw {observed}");
        assert_eq!(counter.read(), 0);
    }

    #[test]
    fn lock_free_increment_works() {
        wrap_test(increment_works::<LockFreeStickyCounter>);
    }

    #[test]
    fn wait_free_increment_works() {
        wrap_test(increment_works::<WaitFreeStickyCounter>);
    }

    #[test]
    fn lock_free_increment_fails_after_latch() {
        wrap_test(increment_fails_after_latch::<LockFreeStickyCounter>);
    }

    #[test]
    fn wait_free_increment_fails_after_latch() {
        wrap_test(increment_fails_after_latch::<WaitFreeStickyCounter>);
    }

    #[test]
    fn lock_free_only_the_last_decrement_reports() {
        wrap_test(only_the_last_decrement_reports::<LockFreeStickyCounter>);
    }

    #[test]
    fn wait_free_only_the_last_decrement_reports() {
        wrap_test(only_the_last_decrement_reports::<WaitFreeStickyCounter>);
    }

    #[test]
    fn lock_free_racing_decrements_latch_once() {
        wrap_test(racing_decrements_latch_once::<LockFreeStickyCounter>);
    }

    #[test]
    fn wait_free_racing_decrements_latch_once() {
        wrap_test(racing_decrements_latch_once::<WaitFreeStickyCounter>);
    }

    #[test]
    fn lock_free_read_may_help() {
        wrap_test(read_may_help_but_never_steals_the_report::<LockFreeStickyCounter>);
    }

    #[test]
    fn wait_free_read_may_help() {
        wrap_test(read_may_help_but_never_steals_the_report::<WaitFreeStickyCounter>);
    }

    #[cfg(not(loom))]
    mod hammer {
        use super::super::{LockFreeStickyCounter, WaitFreeStickyCounter};
        use super::{Arc, Counter};

        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::thread::spawn;

        fn concurrent_increments_all_land<C: Counter>() {
            const THREADS: u64 = 8;
            const INCREMENTS: u64 = 10000;

            let counter = Arc::new(C::with_count(1));

            let threads: Vec<_> = (0..THREADS)
                .map(|_| {
                    let counter = counter.clone();
                    spawn(move || {
                        for _ in 0..INCREMENTS {
                            assert!(counter.increment_if_not_zero());
                        }
                    })
                })
                .collect();
            for t in threads {
                t.join().unwrap();
            }

            assert_eq!(counter.read(), 1 + THREADS * INCREMENTS);
        }

        /// Spread a large count over many decrementing threads; exactly one call in the whole run
        /// may report the latch, and afterwards the counter is dead.
        fn decrements_latch_exactly_once<C: Counter>() {
            const START: u64 = 10000;
            const THREADS: u64 = 8;

            let counter = Arc::new(C::with_count(START));
            let reports = Arc::new(AtomicUsize::new(0));

            let threads: Vec<_> = (0..THREADS)
                .map(|_| {
                    let counter = counter.clone();
                    let reports = reports.clone();
                    spawn(move || {
                        for _ in 0..START / THREADS {
                            if counter.decrement() {
                                reports.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    })
                })
                .collect();
            for t in threads {
                t.join().unwrap();
            }

            assert_eq!(reports.load(Ordering::Relaxed), 1);
            assert_eq!(counter.read(), 0);
            assert!(!counter.increment_if_not_zero());
            assert_eq!(counter.read(), 0);
        }

        fn mixed_operations_do_not_wedge<C: Counter>() {
            const THREADS: usize = 8;
            const OPS: usize = 10000;
            const READERS: usize = 4;

            let counter = Arc::new(C::with_count(1));
            let mut threads = Vec::new();

            for _ in 0..READERS {
                let counter = counter.clone();
                threads.push(spawn(move || {
                    let mut sum = 0u64;
                    for _ in 0..OPS {
                        sum = sum.wrapping_add(counter.read());
                    }
                    sum
                }));
            }
            for _ in 0..THREADS - READERS {
                let counter = counter.clone();
                threads.push(spawn(move || {
                    for op in 0..OPS {
                        if op % 2 == 0 {
                            counter.increment_if_not_zero();
                        } else {
                            counter.decrement();
                        }
                    }
                    0
                }));
            }
            for t in threads {
                t.join().unwrap();
            }
        }

        #[test]
        fn lock_free_concurrent_increments_all_land() {
            concurrent_increments_all_land::<LockFreeStickyCounter>();
        }

        #[test]
        fn wait_free_concurrent_increments_all_land() {
            concurrent_increments_all_land::<WaitFreeStickyCounter>();
        }

        #[test]
        fn lock_free_decrements_latch_exactly_once() {
            decrements_latch_exactly_once::<LockFreeStickyCounter>();
        }

        #[test]
        fn wait_free_decrements_latch_exactly_once() {
            decrements_latch_exactly_once::<WaitFreeStickyCounter>();
        }

        #[test]
        fn lock_free_mixed_operations_do_not_wedge() {
            mixed_operations_do_not_wedge::<LockFreeStickyCounter>();
        }

        #[test]
        fn wait_free_mixed_operations_do_not_wedge() {
            mixed_operations_do_not_wedge::<WaitFreeStickyCounter>();
        }

        #[test]
        fn wait_free_rejects_initial_values_that_collide_with_flags() {
            assert!(std::panic::catch_unwind(|| WaitFreeStickyCounter::new(1 << 62)).is_err());
            assert!(std::panic::catch_unwind(|| WaitFreeStickyCounter::new(1 << 63)).is_err());
        }
    }
}
