//! Reusable count latch for tracking in-flight deliveries.
//!
//! Every accepted dispatch counts the latch up; every completed (or failed)
//! wire write counts it down. `stop` and `close` wait on zero so no send is
//! in flight when the consumer is reported stopped.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::invariants::debug_assert_latch_balanced;

/// A counting latch that can be awaited at zero with a deadline.
#[derive(Debug, Default)]
pub struct CountLatch {
    count: Mutex<u64>,
    zeroed: Condvar,
}

impl CountLatch {
    /// Creates a latch at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the count.
    pub fn count_up(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count += 1;
    }

    /// Decrements the count, waking waiters when it reaches zero.
    pub fn count_down(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert_latch_balanced!(*count);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.zeroed.notify_all();
        }
    }

    /// Current count.
    pub fn count(&self) -> u64 {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until the count reaches zero or the deadline passes.
    ///
    /// Returns `true` if the latch reached zero in time.
    pub fn await_zero(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            let (guard, result) = self
                .zeroed
                .wait_timeout(count, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            count = guard;
            if result.timed_out() && *count > 0 {
                return false;
            }
        }
        true
    }
}
