//! Client-advertised credit meter.
//!
//! A token bucket of bytes the remote endpoint has granted. The meter is on
//! the hot dispatch path and is read lock-free; only the crossing check in
//! [`CreditMeter::grant`] carries ordering significance.
//!
//! Reservation is byte-exact but post-send: `try_reserve` only checks the
//! counter is positive, and the actual packet size is subtracted after the
//! wire write. The counter therefore legitimately goes negative by up to one
//! packet.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// The client-advertised byte allowance.
///
/// Either bounded (a signed counter of bytes) or unlimited (no throttle).
/// A meter starts bounded at zero; the client must grant credit before the
/// first dispatch. Switching to unlimited is one-way.
#[derive(Debug)]
pub struct CreditMeter {
    /// Set once the client disables flow control (`receive_credits(-1)`).
    unlimited: AtomicBool,
    /// Remaining bytes; meaningful only while bounded. Padded so the hot
    /// counter does not share a cache line with the consumer's mutex.
    credits: CachePadded<AtomicI64>,
}

impl CreditMeter {
    /// Creates a bounded meter with zero credit.
    pub fn bounded() -> Self {
        Self {
            unlimited: AtomicBool::new(false),
            credits: CachePadded::new(AtomicI64::new(0)),
        }
    }

    /// Returns `true` if the meter no longer throttles.
    #[inline]
    pub fn is_unlimited(&self) -> bool {
        self.unlimited.load(Ordering::Acquire)
    }

    /// Returns `true` iff a send may proceed right now.
    ///
    /// No bytes are reserved; the exact packet size is subtracted after the
    /// send via [`consume`](Self::consume).
    #[inline]
    pub fn try_reserve(&self) -> bool {
        self.is_unlimited() || self.credits.load(Ordering::Acquire) > 0
    }

    /// Subtracts the size of a sent packet.
    #[inline]
    pub fn consume(&self, bytes: usize) {
        if !self.is_unlimited() {
            self.credits.fetch_sub(bytes as i64, Ordering::AcqRel);
        }
    }

    /// Adds client-granted bytes.
    ///
    /// Returns `true` iff the counter crossed from non-positive to positive,
    /// which is the edge on which the consumer must prompt the queue.
    pub fn grant(&self, bytes: usize) -> bool {
        if self.is_unlimited() {
            return false;
        }
        let previous = self.credits.fetch_add(bytes as i64, Ordering::AcqRel);
        previous <= 0 && previous + bytes as i64 > 0
    }

    /// Switches the meter to unlimited mode.
    pub fn disable(&self) {
        self.unlimited.store(true, Ordering::Release);
    }

    /// Zeroes the bounded counter (slow-consumer throttle).
    pub fn reset(&self) {
        self.credits.store(0, Ordering::Release);
    }

    /// Remaining bytes, or `None` when unlimited.
    pub fn available(&self) -> Option<i64> {
        if self.is_unlimited() {
            None
        } else {
            Some(self.credits.load(Ordering::Acquire))
        }
    }
}
