//! Debug assertion macros for delivery invariants.
//!
//! Active only in debug builds (`debug_assert!`), so release dispatch pays
//! nothing. Used by the ledger, the streamer, and the pending-delivery latch.

/// Assert that a message id is not already in the in-flight ledger.
///
/// A reference is in the ledger at most once: it enters on accept and leaves
/// on acknowledge, cancel, or reject, and no path re-appends without first
/// removing.
macro_rules! debug_assert_ledger_unique {
    ($ledger:expr, $id:expr) => {
        debug_assert!(
            !$ledger.contains($id),
            "message {} already in the in-flight ledger",
            $id
        )
    };
}

/// Assert that no streamer is active when one is about to be installed.
///
/// At most one large message streams per consumer; the dispatch machine
/// returns `Busy` while one is active, so a second install is a logic error.
macro_rules! debug_assert_streamer_absent {
    ($streamer:expr) => {
        debug_assert!(
            $streamer.is_none(),
            "second large-message streamer installed while one is active"
        )
    };
}

/// Assert that the pending-delivery latch never goes below zero.
///
/// Every `count_down` must pair with an earlier `count_up`; an unpaired
/// decrement means a delivery completed that was never dispatched.
macro_rules! debug_assert_latch_balanced {
    ($count:expr) => {
        debug_assert!($count > 0, "pending-delivery latch decremented below zero")
    };
}

pub(crate) use debug_assert_latch_balanced;
pub(crate) use debug_assert_ledger_unique;
pub(crate) use debug_assert_streamer_absent;
