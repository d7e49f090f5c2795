//! Read-only queue traversal.
//!
//! A browse-only consumer peeks at the queue through a cursor without
//! consuming: references never enter the in-flight ledger and are never
//! acknowledged. Dispatch still runs through the same decision machine, so
//! credit and writability gate wire writes exactly as for a consuming
//! consumer.
//!
//! A single task drains the cursor. A reference the dispatch machine reports
//! `Busy` for is retained as `current` and retried on the next prompt; when
//! the cursor exhausts, the wire callback's `browser_finished` fires exactly
//! once.

use std::sync::Arc;

use crate::spi::MessageReference;

/// Cursor state of a browse-only consumer.
pub(crate) struct BrowserDeliverer {
    iterator: Option<Box<dyn Iterator<Item = Arc<dyn MessageReference>> + Send>>,
    current: Option<Arc<dyn MessageReference>>,
    finished_notified: bool,
}

impl BrowserDeliverer {
    pub(crate) fn new(iterator: Box<dyn Iterator<Item = Arc<dyn MessageReference>> + Send>) -> Self {
        Self {
            iterator: Some(iterator),
            current: None,
            finished_notified: false,
        }
    }

    /// Takes the reference retried from the previous run, if any.
    pub(crate) fn take_current(&mut self) -> Option<Arc<dyn MessageReference>> {
        self.current.take()
    }

    /// Saves a reference the dispatch machine reported `Busy` for.
    pub(crate) fn retain(&mut self, reference: Arc<dyn MessageReference>) {
        self.current = Some(reference);
    }

    /// Advances the cursor.
    pub(crate) fn next_reference(&mut self) -> Option<Arc<dyn MessageReference>> {
        self.iterator.as_mut()?.next()
    }

    /// Marks exhaustion; returns `true` on the first call only, so the
    /// finished callback fires once.
    pub(crate) fn mark_finished(&mut self) -> bool {
        if self.finished_notified {
            return false;
        }
        self.finished_notified = true;
        true
    }

    /// Drops the cursor and any retained reference (consumer close).
    pub(crate) fn close(&mut self) {
        self.iterator = None;
        self.current = None;
    }
}

impl std::fmt::Debug for BrowserDeliverer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserDeliverer")
            .field("open", &self.iterator.is_some())
            .field("retained", &self.current.as_ref().map(|r| r.message_id()))
            .field("finished_notified", &self.finished_notified)
            .finish()
    }
}
