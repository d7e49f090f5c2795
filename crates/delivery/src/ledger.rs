//! The in-flight ledger.
//!
//! An ordered sequence of references that have been passed to the wire but
//! not yet acknowledged, rejected, or cancelled. Delivery order is the
//! ledger's invariant: references enter at the tail as they are accepted and
//! leave from the head as the client acknowledges, so for a well-behaved
//! client every removal is the head fast-path.
//!
//! The ledger itself is not synchronized; the owning consumer mutates it
//! under the consumer lock.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::MessageId;
use crate::invariants::debug_assert_ledger_unique;
use crate::spi::MessageReference;

/// Ordered set of delivered-but-unresolved references.
#[derive(Default)]
pub struct InFlightLedger {
    refs: VecDeque<Arc<dyn MessageReference>>,
}

impl InFlightLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self { refs: VecDeque::new() }
    }

    /// Number of references in flight.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Returns `true` if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Returns `true` if a reference with this id is in flight.
    pub fn contains(&self, message_id: MessageId) -> bool {
        self.refs.iter().any(|r| r.message_id() == message_id)
    }

    /// Appends a newly accepted reference at the tail.
    pub fn append(&mut self, reference: Arc<dyn MessageReference>) {
        debug_assert_ledger_unique!(self, reference.message_id());
        self.refs.push_back(reference);
    }

    /// Removes and returns the oldest in-flight reference.
    pub fn poll(&mut self) -> Option<Arc<dyn MessageReference>> {
        self.refs.pop_front()
    }

    /// Re-inserts a reference at the head, restoring its delivery position
    /// after a protocol-level rollback.
    pub fn push_front(&mut self, reference: Arc<dyn MessageReference>) {
        debug_assert_ledger_unique!(self, reference.message_id());
        self.refs.push_front(reference);
    }

    /// Removes the reference with the given id.
    ///
    /// Head fast-path first (the common in-order acknowledge), linear scan as
    /// the fallback for out-of-order protocols.
    pub fn remove(&mut self, message_id: MessageId) -> Option<Arc<dyn MessageReference>> {
        if let Some(front) = self.refs.front() {
            if front.message_id() == message_id {
                return self.refs.pop_front();
            }
        }
        let position = self.refs.iter().position(|r| r.message_id() == message_id)?;
        self.refs.remove(position)
    }

    /// Drains every in-flight reference in order.
    pub fn drain_all(&mut self) -> Vec<Arc<dyn MessageReference>> {
        self.refs.drain(..).collect()
    }

    /// Snapshot of in-flight message ids in delivery order.
    pub fn message_ids(&self) -> Vec<MessageId> {
        self.refs.iter().map(|r| r.message_id()).collect()
    }

    /// Collects references in order from the first satisfying `start`
    /// through the first subsequent one satisfying `end` (inclusive),
    /// optionally excising the collected window from the ledger.
    pub fn scan<S, E>(&mut self, start: S, end: E, remove: bool) -> Vec<Arc<dyn MessageReference>>
    where
        S: Fn(&dyn MessageReference) -> bool,
        E: Fn(&dyn MessageReference) -> bool,
    {
        let mut collected = Vec::new();
        let mut in_window = false;
        for reference in &self.refs {
            if !in_window && start(reference.as_ref()) {
                in_window = true;
            }
            if in_window {
                collected.push(Arc::clone(reference));
                if end(reference.as_ref()) {
                    break;
                }
            }
        }
        if remove {
            for reference in &collected {
                let id = reference.message_id();
                if let Some(position) = self.refs.iter().position(|r| r.message_id() == id) {
                    self.refs.remove(position);
                }
            }
        }
        collected
    }
}

impl std::fmt::Debug for InFlightLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightLedger")
            .field("len", &self.refs.len())
            .field("ids", &self.message_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsumerId;
    use crate::error::DeliveryError;
    use crate::spi::{Message, Queue, Transaction};

    /// Id-only reference; the ledger never touches anything else.
    struct StubRef(MessageId);

    impl MessageReference for StubRef {
        fn message_id(&self) -> MessageId {
            self.0
        }
        fn message(&self) -> Arc<dyn Message> {
            unimplemented!("not used by ledger tests")
        }
        fn delivery_count(&self) -> u32 {
            0
        }
        fn increment_delivery_count(&self) {}
        fn decrement_delivery_count(&self) {}
        fn handled(&self) {}
        fn queue(&self) -> Arc<dyn Queue> {
            unimplemented!("not used by ledger tests")
        }
        fn acknowledge(
            &self,
            _tx: Option<&mut dyn Transaction>,
            _consumer_id: ConsumerId,
        ) -> Result<(), DeliveryError> {
            Ok(())
        }
        fn set_consumer_id(&self, _consumer_id: ConsumerId) {}
        fn is_paged(&self) -> bool {
            false
        }
    }

    fn reference(id: MessageId) -> Arc<dyn MessageReference> {
        Arc::new(StubRef(id))
    }

    fn ledger_of(ids: &[MessageId]) -> InFlightLedger {
        let mut ledger = InFlightLedger::new();
        for &id in ids {
            ledger.append(reference(id));
        }
        ledger
    }

    #[test]
    fn poll_preserves_append_order() {
        let mut ledger = ledger_of(&[3, 4, 5]);
        assert_eq!(ledger.poll().map(|r| r.message_id()), Some(3));
        assert_eq!(ledger.poll().map(|r| r.message_id()), Some(4));
        assert_eq!(ledger.poll().map(|r| r.message_id()), Some(5));
        assert!(ledger.poll().is_none());
    }

    #[test]
    fn remove_takes_head_fast_path_and_linear_fallback() {
        let mut ledger = ledger_of(&[1, 2, 3]);
        // Head fast-path
        assert_eq!(ledger.remove(1).map(|r| r.message_id()), Some(1));
        // Linear fallback, order of the rest preserved
        assert_eq!(ledger.remove(3).map(|r| r.message_id()), Some(3));
        assert_eq!(ledger.message_ids(), vec![2]);
        assert!(ledger.remove(99).is_none());
    }

    #[test]
    fn push_front_restores_delivery_position() {
        let mut ledger = ledger_of(&[2, 3]);
        ledger.push_front(reference(1));
        assert_eq!(ledger.message_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn scan_collects_inclusive_window() {
        let mut ledger = ledger_of(&[1, 2, 3, 4, 5]);
        let window = ledger.scan(|r| r.message_id() == 2, |r| r.message_id() == 4, false);
        let ids: Vec<_> = window.iter().map(|r| r.message_id()).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert_eq!(ledger.len(), 5);
    }

    #[test]
    fn scan_with_remove_excises_the_window() {
        let mut ledger = ledger_of(&[1, 2, 3, 4, 5]);
        let window = ledger.scan(|r| r.message_id() == 2, |r| r.message_id() == 4, true);
        assert_eq!(window.len(), 3);
        assert_eq!(ledger.message_ids(), vec![1, 5]);
    }

    #[test]
    fn scan_without_end_match_runs_to_tail() {
        let mut ledger = ledger_of(&[1, 2, 3]);
        let window = ledger.scan(|r| r.message_id() == 2, |_| false, false);
        let ids: Vec<_> = window.iter().map(|r| r.message_id()).collect();
        assert_eq!(ids, vec![2, 3]);
    }
}
