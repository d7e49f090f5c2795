//! Queue double.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ferroq_delivery::spi::{Executor, MessageReference, Queue, Transaction};
use ferroq_delivery::{ConsumerId, DeliveryError, MessageId, QueueConsumer};

/// A recording queue.
///
/// The queue does not run a delivery loop; tests play that role by handing
/// references to the consumer directly. Every call the engine makes back
/// into the queue is recorded for assertions.
pub struct TestQueue {
    name: String,
    durable: AtomicBool,
    internal: AtomicBool,
    allows_reference_callback: AtomicBool,
    executor: Arc<dyn Executor>,
    consumers: AtomicU64,
    added: Mutex<Vec<ConsumerId>>,
    removed: Mutex<Vec<ConsumerId>>,
    acknowledged: Mutex<Vec<(MessageId, ConsumerId)>>,
    cancelled: Mutex<Vec<(MessageId, u64)>>,
    tx_cancelled: Mutex<Vec<(MessageId, bool)>>,
    dead_lettered: Mutex<Vec<MessageId>>,
    errors: Mutex<Vec<(MessageId, String)>>,
    browse_refs: Mutex<Vec<Arc<dyn MessageReference>>>,
    deliver_async_calls: AtomicUsize,
    recheck_calls: AtomicUsize,
}

impl TestQueue {
    pub fn new(name: impl Into<String>, executor: Arc<dyn Executor>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            durable: AtomicBool::new(true),
            internal: AtomicBool::new(false),
            allows_reference_callback: AtomicBool::new(true),
            executor,
            consumers: AtomicU64::new(0),
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            acknowledged: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            tx_cancelled: Mutex::new(Vec::new()),
            dead_lettered: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            browse_refs: Mutex::new(Vec::new()),
            deliver_async_calls: AtomicUsize::new(0),
            recheck_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_durable(&self, durable: bool) {
        self.durable.store(durable, Ordering::SeqCst);
    }

    pub fn set_internal(&self, internal: bool) {
        self.internal.store(internal, Ordering::SeqCst);
    }

    pub fn set_allows_reference_callback(&self, allows: bool) {
        self.allows_reference_callback.store(allows, Ordering::SeqCst);
    }

    /// Seeds the references a browse cursor will traverse.
    pub fn seed_browse(&self, refs: Vec<Arc<dyn MessageReference>>) {
        *self.browse_refs.lock().unwrap_or_else(PoisonError::into_inner) = refs;
    }

    pub(crate) fn record_ack(&self, message_id: MessageId, consumer_id: ConsumerId) {
        self.acknowledged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((message_id, consumer_id));
    }

    // --- assertion helpers ---

    pub fn added_consumers(&self) -> Vec<ConsumerId> {
        self.added.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn removed_consumers(&self) -> Vec<ConsumerId> {
        self.removed.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn acknowledged_refs(&self) -> Vec<(MessageId, ConsumerId)> {
        self.acknowledged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cancelled_refs(&self) -> Vec<(MessageId, u64)> {
        self.cancelled.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn tx_cancelled_refs(&self) -> Vec<(MessageId, bool)> {
        self.tx_cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn dead_lettered_refs(&self) -> Vec<MessageId> {
        self.dead_lettered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reported_errors(&self) -> Vec<(MessageId, String)> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn deliver_async_count(&self) -> usize {
        self.deliver_async_calls.load(Ordering::SeqCst)
    }

    pub fn recheck_count(&self) -> usize {
        self.recheck_calls.load(Ordering::SeqCst)
    }
}

impl Queue for TestQueue {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_durable(&self) -> bool {
        self.durable.load(Ordering::SeqCst)
    }

    fn is_internal(&self) -> bool {
        self.internal.load(Ordering::SeqCst)
    }

    fn consumer_count(&self) -> u64 {
        self.consumers.load(Ordering::SeqCst)
    }

    fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }

    fn add_consumer(&self, consumer: Arc<QueueConsumer>) -> Result<(), DeliveryError> {
        self.consumers.fetch_add(1, Ordering::SeqCst);
        self.added
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(consumer.id());
        Ok(())
    }

    fn remove_consumer(&self, consumer_id: ConsumerId) {
        self.consumers.fetch_sub(1, Ordering::SeqCst);
        self.removed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(consumer_id);
    }

    fn browser_iterator(&self) -> Box<dyn Iterator<Item = Arc<dyn MessageReference>> + Send> {
        let refs = self
            .browse_refs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Box::new(refs.into_iter())
    }

    fn deliver_async(&self) {
        self.deliver_async_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel_in_tx(
        &self,
        tx: &mut dyn Transaction,
        reference: Arc<dyn MessageReference>,
        expire: bool,
    ) -> Result<(), DeliveryError> {
        tx.enlist_cancel(reference.message_id(), expire);
        self.tx_cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((reference.message_id(), expire));
        Ok(())
    }

    fn cancel(&self, reference: Arc<dyn MessageReference>, timestamp_millis: u64) -> Result<(), DeliveryError> {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((reference.message_id(), timestamp_millis));
        Ok(())
    }

    fn acknowledge(
        &self,
        reference: Arc<dyn MessageReference>,
        consumer_id: ConsumerId,
    ) -> Result<(), DeliveryError> {
        self.record_ack(reference.message_id(), consumer_id);
        Ok(())
    }

    fn send_to_dead_letter_address(&self, reference: Arc<dyn MessageReference>) -> Result<(), DeliveryError> {
        self.dead_lettered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reference.message_id());
        Ok(())
    }

    fn allows_reference_callback(&self) -> bool {
        self.allows_reference_callback.load(Ordering::SeqCst)
    }

    fn error_processing(&self, reference: Arc<dyn MessageReference>, error: &DeliveryError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((reference.message_id(), error.to_string()));
    }

    fn recheck_ref_count(&self) {
        self.recheck_calls.fetch_add(1, Ordering::SeqCst);
    }
}
