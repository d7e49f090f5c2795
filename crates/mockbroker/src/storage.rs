//! Storage-manager double.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ferroq_delivery::spi::{MessageReference, StorageManager};
use ferroq_delivery::{DeliveryError, MessageId};

/// In-memory storage: sequential ids plus a record of delivery-count
/// persistence requests.
pub struct InMemoryStorage {
    next_id: AtomicU64,
    delivery_count_updates: Mutex<Vec<MessageId>>,
    fail_updates: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1000),
            delivery_count_updates: Mutex::new(Vec::new()),
            fail_updates: AtomicBool::new(false),
        })
    }

    /// Makes delivery-count persistence fail.
    pub fn fail_delivery_count_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Message ids whose delivery count was persisted, in order.
    pub fn persisted_delivery_counts(&self) -> Vec<MessageId> {
        self.delivery_count_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StorageManager for InMemoryStorage {
    fn generate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn update_delivery_count(&self, reference: &Arc<dyn MessageReference>) -> Result<(), DeliveryError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(DeliveryError::Storage("injected delivery-count failure".into()));
        }
        self.delivery_count_updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reference.message_id());
        Ok(())
    }
}
