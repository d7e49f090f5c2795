//! Plugin and management doubles.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ferroq_delivery::spi::{ConsumerPlugin, ManagementService, MessageReference};
use ferroq_delivery::{ConsumerClosedNotification, QueueConsumer};

/// A plugin that counts every hook invocation and can veto dispatch.
pub struct CountingPlugin {
    accept: AtomicBool,
    can_accept_calls: AtomicUsize,
    before_deliver_calls: AtomicUsize,
    after_deliver_calls: AtomicUsize,
    before_close_calls: AtomicUsize,
    after_close_calls: AtomicUsize,
}

impl CountingPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            accept: AtomicBool::new(true),
            can_accept_calls: AtomicUsize::new(0),
            before_deliver_calls: AtomicUsize::new(0),
            after_deliver_calls: AtomicUsize::new(0),
            before_close_calls: AtomicUsize::new(0),
            after_close_calls: AtomicUsize::new(0),
        })
    }

    /// Makes `can_accept` veto every reference.
    pub fn set_accepting(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn can_accept_calls(&self) -> usize {
        self.can_accept_calls.load(Ordering::SeqCst)
    }

    pub fn before_deliver_calls(&self) -> usize {
        self.before_deliver_calls.load(Ordering::SeqCst)
    }

    pub fn after_deliver_calls(&self) -> usize {
        self.after_deliver_calls.load(Ordering::SeqCst)
    }

    pub fn before_close_calls(&self) -> usize {
        self.before_close_calls.load(Ordering::SeqCst)
    }

    pub fn after_close_calls(&self) -> usize {
        self.after_close_calls.load(Ordering::SeqCst)
    }
}

impl ConsumerPlugin for CountingPlugin {
    fn can_accept(&self, _consumer: &QueueConsumer, _reference: &Arc<dyn MessageReference>) -> bool {
        self.can_accept_calls.fetch_add(1, Ordering::SeqCst);
        self.accept.load(Ordering::SeqCst)
    }

    fn before_deliver(&self, _consumer: &QueueConsumer, _reference: &Arc<dyn MessageReference>) {
        self.before_deliver_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn after_deliver(&self, _consumer: &QueueConsumer, _reference: &Arc<dyn MessageReference>) {
        self.after_deliver_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn before_close_consumer(&self, _consumer: &QueueConsumer, _failed: bool) {
        self.before_close_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn after_close_consumer(&self, _consumer: &QueueConsumer, _failed: bool) {
        self.after_close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// A management bus that records notifications.
pub struct RecordingManagement {
    notifications: Mutex<Vec<ConsumerClosedNotification>>,
}

impl RecordingManagement {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            notifications: Mutex::new(Vec::new()),
        })
    }

    pub fn notifications(&self) -> Vec<ConsumerClosedNotification> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ManagementService for RecordingManagement {
    fn consumer_closed(&self, notification: ConsumerClosedNotification) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}
