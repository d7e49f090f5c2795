//! Message, reference, and filter doubles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ferroq_delivery::spi::{Filter, LargeBodyReader, Message, MessageReference, Queue, Transaction};
use ferroq_delivery::{ConsumerId, DeliveryError, MessageId};

use crate::queue::TestQueue;

/// A scriptable message.
pub struct TestMessage {
    address: String,
    size: u64,
    durable: bool,
    large: bool,
    body: Vec<u8>,
    properties: HashMap<String, String>,
    refused_consumers: Vec<u64>,
    usage: AtomicI64,
    fail_body_open: AtomicBool,
}

impl TestMessage {
    pub fn new(size: u64) -> Self {
        Self {
            address: "orders".into(),
            size,
            durable: false,
            large: false,
            body: Vec::new(),
            properties: HashMap::new(),
            refused_consumers: Vec::new(),
            usage: AtomicI64::new(0),
            fail_body_open: AtomicBool::new(false),
        }
    }

    pub fn at_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Makes the message large with the given body; size tracks the body.
    pub fn large_with_body(mut self, body: Vec<u8>) -> Self {
        self.size = body.len() as u64;
        self.body = body;
        self.large = true;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Makes `accepts_consumer` refuse the given sequential id.
    pub fn refusing_consumer(mut self, sequential_id: u64) -> Self {
        self.refused_consumers.push(sequential_id);
        self
    }

    /// Makes the next body-reader open fail.
    pub fn fail_body_open(&self) {
        self.fail_body_open.store(true, Ordering::SeqCst);
    }

    /// Current usage count (held by active streamers).
    pub fn usage_count(&self) -> i64 {
        self.usage.load(Ordering::SeqCst)
    }
}

impl Message for TestMessage {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn encoded_size(&self) -> u64 {
        self.size
    }

    fn is_durable(&self) -> bool {
        self.durable
    }

    fn is_large(&self) -> bool {
        self.large
    }

    fn accepts_consumer(&self, sequential_id: u64) -> bool {
        !self.refused_consumers.contains(&sequential_id)
    }

    fn open_body_reader(&self) -> std::io::Result<Box<dyn LargeBodyReader>> {
        if self.fail_body_open.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("injected body-open failure"));
        }
        Ok(Box::new(TestBodyReader {
            data: self.body.clone(),
            position: 0,
        }))
    }

    fn usage_up(&self) {
        self.usage.fetch_add(1, Ordering::SeqCst);
    }

    fn usage_down(&self) {
        self.usage.fetch_sub(1, Ordering::SeqCst);
    }

    fn string_property(&self, key: &str) -> Option<String> {
        self.properties.get(key).cloned()
    }
}

struct TestBodyReader {
    data: Vec<u8>,
    position: usize,
}

impl LargeBodyReader for TestBodyReader {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        let end = self.position + buf.len();
        if end > self.data.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of body",
            ));
        }
        buf.copy_from_slice(&self.data[self.position..end]);
        self.position = end;
        Ok(())
    }
}

/// A reference double that records its lifecycle.
pub struct TestReference {
    id: MessageId,
    message: Arc<TestMessage>,
    queue: Arc<TestQueue>,
    delivery_count: AtomicU32,
    consumer_id: Mutex<Option<ConsumerId>>,
    handled: AtomicBool,
    paged: AtomicBool,
    fail_ack: AtomicBool,
}

impl TestReference {
    pub fn new(id: MessageId, message: Arc<TestMessage>, queue: Arc<TestQueue>) -> Arc<Self> {
        Arc::new(Self {
            id,
            message,
            queue,
            delivery_count: AtomicU32::new(0),
            consumer_id: Mutex::new(None),
            handled: AtomicBool::new(false),
            paged: AtomicBool::new(false),
            fail_ack: AtomicBool::new(false),
        })
    }

    pub fn set_paged(&self, paged: bool) {
        self.paged.store(paged, Ordering::SeqCst);
    }

    /// Makes the next acknowledge fail.
    pub fn fail_ack(&self) {
        self.fail_ack.store(true, Ordering::SeqCst);
    }

    pub fn was_handled(&self) -> bool {
        self.handled.load(Ordering::SeqCst)
    }

    pub fn recorded_consumer(&self) -> Option<ConsumerId> {
        *self.consumer_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_delivery_count(&self) -> u32 {
        self.delivery_count.load(Ordering::SeqCst)
    }

    /// The concrete message double, for usage-count assertions.
    pub fn message_double(&self) -> &Arc<TestMessage> {
        &self.message
    }
}

impl MessageReference for TestReference {
    fn message_id(&self) -> MessageId {
        self.id
    }

    fn message(&self) -> Arc<dyn Message> {
        Arc::clone(&self.message) as Arc<dyn Message>
    }

    fn delivery_count(&self) -> u32 {
        self.delivery_count.load(Ordering::SeqCst)
    }

    fn increment_delivery_count(&self) {
        self.delivery_count.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_delivery_count(&self) {
        self.delivery_count.fetch_sub(1, Ordering::SeqCst);
    }

    fn handled(&self) {
        self.handled.store(true, Ordering::SeqCst);
    }

    fn queue(&self) -> Arc<dyn Queue> {
        Arc::clone(&self.queue) as Arc<dyn Queue>
    }

    fn acknowledge(
        &self,
        tx: Option<&mut dyn Transaction>,
        consumer_id: ConsumerId,
    ) -> Result<(), DeliveryError> {
        if self.fail_ack.swap(false, Ordering::SeqCst) {
            return Err(DeliveryError::Storage("injected acknowledge failure".into()));
        }
        if let Some(tx) = tx {
            tx.enlist_ack(self.id);
        }
        self.queue.record_ack(self.id, consumer_id);
        Ok(())
    }

    fn set_consumer_id(&self, consumer_id: ConsumerId) {
        *self.consumer_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(consumer_id);
    }

    fn is_paged(&self) -> bool {
        self.paged.load(Ordering::SeqCst)
    }
}

/// Filter matching one string property.
pub struct PropertyFilter {
    key: String,
    value: String,
}

impl PropertyFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            key: key.into(),
            value: value.into(),
        })
    }
}

impl Filter for PropertyFilter {
    fn matches(&self, message: &dyn Message) -> bool {
        message.string_property(&self.key).as_deref() == Some(self.value.as_str())
    }

    fn filter_string(&self) -> String {
        format!("{} = '{}'", self.key, self.value)
    }
}
