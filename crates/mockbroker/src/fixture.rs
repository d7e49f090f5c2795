//! One-call wiring of a consumer against the doubles.

use std::sync::Arc;
use std::time::Duration;

use ferroq_delivery::spi::{Collaborators, ConsumerPlugin, Filter};
use ferroq_delivery::{ConsumerConfig, MessageId, QueueBinding, QueueConsumer, RoutingType};

use crate::callback::RecordingCallback;
use crate::executor::ManualExecutor;
use crate::message::{TestMessage, TestReference};
use crate::plugin::RecordingManagement;
use crate::queue::TestQueue;
use crate::session::TestSession;
use crate::storage::InMemoryStorage;

/// A full set of doubles wired around one queue.
pub struct Fixture {
    pub executor: Arc<ManualExecutor>,
    pub queue: Arc<TestQueue>,
    pub session: Arc<TestSession>,
    pub callback: Arc<RecordingCallback>,
    pub storage: Arc<InMemoryStorage>,
    pub management: Arc<RecordingManagement>,
}

impl Fixture {
    pub fn new() -> Self {
        let executor = Arc::new(ManualExecutor::new());
        let queue = TestQueue::new("orders.q1", Arc::clone(&executor) as _);
        Self {
            executor,
            queue,
            session: TestSession::new("session-a1"),
            callback: RecordingCallback::new(),
            storage: InMemoryStorage::new(),
            management: RecordingManagement::new(),
        }
    }

    /// A config with test-sized timeouts so a stuck latch fails fast.
    pub fn config(&self, id: u64) -> ConsumerConfig {
        ConsumerConfig::new(id)
            .with_flush_timeout(Duration::from_millis(100))
            .with_transfer_barrier_timeout(Duration::from_millis(50))
    }

    pub fn binding(&self) -> QueueBinding {
        QueueBinding::local("orders", "orders.q1", RoutingType::Anycast)
    }

    pub fn collaborators(&self) -> Collaborators {
        self.collaborators_with_plugins(Vec::new())
    }

    pub fn collaborators_with_plugins(&self, plugins: Vec<Arc<dyn ConsumerPlugin>>) -> Collaborators {
        Collaborators {
            queue: Arc::clone(&self.queue) as _,
            session: Arc::clone(&self.session) as _,
            callback: Arc::clone(&self.callback) as _,
            storage: Arc::clone(&self.storage) as _,
            management: Arc::clone(&self.management) as _,
            plugins,
        }
    }

    /// A started consumer with no filter and no plugins.
    pub fn consumer(&self, config: ConsumerConfig) -> Arc<QueueConsumer> {
        self.consumer_with(config, None, true, Vec::new())
    }

    pub fn consumer_with(
        &self,
        config: ConsumerConfig,
        filter: Option<Arc<dyn Filter>>,
        started: bool,
        plugins: Vec<Arc<dyn ConsumerPlugin>>,
    ) -> Arc<QueueConsumer> {
        QueueConsumer::new(
            config,
            self.binding(),
            filter,
            started,
            self.collaborators_with_plugins(plugins),
        )
        .expect("consumer construction failed")
    }

    /// A plain (non-large) reference of the given encoded size.
    pub fn reference(&self, id: MessageId, size: u64) -> Arc<TestReference> {
        TestReference::new(id, Arc::new(TestMessage::new(size)), Arc::clone(&self.queue))
    }

    /// A reference wrapping the given message.
    pub fn reference_for(&self, id: MessageId, message: TestMessage) -> Arc<TestReference> {
        TestReference::new(id, Arc::new(message), Arc::clone(&self.queue))
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
