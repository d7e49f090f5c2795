//! Collaborator interfaces.
//!
//! The delivery engine sits between a server-side queue and a remote client
//! endpoint. Everything it talks to — the queue, the owning session, the wire
//! callback, persistence, plugins, management — is injected behind one of the
//! traits in this module. The engine owns none of these collaborators; they
//! are shared handles, and `close` explicitly detaches from them.

use std::sync::Arc;

use crate::config::{ConsumerId, MessageId};
use crate::consumer::QueueConsumer;
use crate::error::DeliveryError;
use crate::notification::ConsumerClosedNotification;

/// A message payload handle.
///
/// Opaque to the engine beyond the properties needed for dispatch decisions
/// and large-message streaming.
pub trait Message: Send + Sync {
    /// Address the message was routed to.
    fn address(&self) -> String;

    /// Encoded size of the message in bytes.
    fn encoded_size(&self) -> u64;

    /// Whether the message survives a broker restart.
    fn is_durable(&self) -> bool;

    /// Whether the body must stream as header + continuation chunks.
    fn is_large(&self) -> bool;

    /// Protocol-level veto: whether this message may be dispatched to the
    /// consumer with the given sequential id.
    fn accepts_consumer(&self, sequential_id: u64) -> bool;

    /// Opens a sequential reader over the large-message body.
    ///
    /// Only meaningful when [`is_large`](Self::is_large) is true. The engine
    /// opens the reader exactly once per delivery and drops it in
    /// `finish()`.
    fn open_body_reader(&self) -> std::io::Result<Box<dyn LargeBodyReader>>;

    /// Increments the message's usage count (held while a streamer exists).
    fn usage_up(&self);

    /// Decrements the message's usage count.
    fn usage_down(&self);

    /// String property lookup, used by filters.
    fn string_property(&self, _key: &str) -> Option<String> {
        None
    }

    /// Sequence carried by a forced-delivery probe; `None` for ordinary
    /// messages.
    fn forced_delivery_sequence(&self) -> Option<u64> {
        None
    }
}

/// Sequential reader over a large-message body.
///
/// Dropping the reader releases the underlying resource.
pub trait LargeBodyReader: Send {
    /// Total body size in bytes.
    fn size(&self) -> u64;

    /// Fills `buf` with the next `buf.len()` bytes of the body.
    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()>;
}

/// A lightweight handle to a message sitting in a queue.
///
/// Carries the delivery count and paging/durability flags; ownership moves
/// between the queue, the consumer's in-flight ledger, and transactions.
pub trait MessageReference: Send + Sync {
    /// Broker-wide id of the referenced message.
    fn message_id(&self) -> MessageId;

    /// The referenced message.
    fn message(&self) -> Arc<dyn Message>;

    /// Number of delivery attempts so far.
    fn delivery_count(&self) -> u32;

    /// Records one more delivery attempt.
    fn increment_delivery_count(&self);

    /// Reverts one delivery attempt (non-failure cancel).
    fn decrement_delivery_count(&self);

    /// Marks the reference as taken by a consumer, so the queue's depth
    /// accounting moves it from pending to delivering.
    fn handled(&self);

    /// Queue this reference belongs to.
    fn queue(&self) -> Arc<dyn Queue>;

    /// Acknowledges the reference, enlisting into `tx` when present.
    fn acknowledge(
        &self,
        tx: Option<&mut dyn Transaction>,
        consumer_id: ConsumerId,
    ) -> Result<(), DeliveryError>;

    /// Records which consumer the reference was dispatched to.
    fn set_consumer_id(&self, consumer_id: ConsumerId);

    /// Whether the reference lives in the paging store rather than memory.
    fn is_paged(&self) -> bool;
}

/// Message filter attached to a consumer.
pub trait Filter: Send + Sync {
    /// Whether the message satisfies the filter.
    fn matches(&self, message: &dyn Message) -> bool;

    /// The filter expression, for the close notification.
    fn filter_string(&self) -> String;
}

/// The server-side queue a consumer is bound to.
pub trait Queue: Send + Sync {
    /// Queue name.
    fn name(&self) -> String;

    /// Whether the queue survives a broker restart.
    fn is_durable(&self) -> bool;

    /// Whether the queue is broker-internal (store-and-forward, management).
    fn is_internal(&self) -> bool;

    /// Number of consumers currently attached.
    fn consumer_count(&self) -> u64;

    /// The queue's single-threaded executor. All large-message continuations
    /// and forced-delivery probes for this queue's consumers run here, which
    /// is what keeps wire packets in ledger-append order.
    fn executor(&self) -> Arc<dyn Executor>;

    /// Attaches a consumer to the queue's dispatcher.
    fn add_consumer(&self, consumer: Arc<QueueConsumer>) -> Result<(), DeliveryError>;

    /// Detaches a consumer from the queue's dispatcher.
    fn remove_consumer(&self, consumer_id: ConsumerId);

    /// Read-only cursor over the queue's current contents.
    fn browser_iterator(&self) -> Box<dyn Iterator<Item = Arc<dyn MessageReference>> + Send>;

    /// Asks the queue's delivery loop to resume pushing references.
    fn deliver_async(&self);

    /// Cancels a reference inside a transaction; the side effect runs when
    /// the transaction resolves.
    fn cancel_in_tx(
        &self,
        tx: &mut dyn Transaction,
        reference: Arc<dyn MessageReference>,
        expire: bool,
    ) -> Result<(), DeliveryError>;

    /// Returns a reference to the queue as cancelled, stamped with the
    /// wall-clock time of the cancellation.
    fn cancel(&self, reference: Arc<dyn MessageReference>, timestamp_millis: u64) -> Result<(), DeliveryError>;

    /// Acknowledges a reference outside any transaction (pre-ack dispatch).
    fn acknowledge(
        &self,
        reference: Arc<dyn MessageReference>,
        consumer_id: ConsumerId,
    ) -> Result<(), DeliveryError>;

    /// Hands a rejected reference to the dead-letter sink.
    fn send_to_dead_letter_address(&self, reference: Arc<dyn MessageReference>) -> Result<(), DeliveryError>;

    /// Whether references from this queue may carry callbacks (and so may be
    /// cancelled through a transaction context).
    fn allows_reference_callback(&self) -> bool;

    /// Reports a delivery failure back to the queue's redelivery logic.
    fn error_processing(&self, reference: Arc<dyn MessageReference>, error: &DeliveryError);

    /// Re-evaluates the queue's reference count; may trigger auto-delete.
    fn recheck_ref_count(&self);
}

/// A unit of transactional work acknowledging or cancelling references.
///
/// The engine creates transactions through [`Session::new_transaction`],
/// marks them rollback-only on failure, and resolves them. Collaborators
/// (references and queues) enlist their work through the `enlist_*` methods.
pub trait Transaction: Send {
    /// Records an acknowledge into this transaction.
    fn enlist_ack(&mut self, message_id: MessageId);

    /// Records a cancellation into this transaction; the cancel side effect
    /// runs at resolution (commit or rollback).
    fn enlist_cancel(&mut self, message_id: MessageId, expire: bool);

    /// Poisons the transaction: any later commit must fail and roll back.
    fn mark_rollback_only(&mut self, reason: String);

    /// Whether the transaction has been poisoned.
    fn is_rollback_only(&self) -> bool;

    /// Commits the enlisted work.
    fn commit(self: Box<Self>) -> Result<(), DeliveryError>;

    /// Rolls the transaction back, running cancellation side effects.
    fn rollback(self: Box<Self>) -> Result<(), DeliveryError>;
}

/// The owning session.
pub trait Session: Send + Sync {
    /// Session name, for the close notification.
    fn name(&self) -> String;

    /// Authenticated user, if any.
    fn username(&self) -> Option<String>;

    /// Remote endpoint address, for the close notification.
    fn remote_address(&self) -> String;

    /// Session metadata lookup (e.g. the JMS marker used for legacy-prefix
    /// detection).
    fn metadata(&self, key: &str) -> Option<String>;

    /// Wire-protocol version of the remoting channel.
    fn channel_version(&self) -> i32;

    /// Opens a fresh transaction against the session's storage.
    fn new_transaction(&self) -> Box<dyn Transaction>;

    /// Whether client transactions still hold undrained references delivered
    /// through this consumer.
    fn has_transacted_refs(&self, consumer_id: ConsumerId) -> bool;

    /// Retains a closed consumer so in-transaction references can still be
    /// acknowledged after close.
    fn register_lingerer(&self, consumer_id: ConsumerId);
}

/// The wire adapter: everything the engine needs from the transport.
pub trait SessionCallback: Send + Sync {
    /// Protocol-specific credit check beyond the byte meter.
    fn has_credits(&self, consumer: &QueueConsumer, reference: &Arc<dyn MessageReference>) -> bool;

    /// Transport writability.
    fn is_writable(&self, consumer: &QueueConsumer) -> bool;

    /// Emits a standard message; returns the packet size in bytes.
    fn send_message(
        &self,
        reference: &Arc<dyn MessageReference>,
        message: &Arc<dyn Message>,
        consumer: &QueueConsumer,
        delivery_count: u32,
    ) -> Result<usize, DeliveryError>;

    /// Emits the header packet of a large message; returns the packet size.
    fn send_large_message(
        &self,
        reference: &Arc<dyn MessageReference>,
        message: &Arc<dyn Message>,
        consumer: &QueueConsumer,
        total_size: u64,
        delivery_count: u32,
    ) -> Result<usize, DeliveryError>;

    /// Emits one continuation chunk of a large message.
    ///
    /// With `requires_response = false` the wire layer promises not to retain
    /// `body` past this call, which lets the streamer reuse one chunk buffer
    /// for the whole payload.
    fn send_large_message_continuation(
        &self,
        consumer: &QueueConsumer,
        body: &[u8],
        has_more: bool,
        requires_response: bool,
    ) -> Result<usize, DeliveryError>;

    /// Gives the callback a chance to own the delivery-count adjustment after
    /// a cancel. Returns `true` iff it took responsibility; otherwise the
    /// engine decrements on non-failure cancels.
    fn update_delivery_count_after_cancel(
        &self,
        consumer: &QueueConsumer,
        reference: &Arc<dyn MessageReference>,
        failed: bool,
    ) -> bool;

    /// Invoked unconditionally after each delivery attempt.
    fn after_delivery(&self);

    /// Tears down the remote endpoint for this consumer.
    fn disconnect(&self, consumer: &QueueConsumer, queue_name: &str);

    /// Invoked exactly once when a browse cursor exhausts.
    fn browser_finished(&self, consumer: &QueueConsumer);

    /// Whether `handle` may be invoked inline on the sending thread.
    fn supports_direct_delivery(&self) -> bool;
}

/// Broker plugin hooks around the consumer lifecycle.
///
/// Every method has a no-op default; plugins override what they observe.
pub trait ConsumerPlugin: Send + Sync {
    /// Veto hook before dispatch; returning `false` yields `NO_MATCH`.
    fn can_accept(&self, _consumer: &QueueConsumer, _reference: &Arc<dyn MessageReference>) -> bool {
        true
    }

    /// Invoked before a reference is written to the wire.
    fn before_deliver(&self, _consumer: &QueueConsumer, _reference: &Arc<dyn MessageReference>) {}

    /// Invoked after a reference was written to the wire.
    fn after_deliver(&self, _consumer: &QueueConsumer, _reference: &Arc<dyn MessageReference>) {}

    /// Invoked at the start of `close`.
    fn before_close_consumer(&self, _consumer: &QueueConsumer, _failed: bool) {}

    /// Invoked at the end of `close`.
    fn after_close_consumer(&self, _consumer: &QueueConsumer, _failed: bool) {}
}

/// The management bus.
pub trait ManagementService: Send + Sync {
    /// Publishes the `CONSUMER_CLOSED` notification.
    fn consumer_closed(&self, notification: ConsumerClosedNotification);
}

/// The persistence layer.
pub trait StorageManager: Send + Sync {
    /// Issues the next storage-wide sequential id.
    fn generate_id(&self) -> u64;

    /// Persists an updated delivery count for a durable reference.
    fn update_delivery_count(&self, reference: &Arc<dyn MessageReference>) -> Result<(), DeliveryError>;
}

/// A task executor.
///
/// The queue's executor is single-threaded; the engine relies on that for
/// packet ordering and uses it as the resumption scheduler for large-message
/// streaming and forced-delivery probes.
pub trait Executor: Send + Sync {
    /// Enqueues a task.
    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// The collaborator handles a consumer is constructed with.
pub struct Collaborators {
    /// Queue the consumer is bound to.
    pub queue: Arc<dyn Queue>,
    /// Owning session.
    pub session: Arc<dyn Session>,
    /// Wire adapter.
    pub callback: Arc<dyn SessionCallback>,
    /// Persistence layer.
    pub storage: Arc<dyn StorageManager>,
    /// Management bus.
    pub management: Arc<dyn ManagementService>,
    /// Plugin hooks, invoked in registration order.
    pub plugins: Vec<Arc<dyn ConsumerPlugin>>,
}
