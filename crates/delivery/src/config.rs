//! Consumer identity and configuration.

use std::time::Duration;

/// Identifier of a consumer, unique within its owning session.
pub type ConsumerId = u64;

/// Broker-wide message identifier.
pub type MessageId = u64;

/// How an address routes messages to its queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingType {
    /// Point-to-point: each message goes to one queue.
    Anycast,
    /// Publish-subscribe: each message goes to every matching queue.
    Multicast,
}

/// Immutable description of the binding between a queue and its address.
///
/// Carried by the consumer for the lifetime of the subscription; surfaced in
/// the close notification and used to pick the legacy address prefix.
#[derive(Debug, Clone)]
pub struct QueueBinding {
    /// Address the queue is bound to.
    pub address: String,
    /// Name the binding routes under.
    pub routing_name: String,
    /// Cluster-unique name of the binding.
    pub cluster_name: String,
    /// Routing semantics of the address.
    pub routing_type: RoutingType,
    /// Number of cluster hops between this node and the binding's origin.
    pub distance: i32,
}

impl QueueBinding {
    /// Creates a local (distance 0) binding where the routing and cluster
    /// names equal the queue name.
    pub fn local(address: impl Into<String>, queue_name: impl Into<String>, routing_type: RoutingType) -> Self {
        let queue_name = queue_name.into();
        Self {
            address: address.into(),
            routing_name: queue_name.clone(),
            cluster_name: queue_name,
            routing_type,
            distance: 0,
        }
    }
}

/// Configuration for a single consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Consumer id, unique within the owning session.
    pub id: ConsumerId,
    /// Consumer priority; higher-priority consumers are offered references
    /// first by the queue's dispatcher.
    pub priority: u8,
    /// Read-only traversal: never appears in the in-flight ledger, never
    /// acknowledges.
    pub browse_only: bool,
    /// Server-side acknowledgement at dispatch time; the client is not
    /// authoritative. Ignored for browse-only consumers.
    pub pre_acknowledge: bool,
    /// Persist delivery-count updates at dispatch time for durable messages
    /// on durable queues.
    pub strict_update_delivery_count: bool,
    /// Whether the remote endpoint can receive chunked large messages.
    pub supports_large_message: bool,
    /// Messages whose body meets this size stream as header + chunks; also
    /// the maximum chunk size.
    pub min_large_message_size: usize,
    /// How long `stop` waits for in-flight deliveries to drain.
    pub flush_timeout: Duration,
    /// How long entering the transferring state waits for the queue-executor
    /// barrier.
    pub transfer_barrier_timeout: Duration,
}

impl ConsumerConfig {
    /// Creates a configuration with defaults for everything but the id.
    pub fn new(id: ConsumerId) -> Self {
        Self {
            id,
            priority: 0,
            browse_only: false,
            pre_acknowledge: false,
            strict_update_delivery_count: false,
            supports_large_message: true,
            min_large_message_size: 100 * 1024,
            flush_timeout: Duration::from_secs(30),
            transfer_barrier_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the consumer priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the consumer browse-only.
    pub fn with_browse_only(mut self, browse_only: bool) -> Self {
        self.browse_only = browse_only;
        self
    }

    /// Enables server-side acknowledgement at dispatch time.
    pub fn with_pre_acknowledge(mut self, pre_acknowledge: bool) -> Self {
        self.pre_acknowledge = pre_acknowledge;
        self
    }

    /// Enables persisting delivery-count updates at dispatch time.
    pub fn with_strict_update_delivery_count(mut self, strict: bool) -> Self {
        self.strict_update_delivery_count = strict;
        self
    }

    /// Declares whether the remote endpoint accepts chunked large messages.
    pub fn with_supports_large_message(mut self, supported: bool) -> Self {
        self.supports_large_message = supported;
        self
    }

    /// Sets the large-message threshold and chunk size.
    pub fn with_min_large_message_size(mut self, size: usize) -> Self {
        self.min_large_message_size = size;
        self
    }

    /// Sets the stop-flush deadline.
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Sets the transfer-barrier deadline.
    pub fn with_transfer_barrier_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_barrier_timeout = timeout;
        self
    }
}
