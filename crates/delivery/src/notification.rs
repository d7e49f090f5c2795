//! Management notification emitted when a consumer closes.

use serde::Serialize;

/// Payload of the `CONSUMER_CLOSED` notification.
///
/// Published on the management bus before the queue's reference-count
/// recheck, so cluster peers observe the closure before a possible
/// auto-delete of the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumerClosedNotification {
    /// Address of the queue binding.
    pub address: String,
    /// Cluster-unique name of the binding.
    pub cluster_name: String,
    /// Name the binding routes under.
    pub routing_name: String,
    /// Filter expression of the consumer, if any.
    pub filter: Option<String>,
    /// Cluster hops between this node and the binding's origin.
    pub distance: i32,
    /// Consumers attached to the queue at notification time.
    pub consumer_count: u64,
    /// Authenticated user of the owning session, if any.
    pub user: Option<String>,
    /// Remote endpoint address of the owning session.
    pub remote_address: String,
    /// Name of the owning session.
    pub session_name: String,
}
