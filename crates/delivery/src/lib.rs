//! Per-consumer delivery engine for the FerroQ message broker.
//!
//! This crate is the component between a server-side queue and one remote
//! client endpoint: it pulls message references from the queue, enforces the
//! client-advertised byte credit, tracks what is in flight, streams large
//! messages as header + continuation chunks, and drives the acknowledge /
//! cancel / reject lifecycle.
//!
//! # Architecture
//!
//! - [`QueueConsumer`] — the controller: dispatch decisions, lifecycle
//!   (start/stop/transfer/close), the ack/cancel/reject API.
//! - [`CreditMeter`] — lock-free byte credit (bounded or unlimited).
//! - [`InFlightLedger`] — ordered set of delivered-but-unresolved references.
//! - A large-message streamer: a resumable state machine that writes one
//!   packet per step and is re-scheduled on the queue's executor.
//! - A browse deliverer: read-only traversal reusing the dispatch machine.
//!
//! Collaborators (queue, session, wire callback, storage, plugins,
//! management) are injected behind the traits in [`spi`]; the engine owns
//! none of them.
//!
//! # Example
//!
//! ```ignore
//! use ferroq_delivery::{ConsumerConfig, QueueBinding, QueueConsumer, RoutingType};
//!
//! let consumer = QueueConsumer::new(
//!     ConsumerConfig::new(1),
//!     QueueBinding::local("orders", "orders.q1", RoutingType::Anycast),
//!     None,       // no filter
//!     true,       // started
//!     collaborators,
//! )?;
//!
//! // The queue's delivery loop:
//! if consumer.handle(reference.clone())? == HandleStatus::Handled {
//!     consumer.proceed_deliver(reference)?;
//! }
//!
//! // The session, later:
//! let acked = consumer.acknowledge(None, message_id)?;
//! ```

mod browser;
mod config;
mod consumer;
mod credit;
mod error;
mod forced;
mod invariants;
mod latch;
mod ledger;
mod legacy;
mod metrics;
mod notification;
pub mod spi;
mod streamer;

pub use config::{ConsumerConfig, ConsumerId, MessageId, QueueBinding, RoutingType};
pub use consumer::{HandleStatus, QueueConsumer};
pub use credit::CreditMeter;
pub use error::DeliveryError;
pub use forced::FORCED_DELIVERY_MESSAGE;
pub use latch::CountLatch;
pub use ledger::InFlightLedger;
pub use legacy::{
    ADDRESSING_CHANGE_VERSION, ANYCAST_PREFIX, JMS_SESSION_METADATA_KEY, MULTICAST_PREFIX,
};
pub use metrics::ConsumerMetrics;
pub use notification::ConsumerClosedNotification;
