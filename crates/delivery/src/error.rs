//! Error types for delivery-engine operations.

use thiserror::Error;

use crate::config::{ConsumerId, MessageId};

/// Errors that can occur while dispatching, acknowledging, or streaming
/// messages to a consumer.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// An acknowledge targeted a message that is not in delivery for this
    /// consumer. The enclosing transaction is marked rollback-only before
    /// this is returned.
    #[error("consumer {consumer_id} has no reference for message {message_id} on queue {queue_name}")]
    NoReference {
        /// Consumer the acknowledge was addressed to.
        consumer_id: ConsumerId,
        /// Message id that could not be found in the in-flight ledger.
        message_id: MessageId,
        /// Name of the queue the consumer is bound to.
        queue_name: String,
    },

    /// A structural invariant was violated (e.g. cancel of an absent
    /// reference, or an operation on a closed consumer).
    #[error("illegal consumer state: {0}")]
    IllegalState(String),

    /// The wire send path failed. The delivery is considered not completed;
    /// the reference stays with its current owner.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Large-message body I/O failed. The active streamer is forcibly
    /// finished and the current delivery considered failed.
    #[error("large-message stream failure")]
    Streamer {
        /// Underlying body-reader error.
        #[from]
        source: std::io::Error,
    },

    /// The persistence collaborator failed (e.g. while storing an updated
    /// delivery count).
    #[error("storage failure: {0}")]
    Storage(String),
}

impl DeliveryError {
    /// Returns `true` if this error came from the wire send path.
    #[inline]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns `true` if this error reports a violated structural invariant.
    #[inline]
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState(_) | Self::NoReference { .. })
    }
}
