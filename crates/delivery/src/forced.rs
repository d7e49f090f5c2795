//! Forced-delivery probes.
//!
//! A client that wants proof a queue is drained asks for a forced delivery:
//! the consumer emits a synthetic message carrying a client-chosen sequence,
//! scheduled on the queue executor so it is written after every delivery
//! already in flight there. The probe never enters the in-flight ledger and
//! never consumes credit.

use std::sync::Arc;

use crate::config::{ConsumerId, MessageId};
use crate::error::DeliveryError;
use crate::spi::{LargeBodyReader, Message, MessageReference, Queue, Transaction};

/// Property name under which the probe carries its sequence on the wire.
pub const FORCED_DELIVERY_MESSAGE: &str = "_fq.forced.delivery.seq";

/// Builds the synthetic reference/message pair for a probe.
pub(crate) fn forced_delivery_reference(
    message_id: MessageId,
    address: String,
    queue: Arc<dyn Queue>,
    sequence: u64,
) -> (Arc<dyn MessageReference>, Arc<dyn Message>) {
    let message: Arc<dyn Message> = Arc::new(ForcedDeliveryMessage { address, sequence });
    let reference: Arc<dyn MessageReference> = Arc::new(ForcedDeliveryReference {
        message_id,
        message: Arc::clone(&message),
        queue,
    });
    (reference, message)
}

/// The synthetic probe payload.
struct ForcedDeliveryMessage {
    address: String,
    sequence: u64,
}

impl Message for ForcedDeliveryMessage {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn encoded_size(&self) -> u64 {
        0
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn is_large(&self) -> bool {
        false
    }

    fn accepts_consumer(&self, _sequential_id: u64) -> bool {
        true
    }

    fn open_body_reader(&self) -> std::io::Result<Box<dyn LargeBodyReader>> {
        Err(std::io::Error::other("forced-delivery probe has no body"))
    }

    fn usage_up(&self) {}

    fn usage_down(&self) {}

    fn string_property(&self, key: &str) -> Option<String> {
        (key == FORCED_DELIVERY_MESSAGE).then(|| self.sequence.to_string())
    }

    fn forced_delivery_sequence(&self) -> Option<u64> {
        Some(self.sequence)
    }
}

/// A reference wrapper for the probe; it belongs to no queue's backlog and
/// acknowledging it is a no-op.
struct ForcedDeliveryReference {
    message_id: MessageId,
    message: Arc<dyn Message>,
    queue: Arc<dyn Queue>,
}

impl MessageReference for ForcedDeliveryReference {
    fn message_id(&self) -> MessageId {
        self.message_id
    }

    fn message(&self) -> Arc<dyn Message> {
        Arc::clone(&self.message)
    }

    fn delivery_count(&self) -> u32 {
        0
    }

    fn increment_delivery_count(&self) {}

    fn decrement_delivery_count(&self) {}

    fn handled(&self) {}

    fn queue(&self) -> Arc<dyn Queue> {
        Arc::clone(&self.queue)
    }

    fn acknowledge(
        &self,
        _tx: Option<&mut dyn Transaction>,
        _consumer_id: ConsumerId,
    ) -> Result<(), DeliveryError> {
        Ok(())
    }

    fn set_consumer_id(&self, _consumer_id: ConsumerId) {}

    fn is_paged(&self) -> bool {
        false
    }
}
