//! Chunked delivery of large messages.
//!
//! A large message leaves the broker as one header packet followed by N
//! continuation chunks. The streamer is a resumable state machine: each
//! [`LargeMessageStreamer::deliver`] call performs at most one send and
//! reports what it did; the owning consumer re-submits the next step on the
//! queue executor. The scheduler stays external because the executor is the
//! single writer to the wire for the queue, which is what keeps packets in
//! ledger order.
//!
//! Continuations are sent with `requires_response = false`, so the wire
//! layer does not retain the chunk buffer past the send and one heap buffer
//! serves the whole payload.

use std::sync::Arc;

use tracing::trace;

use crate::consumer::QueueConsumer;
use crate::error::DeliveryError;
use crate::spi::{LargeBodyReader, Message, MessageReference};

/// Outcome of one streaming step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamStep {
    /// Header packet written; schedule the first chunk.
    SentHeader,
    /// One chunk written, more remain; schedule the next.
    SentChunk,
    /// Stopped or out of credit; a prompt will resume later.
    Blocked,
    /// Final chunk written and resources released.
    Finished,
}

/// Delivery state of one in-flight large message.
///
/// At most one streamer exists per consumer; while it does, the dispatch
/// machine reports `Busy` for every further reference.
pub(crate) struct LargeMessageStreamer {
    reference: Arc<dyn MessageReference>,
    message: Arc<dyn Message>,
    reader: Option<Box<dyn LargeBodyReader>>,
    total_size: u64,
    position: u64,
    sent_initial: bool,
    chunk: Option<Vec<u8>>,
    finished: bool,
}

impl LargeMessageStreamer {
    /// Creates a streamer for an accepted large reference.
    ///
    /// Holds a usage count on the message until [`finish`](Self::finish).
    pub(crate) fn new(reference: Arc<dyn MessageReference>, message: Arc<dyn Message>) -> Self {
        message.usage_up();
        Self {
            reference,
            message,
            reader: None,
            total_size: 0,
            position: 0,
            sent_initial: false,
            chunk: None,
            finished: false,
        }
    }

    /// The reference being streamed.
    pub(crate) fn reference(&self) -> &Arc<dyn MessageReference> {
        &self.reference
    }

    /// Performs one streaming step.
    ///
    /// Called with the consumer lock held; only touches the credit meter,
    /// the wire callback, and the streamer's own state.
    pub(crate) fn deliver(
        &mut self,
        consumer: &QueueConsumer,
        started: bool,
    ) -> Result<StreamStep, DeliveryError> {
        if !started {
            return Ok(StreamStep::Blocked);
        }
        if !consumer.credits().try_reserve() {
            // Out of credit mid-stream: drop the chunk buffer while parked
            self.chunk = None;
            return Ok(StreamStep::Blocked);
        }

        if !self.sent_initial {
            let reader = self.message.open_body_reader()?;
            self.total_size = reader.size();
            self.reader = Some(reader);

            let packet_size = consumer.callback().send_large_message(
                &self.reference,
                &self.message,
                consumer,
                self.total_size,
                self.reference.delivery_count(),
            )?;
            consumer.credits().consume(packet_size);
            self.sent_initial = true;
            trace!(
                message_id = self.reference.message_id(),
                total_size = self.total_size,
                "sent large-message header"
            );
            return Ok(StreamStep::SentHeader);
        }

        let chunk_len = (self.total_size - self.position).min(consumer.min_large_message_size() as u64) as usize;
        let chunk = self.chunk.get_or_insert_with(|| vec![0; chunk_len]);
        chunk.resize(chunk_len, 0);

        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| DeliveryError::IllegalState("large-message body reader missing after header".into()))?;
        reader.read_exact(chunk)?;

        let has_more = self.position + (chunk_len as u64) < self.total_size;
        let packet_size =
            consumer
                .callback()
                .send_large_message_continuation(consumer, chunk, has_more, false)?;
        consumer.credits().consume(packet_size);
        self.position += chunk_len as u64;
        trace!(
            message_id = self.reference.message_id(),
            position = self.position,
            has_more,
            "sent large-message chunk"
        );

        if has_more {
            Ok(StreamStep::SentChunk)
        } else {
            self.finish();
            Ok(StreamStep::Finished)
        }
    }

    /// Releases the body reader, the chunk buffer, and the message usage
    /// count. Idempotent: the delivery path and `close` race it.
    pub(crate) fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.reader = None;
        self.chunk = None;
        self.message.usage_down();
    }
}

impl Drop for LargeMessageStreamer {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for LargeMessageStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LargeMessageStreamer")
            .field("message_id", &self.reference.message_id())
            .field("total_size", &self.total_size)
            .field("position", &self.position)
            .field("sent_initial", &self.sent_initial)
            .field("finished", &self.finished)
            .finish()
    }
}
