//! Wire-callback double.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ferroq_delivery::spi::{Message, MessageReference, SessionCallback};
use ferroq_delivery::{DeliveryError, MessageId, QueueConsumer};

/// Per-packet framing overhead the double charges on top of the payload.
pub const PACKET_OVERHEAD: usize = 5;

/// One packet the callback wrote to the "wire".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentPacket {
    /// A standard message packet.
    Message {
        message_id: MessageId,
        address: String,
        delivery_count: u32,
        size: usize,
        forced_sequence: Option<u64>,
    },
    /// The header packet of a large message.
    LargeHeader {
        message_id: MessageId,
        total_size: u64,
        delivery_count: u32,
        size: usize,
    },
    /// One continuation chunk of a large message.
    Continuation {
        body_len: usize,
        has_more: bool,
        requires_response: bool,
        size: usize,
    },
}

impl SentPacket {
    /// Packet size in bytes, as reported back to the engine.
    pub fn size(&self) -> usize {
        match self {
            Self::Message { size, .. } | Self::LargeHeader { size, .. } | Self::Continuation { size, .. } => *size,
        }
    }
}

/// A wire callback that records every packet and is scriptable for
/// writability, protocol credit, and transport failures.
pub struct RecordingCallback {
    writable: AtomicBool,
    protocol_credits: AtomicBool,
    supports_direct: AtomicBool,
    owns_delivery_count_update: AtomicBool,
    fail_next_send: AtomicBool,
    sent: Mutex<Vec<SentPacket>>,
    after_delivery_calls: AtomicUsize,
    browser_finished_calls: AtomicUsize,
    disconnected: Mutex<Vec<String>>,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            writable: AtomicBool::new(true),
            protocol_credits: AtomicBool::new(true),
            supports_direct: AtomicBool::new(true),
            owns_delivery_count_update: AtomicBool::new(false),
            fail_next_send: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            after_delivery_calls: AtomicUsize::new(0),
            browser_finished_calls: AtomicUsize::new(0),
            disconnected: Mutex::new(Vec::new()),
        })
    }

    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    pub fn set_has_credits(&self, has: bool) {
        self.protocol_credits.store(has, Ordering::SeqCst);
    }

    pub fn set_supports_direct_delivery(&self, supports: bool) {
        self.supports_direct.store(supports, Ordering::SeqCst);
    }

    /// Makes the callback claim the delivery-count adjustment after cancels.
    pub fn own_delivery_count_updates(&self, own: bool) {
        self.owns_delivery_count_update.store(own, Ordering::SeqCst);
    }

    /// Makes the next send fail with a transport error.
    pub fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentPacket> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn after_delivery_count(&self) -> usize {
        self.after_delivery_calls.load(Ordering::SeqCst)
    }

    pub fn browser_finished_count(&self) -> usize {
        self.browser_finished_calls.load(Ordering::SeqCst)
    }

    pub fn disconnected_queues(&self) -> Vec<String> {
        self.disconnected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, packet: SentPacket) -> Result<usize, DeliveryError> {
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(DeliveryError::Transport("injected send failure".into()));
        }
        let size = packet.size();
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(packet);
        Ok(size)
    }
}

impl SessionCallback for RecordingCallback {
    fn has_credits(&self, _consumer: &QueueConsumer, _reference: &Arc<dyn MessageReference>) -> bool {
        self.protocol_credits.load(Ordering::SeqCst)
    }

    fn is_writable(&self, _consumer: &QueueConsumer) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    fn send_message(
        &self,
        reference: &Arc<dyn MessageReference>,
        message: &Arc<dyn Message>,
        _consumer: &QueueConsumer,
        delivery_count: u32,
    ) -> Result<usize, DeliveryError> {
        self.record(SentPacket::Message {
            message_id: reference.message_id(),
            address: message.address(),
            delivery_count,
            size: message.encoded_size() as usize + PACKET_OVERHEAD,
            forced_sequence: message.forced_delivery_sequence(),
        })
    }

    fn send_large_message(
        &self,
        reference: &Arc<dyn MessageReference>,
        _message: &Arc<dyn Message>,
        _consumer: &QueueConsumer,
        total_size: u64,
        delivery_count: u32,
    ) -> Result<usize, DeliveryError> {
        self.record(SentPacket::LargeHeader {
            message_id: reference.message_id(),
            total_size,
            delivery_count,
            size: PACKET_OVERHEAD,
        })
    }

    fn send_large_message_continuation(
        &self,
        _consumer: &QueueConsumer,
        body: &[u8],
        has_more: bool,
        requires_response: bool,
    ) -> Result<usize, DeliveryError> {
        self.record(SentPacket::Continuation {
            body_len: body.len(),
            has_more,
            requires_response,
            size: body.len() + PACKET_OVERHEAD,
        })
    }

    fn update_delivery_count_after_cancel(
        &self,
        _consumer: &QueueConsumer,
        _reference: &Arc<dyn MessageReference>,
        _failed: bool,
    ) -> bool {
        self.owns_delivery_count_update.load(Ordering::SeqCst)
    }

    fn after_delivery(&self) {
        self.after_delivery_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnect(&self, _consumer: &QueueConsumer, queue_name: &str) {
        self.disconnected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(queue_name.to_string());
    }

    fn browser_finished(&self, _consumer: &QueueConsumer) {
        self.browser_finished_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn supports_direct_delivery(&self) -> bool {
        self.supports_direct.load(Ordering::SeqCst)
    }
}
