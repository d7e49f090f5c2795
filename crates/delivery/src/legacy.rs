//! Address rewriting for pre-addressing-change clients.
//!
//! Older clients expect destination names prefixed by kind. When the owning
//! session carries the JMS marker and its remoting channel predates the
//! addressing change, every outgoing message has its address prefixed:
//! queue prefix for anycast bindings, topic prefix otherwise. The rewrite is
//! idempotent.

use std::sync::Arc;

use crate::config::{QueueBinding, RoutingType};
use crate::spi::{LargeBodyReader, Message, Session};

/// First remoting-channel version with prefixless addressing.
pub const ADDRESSING_CHANGE_VERSION: i32 = 129;

/// Session metadata key identifying a JMS client session.
pub const JMS_SESSION_METADATA_KEY: &str = "jms-session";

/// Prefix applied to anycast addresses for legacy clients.
pub const ANYCAST_PREFIX: &str = "jms.queue.";

/// Prefix applied to multicast addresses for legacy clients.
pub const MULTICAST_PREFIX: &str = "jms.topic.";

/// Picks the prefix outgoing messages need for this session and binding, or
/// `None` for current clients.
pub(crate) fn legacy_prefix_for(session: &dyn Session, binding: &QueueBinding) -> Option<&'static str> {
    if session.channel_version() >= ADDRESSING_CHANGE_VERSION {
        return None;
    }
    session.metadata(JMS_SESSION_METADATA_KEY)?;
    Some(match binding.routing_type {
        RoutingType::Anycast => ANYCAST_PREFIX,
        RoutingType::Multicast => MULTICAST_PREFIX,
    })
}

/// Applies `prefix` to the message's address, delegating everything else.
///
/// Returns the message unchanged when the address already carries the
/// prefix.
pub(crate) fn apply_prefix(message: Arc<dyn Message>, prefix: &'static str) -> Arc<dyn Message> {
    if message.address().starts_with(prefix) {
        return message;
    }
    Arc::new(PrefixedMessage { inner: message, prefix })
}

/// A message view whose address carries the legacy prefix.
struct PrefixedMessage {
    inner: Arc<dyn Message>,
    prefix: &'static str,
}

impl Message for PrefixedMessage {
    fn address(&self) -> String {
        format!("{}{}", self.prefix, self.inner.address())
    }

    fn encoded_size(&self) -> u64 {
        self.inner.encoded_size()
    }

    fn is_durable(&self) -> bool {
        self.inner.is_durable()
    }

    fn is_large(&self) -> bool {
        self.inner.is_large()
    }

    fn accepts_consumer(&self, sequential_id: u64) -> bool {
        self.inner.accepts_consumer(sequential_id)
    }

    fn open_body_reader(&self) -> std::io::Result<Box<dyn LargeBodyReader>> {
        self.inner.open_body_reader()
    }

    fn usage_up(&self) {
        self.inner.usage_up();
    }

    fn usage_down(&self) {
        self.inner.usage_down();
    }

    fn string_property(&self, key: &str) -> Option<String> {
        self.inner.string_property(key)
    }

    fn forced_delivery_sequence(&self) -> Option<u64> {
        self.inner.forced_delivery_sequence()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PlainMessage(String);

    impl Message for PlainMessage {
        fn address(&self) -> String {
            self.0.clone()
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
            Err(std::io::Error::other("not a large message"))
        }
        fn usage_up(&self) {}
        fn usage_down(&self) {}
    }

    #[test]
    fn prefix_is_applied_once() {
        let message: Arc<dyn Message> = Arc::new(PlainMessage("orders".into()));
        let prefixed = apply_prefix(message, ANYCAST_PREFIX);
        assert_eq!(prefixed.address(), "jms.queue.orders");

        // Idempotent: a second pass leaves the address alone
        let again = apply_prefix(prefixed, ANYCAST_PREFIX);
        assert_eq!(again.address(), "jms.queue.orders");
    }
}
