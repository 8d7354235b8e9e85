//! The canonical in-memory representation of a broker message.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Adapter-owned acknowledgement token.
///
/// Everything needed to ack or reject the native message: a committed
/// offset for the log broker, a delivery tag for the queue broker,
/// nothing for pub/sub. Only the adapter that produced an envelope may
/// interpret its token; the router and handlers never look inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryToken {
    /// No acknowledgement path (pub/sub, or an envelope built locally).
    #[default]
    None,
    /// Partition and offset of a log record, committed after success.
    LogOffset { partition: i32, offset: i64 },
    /// AMQP-style delivery tag, acked or nacked after processing.
    DeliveryTag(u64),
}

/// A broker-agnostic message.
///
/// Every field except [`Envelope::token`] is fully broker-independent.
/// `routing_key` is whatever the backend calls its addressing string
/// (topic, binding key, channel name) and is what the router matches
/// against; `reply_to` names a destination for the handler's response.
///
/// Equality covers the four portable fields only; the token is
/// acknowledgement state, not message content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Opaque payload. Required, empty allowed.
    pub body: Vec<u8>,
    /// Application or broker metadata. Keys unique, order irrelevant.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Key the router matches patterns against. Absent matches as "".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
    /// Destination for the handler's response, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Acknowledgement token, owned by the originating adapter.
    #[serde(skip)]
    pub token: DeliveryToken,
}

impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.body == other.body
            && self.headers == other.headers
            && self.routing_key == other.routing_key
            && self.reply_to == other.reply_to
    }
}

impl Eq for Envelope {}

impl Envelope {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_routing_key(mut self, key: impl Into<String>) -> Self {
        self.routing_key = Some(key.into());
        self
    }

    pub fn with_reply_to(mut self, destination: impl Into<String>) -> Self {
        self.reply_to = Some(destination.into());
        self
    }

    pub(crate) fn with_token(mut self, token: DeliveryToken) -> Self {
        self.token = token;
        self
    }

    /// The routing key as matched by the router: absent means empty.
    pub fn routing_key_or_empty(&self) -> &str {
        self.routing_key.as_deref().unwrap_or("")
    }

    /// Body interpreted as UTF-8 text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_empty() {
        let env = Envelope::new("hello");
        assert_eq!(env.body, b"hello");
        assert!(env.headers.is_empty());
        assert!(env.routing_key.is_none());
        assert!(env.reply_to.is_none());
        assert_eq!(env.token, DeliveryToken::None);
    }

    #[test]
    fn missing_routing_key_matches_as_empty() {
        let env = Envelope::new(vec![]);
        assert_eq!(env.routing_key_or_empty(), "");
        let env = env.with_routing_key("orders.us");
        assert_eq!(env.routing_key_or_empty(), "orders.us");
    }

    #[test]
    fn equality_covers_all_portable_fields() {
        let a = Envelope::new("x")
            .with_header("k", "v")
            .with_routing_key("rk")
            .with_reply_to("replies");
        let b = a.clone();
        assert_eq!(a, b);
        let c = b.with_header("k2", "v2");
        assert_ne!(a, c);
    }

    #[test]
    fn token_does_not_affect_equality() {
        let plain = Envelope::new("x").with_header("k", "v");
        let tagged = plain.clone().with_token(DeliveryToken::DeliveryTag(7));
        let offset = plain.clone().with_token(DeliveryToken::LogOffset {
            partition: 1,
            offset: 99,
        });
        assert_eq!(plain, tagged);
        assert_eq!(tagged, offset);
    }

    #[test]
    fn body_str_rejects_invalid_utf8() {
        assert_eq!(Envelope::new("texte").body_str(), Some("texte"));
        assert!(Envelope::new(vec![0xff, 0xfe]).body_str().is_none());
    }
}
