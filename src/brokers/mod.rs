//! Broker adapters: one consumer/producer pair per backend, each
//! translating between native messages and [`crate::Envelope`]s.
//!
//! Delivery guarantees differ by backend and are preserved, not
//! papered over:
//! - log broker: at-least-once; offsets commit after handler success,
//!   in-partition order preserved.
//! - queue broker: at-least-once with redelivery on nack; handlers must
//!   tolerate duplicates.
//! - pub/sub store: at-most-once; a dropped connection loses
//!   unacknowledged messages permanently.

pub mod log;
pub mod pubsub;
pub mod queue;
pub mod traits;

pub use log::{LogConsumer, LogProducer};
pub use pubsub::{PubSubConsumer, PubSubProducer};
pub use queue::{QueueBrokerConsumer, QueueBrokerProducer};

use crate::envelope::Envelope;
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use std::collections::HashMap;

/// Decode raw wire headers into the envelope's string map. Headers are
/// a UTF-8 contract at this boundary; a value that is not valid UTF-8
/// makes the whole message undecodable.
pub(crate) fn decode_wire_headers(raw: Vec<(String, Vec<u8>)>) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::with_capacity(raw.len());
    for (key, value) in raw {
        let value = String::from_utf8(value)
            .map_err(|_| RelayError::Decode(format!("header '{key}' is not valid UTF-8")))?;
        headers.insert(key, value);
    }
    Ok(headers)
}

/// Send-side mirror of [`crate::consumer::BrokerConsumer`]: publishes
/// an outbound envelope to a broker-native destination.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Publish `envelope`'s body and headers to `destination` (a topic,
    /// queue, or channel name). `reply_to` is forwarded unchanged so
    /// request/reply chains survive the hop. Failure surfaces as
    /// [`crate::RelayError::Publish`]; nothing is dropped silently.
    async fn send(&self, envelope: &Envelope, destination: &str) -> Result<()>;

    /// The name of this producer implementation.
    fn name(&self) -> &str;
}
