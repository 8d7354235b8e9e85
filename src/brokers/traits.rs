//! Interface boundaries for the native broker client libraries.
//!
//! The wire protocols themselves live outside this crate: a concrete
//! broker library (or a test fake) implements one of these traits and
//! the matching adapter drives it. `connect` is called once at
//! `start()` and again by the reconnect path after a drop; the `next_*`
//! receive calls park until a message arrives, the stream ends cleanly
//! (`Ok(None)`), or the connection fails (`Err`).

use crate::config::ConsumerConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// One record from a partitioned log topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub partition: i32,
    pub offset: i64,
    /// Partitioning key; not the routing key.
    pub key: Option<String>,
    pub payload: Vec<u8>,
    /// Raw header bytes as carried on the wire; the adapter decodes
    /// values as UTF-8 and rejects the record if any value is not.
    pub headers: Vec<(String, Vec<u8>)>,
}

/// Client for a log-based broker (partitioned topics, offsets).
#[async_trait]
pub trait LogClient: Send + Sync {
    async fn connect(&self, config: &ConsumerConfig) -> Result<()>;
    async fn poll(&self) -> Result<Option<LogRecord>>;
    /// Mark everything up to and including `offset` as processed.
    async fn commit(&self, partition: i32, offset: i64) -> Result<()>;
    async fn disconnect(&self);
}

/// One delivery from an AMQP-style queue broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDelivery {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub reply_to: Option<String>,
    /// Raw header bytes as carried on the wire; the adapter decodes
    /// values as UTF-8 and rejects the delivery if any value is not.
    pub headers: Vec<(String, Vec<u8>)>,
    pub payload: Vec<u8>,
    /// Set by the broker when this is not the first delivery attempt.
    pub redelivered: bool,
}

/// Client for a queue broker with per-delivery acknowledgement.
#[async_trait]
pub trait QueueClient: Send + Sync {
    async fn connect(&self, config: &ConsumerConfig) -> Result<()>;
    async fn next_delivery(&self) -> Result<Option<QueueDelivery>>;
    async fn ack(&self, delivery_tag: u64) -> Result<()>;
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;
    async fn disconnect(&self);
}

/// One message pushed by a pub/sub subscription. No tag, no redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Client for a pub/sub store subscription.
#[async_trait]
pub trait PubSubClient: Send + Sync {
    async fn connect(&self, config: &ConsumerConfig) -> Result<()>;
    async fn next_message(&self) -> Result<Option<PubSubMessage>>;
    async fn disconnect(&self);
}

/// Publish seam for the log broker, owned by the log producer adapter.
#[async_trait]
pub trait LogPublisher: Send + Sync {
    async fn produce(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<()>;
}

/// Publish seam for the queue broker.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    async fn publish(
        &self,
        routing_key: &str,
        payload: &[u8],
        headers: &HashMap<String, String>,
        reply_to: Option<&str>,
    ) -> Result<()>;
}

/// Publish seam for the pub/sub store.
#[async_trait]
pub trait PubSubPublisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()>;
}
