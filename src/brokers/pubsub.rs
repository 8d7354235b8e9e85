//! Adapter for a pub/sub store (subscription push, no delivery tags).
//!
//! At-most-once: the medium has no acknowledgement or redelivery, so a
//! dropped connection loses any message that was in flight. That is a
//! property of the backend and is deliberately not upgraded here; use
//! the queue or log adapter when delivery must survive a disconnect.
//!
//! The wire format carries only a payload. An envelope with headers,
//! routing key, or reply-to is transported as a JSON wrapper object
//! (`{"body": "<text>", "headers": {...}, ...}`, body as UTF-8 text);
//! a bare payload passes through untouched and is decoded with the
//! subscribed channel as its routing key.

use crate::brokers::traits::{PubSubClient, PubSubMessage, PubSubPublisher};
use crate::brokers::BrokerProducer;
use crate::config::ConsumerConfig;
use crate::consumer::{
    reconnect_with_backoff, AgentBinding, AgentDispatch, BrokerConsumer, ConsumerState, Lifecycle,
};
use crate::envelope::Envelope;
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// JSON wire shape of a wrapped envelope. The body travels as text, not
/// as a byte array, so wrapped messages stay readable to other
/// subscribers of the channel.
#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    body: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    routing_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
}

/// Translate a subscription message into an envelope.
///
/// A JSON object with a `body` key is treated as a wrapped envelope; a
/// wrapper that fails to deserialize is a [`RelayError::Decode`] and is
/// skipped by the receive loop. Anything else is an unwrapped payload.
pub fn decode_message(message: PubSubMessage) -> Result<Envelope> {
    if looks_wrapped(&message.payload) {
        let wire: WireEnvelope = serde_json::from_slice(&message.payload)
            .map_err(|err| RelayError::Decode(format!("invalid envelope wrapper: {err}")))?;
        let mut envelope = Envelope::new(wire.body.into_bytes()).with_headers(wire.headers);
        envelope.routing_key = wire.routing_key;
        envelope.reply_to = wire.reply_to;
        return Ok(envelope);
    }
    Ok(Envelope::new(message.payload).with_routing_key(message.channel))
}

/// Translate an envelope into a wire payload, wrapping only when there
/// is metadata the bare medium cannot carry. Wrapping requires a UTF-8
/// body; a bare binary payload still passes through untouched.
pub fn encode_message(envelope: &Envelope) -> Result<Vec<u8>> {
    if envelope.headers.is_empty() && envelope.routing_key.is_none() && envelope.reply_to.is_none()
    {
        return Ok(envelope.body.clone());
    }
    let body = envelope
        .body_str()
        .ok_or_else(|| RelayError::Decode("wrapped pubsub body must be valid UTF-8".into()))?;
    let wire = WireEnvelope {
        body: body.to_string(),
        headers: envelope.headers.clone(),
        routing_key: envelope.routing_key.clone(),
        reply_to: envelope.reply_to.clone(),
    };
    serde_json::to_vec(&wire)
        .map_err(|err| RelayError::Decode(format!("envelope not serializable: {err}")))
}

fn looks_wrapped(payload: &[u8]) -> bool {
    matches!(
        serde_json::from_slice::<serde_json::Value>(payload),
        Ok(serde_json::Value::Object(map)) if map.contains_key("body")
    )
}

/// Subscribes to a pub/sub channel and dispatches into an agent binding.
pub struct PubSubConsumer<C> {
    client: Arc<C>,
    config: ConsumerConfig,
    dispatch: Arc<AgentDispatch>,
    lifecycle: Arc<Lifecycle>,
}

impl<C: PubSubClient + 'static> PubSubConsumer<C> {
    pub fn new(
        client: C,
        config: ConsumerConfig,
        binding: AgentBinding,
        reply_producer: Option<Arc<dyn BrokerProducer>>,
    ) -> Self {
        let grace = config.grace_period;
        Self {
            client: Arc::new(client),
            config,
            dispatch: Arc::new(AgentDispatch::new(binding, reply_producer)),
            lifecycle: Arc::new(Lifecycle::new("pubsub", grace)),
        }
    }
}

#[async_trait]
impl<C: PubSubClient + 'static> BrokerConsumer for PubSubConsumer<C> {
    async fn start(&self) -> Result<()> {
        self.config.validate()?;
        self.lifecycle.begin_start()?;
        if let Err(err) = self.client.connect(&self.config).await {
            self.lifecycle.mark_stopped();
            return Err(err);
        }
        info!(channel = %self.config.source, "pubsub consumer started");

        let client = Arc::clone(&self.client);
        let config = self.config.clone();
        let dispatch = Arc::clone(&self.dispatch);
        let lifecycle = Arc::clone(&self.lifecycle);
        let shutdown = self.lifecycle.shutdown_signal();
        self.lifecycle.attach(tokio::spawn(run_loop(
            client, config, dispatch, lifecycle, shutdown,
        )));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.stop().await;
        self.client.disconnect().await;
        info!(channel = %self.config.source, "pubsub consumer stopped");
        Ok(())
    }

    fn state(&self) -> ConsumerState {
        self.lifecycle.state()
    }

    fn name(&self) -> &str {
        "pubsub"
    }
}

async fn run_loop<C: PubSubClient>(
    client: Arc<C>,
    config: ConsumerConfig,
    dispatch: Arc<AgentDispatch>,
    lifecycle: Arc<Lifecycle>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = client.next_message() => received,
        };
        match received {
            Ok(Some(message)) => match decode_message(message) {
                Ok(envelope) => match dispatch.process_message(&envelope).await {
                    Ok(()) => {}
                    // No tag and no redelivery: a failed handler is
                    // logged and the message is gone.
                    Err(err) if err.is_per_message() => {
                        error!(%err, "message processing failed; pubsub message is lost");
                    }
                    Err(err) => {
                        error!(%err, "unrecoverable dispatch failure; stopping consumer");
                        break;
                    }
                },
                Err(err) => warn!(%err, "skipping undecodable pubsub message"),
            },
            Ok(None) => {
                info!(channel = %config.source, "pubsub subscription ended");
                break;
            }
            Err(err) => {
                warn!(%err, "pubsub connection lost; in-flight messages are gone");
                let reconnected = {
                    let client = Arc::clone(&client);
                    let cfg = config.clone();
                    reconnect_with_backoff(&config.retry, &mut shutdown, move || {
                        let client = Arc::clone(&client);
                        let cfg = cfg.clone();
                        async move { client.connect(&cfg).await }
                    })
                    .await
                };
                if !reconnected {
                    break;
                }
            }
        }
    }
    client.disconnect().await;
    lifecycle.mark_stopped();
}

/// Publishes envelopes to a pub/sub channel.
pub struct PubSubProducer<P> {
    publisher: P,
}

impl<P: PubSubPublisher> PubSubProducer<P> {
    pub fn new(publisher: P) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl<P: PubSubPublisher> BrokerProducer for PubSubProducer<P> {
    async fn send(&self, envelope: &Envelope, destination: &str) -> Result<()> {
        let payload = encode_message(envelope).map_err(|err| RelayError::Publish {
            destination: destination.to_string(),
            reason: err.to_string(),
        })?;
        self.publisher
            .publish(destination, &payload)
            .await
            .map_err(|err| RelayError::Publish {
                destination: destination.to_string(),
                reason: err.to_string(),
            })
    }

    fn name(&self) -> &str {
        "pubsub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentHandler, AgentRegistry};
    use crate::routing::PatternRouter;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct FakePubSubClient {
        items: Mutex<VecDeque<Result<Option<PubSubMessage>>>>,
        wakeup: Notify,
        fail_connect: AtomicBool,
        connected: AtomicBool,
    }

    impl FakePubSubClient {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                items: Mutex::new(VecDeque::new()),
                wakeup: Notify::new(),
                fail_connect: AtomicBool::new(false),
                connected: AtomicBool::new(false),
            })
        }

        fn push_payload(&self, channel: &str, payload: Vec<u8>) {
            self.items.lock().push_back(Ok(Some(PubSubMessage {
                channel: channel.to_string(),
                payload,
            })));
            self.wakeup.notify_one();
        }
    }

    #[async_trait]
    impl PubSubClient for Arc<FakePubSubClient> {
        async fn connect(&self, _config: &ConsumerConfig) -> Result<()> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(RelayError::Connection("store unreachable".into()));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn next_message(&self) -> Result<Option<PubSubMessage>> {
            loop {
                if let Some(item) = self.items.lock().pop_front() {
                    return item;
                }
                self.wakeup.notified().await;
            }
        }

        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    struct RecordingAgent {
        seen: Mutex<Vec<Envelope>>,
    }

    impl RecordingAgent {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AgentHandler for RecordingAgent {
        async fn handle(&self, envelope: &Envelope) -> anyhow::Result<Option<Envelope>> {
            self.seen.lock().push(envelope.clone());
            if envelope.body_str().unwrap_or_default().starts_with("fail") {
                anyhow::bail!("agent rejected message");
            }
            Ok(None)
        }
        fn name(&self) -> &str {
            "recording"
        }
    }

    fn test_config() -> ConsumerConfig {
        let mut config = ConsumerConfig::new("store-1:6379", "updates");
        config.retry.max_attempts = 2;
        config.retry.base_delay = Duration::from_millis(1);
        config.grace_period = Duration::from_millis(200);
        config
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn wrapped_round_trip_preserves_envelope_fields() {
        let envelope = Envelope::new("payload")
            .with_header("trace-id", "abc")
            .with_routing_key("updates.eu")
            .with_reply_to("updates.replies");

        let payload = encode_message(&envelope).unwrap();
        let decoded = decode_message(PubSubMessage {
            channel: "updates".to_string(),
            payload,
        })
        .unwrap();

        assert_eq!(decoded.body, envelope.body);
        assert_eq!(decoded.headers, envelope.headers);
        assert_eq!(decoded.routing_key, envelope.routing_key);
        assert_eq!(decoded.reply_to, envelope.reply_to);
    }

    #[test]
    fn bare_payload_passes_through_with_channel_as_routing_key() {
        let envelope = Envelope::new("plain text");
        let payload = encode_message(&envelope).unwrap();
        assert_eq!(payload, b"plain text");

        let decoded = decode_message(PubSubMessage {
            channel: "updates".to_string(),
            payload,
        })
        .unwrap();
        assert_eq!(decoded.body, b"plain text");
        assert_eq!(decoded.routing_key.as_deref(), Some("updates"));
    }

    #[test]
    fn wrapper_carries_body_as_text() {
        let payload = encode_message(&Envelope::new("hola").with_header("k", "v")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["body"], "hola");
        assert_eq!(value["headers"]["k"], "v");
    }

    #[test]
    fn malformed_wrapper_is_a_decode_error() {
        let result = decode_message(PubSubMessage {
            channel: "updates".to_string(),
            payload: br#"{"body": 12}"#.to_vec(),
        });
        assert!(matches!(result, Err(RelayError::Decode(_))));
    }

    #[test]
    fn wrapping_a_binary_body_is_rejected() {
        let envelope = Envelope::new(vec![0xff, 0xfe]).with_header("k", "v");
        assert!(matches!(
            encode_message(&envelope),
            Err(RelayError::Decode(_))
        ));
        // Without metadata the same body passes through bare.
        assert_eq!(
            encode_message(&Envelope::new(vec![0xff, 0xfe])).unwrap(),
            vec![0xff, 0xfe]
        );
    }

    #[tokio::test]
    async fn undecodable_message_is_skipped_not_fatal() {
        let client = FakePubSubClient::new();
        let agent = RecordingAgent::new();
        client.push_payload("updates", br#"{"body": 12}"#.to_vec());
        client.push_payload("updates", b"good one".to_vec());

        let consumer = PubSubConsumer::new(
            client.clone(),
            test_config(),
            AgentBinding::single(agent.clone()),
            None,
        );
        consumer.start().await.unwrap();
        wait_until(|| !agent.seen.lock().is_empty()).await;
        consumer.stop().await.unwrap();

        let seen = agent.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].body_str(), Some("good one"));
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn handler_failure_does_not_stop_the_subscription() {
        let client = FakePubSubClient::new();
        let agent = RecordingAgent::new();
        client.push_payload("updates", b"fail-me".to_vec());
        client.push_payload("updates", b"still here".to_vec());

        let consumer = PubSubConsumer::new(
            client.clone(),
            test_config(),
            AgentBinding::single(agent.clone()),
            None,
        );
        consumer.start().await.unwrap();
        wait_until(|| agent.seen.lock().len() == 2).await;
        consumer.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unroutable_message_stops_the_consumer() {
        let mut registry = AgentRegistry::new();
        registry.register("recorder", RecordingAgent::new());
        let mut router = PatternRouter::new(registry);
        router.add_route("updates\\..+", "recorder").unwrap();

        let client = FakePubSubClient::new();
        // Bare payload, so the routing key is the channel "updates",
        // which matches no route and there is no default agent.
        client.push_payload("updates", b"stray".to_vec());
        let consumer = PubSubConsumer::new(
            client.clone(),
            test_config(),
            AgentBinding::routed(Arc::new(router)),
            None,
        );
        consumer.start().await.unwrap();

        wait_until(|| consumer.state() == ConsumerState::Stopped).await;
        assert!(!client.connected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn connection_failure_at_start_surfaces() {
        let client = FakePubSubClient::new();
        client.fail_connect.store(true, Ordering::SeqCst);
        let consumer = PubSubConsumer::new(
            client,
            test_config(),
            AgentBinding::single(RecordingAgent::new()),
            None,
        );
        assert!(matches!(
            consumer.start().await,
            Err(RelayError::Connection(_))
        ));
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    struct FakePubSubPublisher {
        published: Mutex<Vec<(String, Vec<u8>)>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl PubSubPublisher for Arc<FakePubSubPublisher> {
        async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(RelayError::Connection("store gone".into()));
            }
            self.published
                .lock()
                .push((channel.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn producer_failure_is_publish_error() {
        let publisher = Arc::new(FakePubSubPublisher {
            published: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        });
        let producer = PubSubProducer::new(publisher);

        match producer.send(&Envelope::new("out"), "updates").await {
            Err(RelayError::Publish { destination, .. }) => assert_eq!(destination, "updates"),
            other => panic!("expected Publish error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn producer_rejects_binary_body_with_metadata() {
        let publisher = Arc::new(FakePubSubPublisher {
            published: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        });
        let producer = PubSubProducer::new(publisher.clone());

        let envelope = Envelope::new(vec![0xff, 0xfe]).with_header("k", "v");
        match producer.send(&envelope, "updates").await {
            Err(RelayError::Publish { destination, .. }) => assert_eq!(destination, "updates"),
            other => panic!("expected Publish error, got {other:?}"),
        }
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn producer_wraps_only_when_metadata_present() {
        let publisher = Arc::new(FakePubSubPublisher {
            published: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        });
        let producer = PubSubProducer::new(publisher.clone());

        producer
            .send(&Envelope::new("bare"), "updates")
            .await
            .unwrap();
        producer
            .send(&Envelope::new("rich").with_header("k", "v"), "updates")
            .await
            .unwrap();

        let published = publisher.published.lock();
        assert_eq!(published[0].1, b"bare");
        assert!(looks_wrapped(&published[1].1));
    }
}
