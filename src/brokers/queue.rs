//! Adapter for an AMQP-style queue broker (delivery tags, ack/nack).
//!
//! At-least-once: a failed handler negative-acknowledges with requeue
//! (configurable), so the broker may redeliver. Handlers must tolerate
//! duplicates; this layer does not deduplicate redeliveries by id.
//! A delivery that cannot be decoded is rejected without requeue so a
//! poison message cannot loop forever.

use crate::brokers::traits::{QueueClient, QueueDelivery, QueuePublisher};
use crate::brokers::{decode_wire_headers, BrokerProducer};
use crate::config::ConsumerConfig;
use crate::consumer::{
    reconnect_with_backoff, AgentBinding, AgentDispatch, BrokerConsumer, ConsumerState, Lifecycle,
};
use crate::envelope::{DeliveryToken, Envelope};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Translate a native delivery into an envelope. Routing key, headers
/// and reply-to travel natively on this broker; only the delivery tag
/// becomes adapter-owned token state. Header values that are not valid
/// UTF-8 fail the delivery as [`RelayError::Decode`].
pub fn decode_delivery(delivery: QueueDelivery) -> Result<Envelope> {
    let headers = decode_wire_headers(delivery.headers)?;
    let mut envelope = Envelope::new(delivery.payload)
        .with_headers(headers)
        .with_routing_key(delivery.routing_key)
        .with_token(DeliveryToken::DeliveryTag(delivery.delivery_tag));
    envelope.reply_to = delivery.reply_to;
    Ok(envelope)
}

/// Consumes a queue and dispatches into an agent binding.
pub struct QueueBrokerConsumer<C> {
    client: Arc<C>,
    config: ConsumerConfig,
    dispatch: Arc<AgentDispatch>,
    lifecycle: Arc<Lifecycle>,
}

impl<C: QueueClient + 'static> QueueBrokerConsumer<C> {
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
            lifecycle: Arc::new(Lifecycle::new("queue", grace)),
        }
    }
}

#[async_trait]
impl<C: QueueClient + 'static> BrokerConsumer for QueueBrokerConsumer<C> {
    async fn start(&self) -> Result<()> {
        self.config.validate()?;
        self.lifecycle.begin_start()?;
        if let Err(err) = self.client.connect(&self.config).await {
            self.lifecycle.mark_stopped();
            return Err(err);
        }
        info!(queue = %self.config.source, "queue consumer started");

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
        info!(queue = %self.config.source, "queue consumer stopped");
        Ok(())
    }

    fn state(&self) -> ConsumerState {
        self.lifecycle.state()
    }

    fn name(&self) -> &str {
        "queue"
    }
}

async fn run_loop<C: QueueClient>(
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
            received = client.next_delivery() => received,
        };
        match received {
            Ok(Some(delivery)) => {
                let tag = delivery.delivery_tag;
                if delivery.redelivered {
                    debug!(tag, "processing redelivered message");
                }
                match decode_delivery(delivery) {
                    Ok(envelope) => match dispatch.process_message(&envelope).await {
                        Ok(()) => {
                            if let Err(err) = client.ack(tag).await {
                                warn!(%err, tag, "ack failed; broker may redeliver");
                            }
                        }
                        Err(err) if err.is_per_message() => {
                            error!(
                                %err, tag,
                                requeue = config.requeue_on_failure,
                                "message processing failed; rejecting delivery"
                            );
                            if let Err(err) =
                                client.nack(tag, config.requeue_on_failure).await
                            {
                                warn!(%err, tag, "nack failed");
                            }
                        }
                        Err(err) => {
                            // Ack left pending so the broker redelivers
                            // once a corrected consumer reconnects.
                            error!(
                                %err, tag,
                                "unrecoverable dispatch failure; stopping consumer"
                            );
                            break;
                        }
                    },
                    Err(err) => {
                        warn!(%err, tag, "undecodable delivery; rejecting without requeue");
                        if let Err(err) = client.nack(tag, false).await {
                            warn!(%err, tag, "nack failed");
                        }
                    }
                }
            }
            Ok(None) => {
                info!(queue = %config.source, "queue subscription ended");
                break;
            }
            Err(err) => {
                warn!(%err, "queue connection lost");
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

/// Publishes envelopes to the queue broker. The destination argument is
/// the binding key messages are published under; headers and reply-to
/// travel natively.
pub struct QueueBrokerProducer<P> {
    publisher: P,
}

impl<P: QueuePublisher> QueueBrokerProducer<P> {
    pub fn new(publisher: P) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl<P: QueuePublisher> BrokerProducer for QueueBrokerProducer<P> {
    async fn send(&self, envelope: &Envelope, destination: &str) -> Result<()> {
        self.publisher
            .publish(
                destination,
                &envelope.body,
                &envelope.headers,
                envelope.reply_to.as_deref(),
            )
            .await
            .map_err(|err| RelayError::Publish {
                destination: destination.to_string(),
                reason: err.to_string(),
            })
    }

    fn name(&self) -> &str {
        "queue"
    }
}
