//! Adapter for a log-based broker (partitioned topics with offsets).
//!
//! At-least-once: the offset is committed only after the handler
//! succeeds, so a crash or a failed handler leads to redelivery on
//! restart or rebalance. Records of one partition are processed
//! strictly in arrival order; nothing is guaranteed across partitions.

use crate::brokers::traits::{LogClient, LogPublisher, LogRecord};
use crate::brokers::{decode_wire_headers, BrokerProducer};
use crate::config::ConsumerConfig;
use crate::consumer::{
    reconnect_with_backoff, AgentBinding, AgentDispatch, BrokerConsumer, ConsumerState, Lifecycle,
};
use crate::envelope::{DeliveryToken, Envelope};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// The log wire format has no reply-to field, so it rides in a header.
const REPLY_TO_HEADER: &str = "reply-to";

/// Translate a native record into an envelope. The record's topic is
/// the routing key; a `reply-to` header, if present, is lifted out of
/// the header map into the envelope field. Header values that are not
/// valid UTF-8 fail the record as [`RelayError::Decode`].
pub fn decode_record(record: LogRecord, topic: &str) -> Result<Envelope> {
    let mut headers = decode_wire_headers(record.headers)?;
    let reply_to = headers.remove(REPLY_TO_HEADER);
    let mut envelope = Envelope::new(record.payload)
        .with_headers(headers)
        .with_routing_key(topic)
        .with_token(DeliveryToken::LogOffset {
            partition: record.partition,
            offset: record.offset,
        });
    envelope.reply_to = reply_to;
    Ok(envelope)
}

/// Translate an envelope into the payload and headers of a native
/// record, folding `reply_to` back into the header map.
pub fn encode_record(envelope: &Envelope) -> (Vec<u8>, HashMap<String, String>) {
    let mut headers = envelope.headers.clone();
    if let Some(reply_to) = &envelope.reply_to {
        headers.insert(REPLY_TO_HEADER.to_string(), reply_to.clone());
    }
    (envelope.body.clone(), headers)
}

/// Consumes a partitioned log topic and dispatches into an agent binding.
pub struct LogConsumer<C> {
    client: Arc<C>,
    config: ConsumerConfig,
    dispatch: Arc<AgentDispatch>,
    lifecycle: Arc<Lifecycle>,
}

impl<C: LogClient + 'static> LogConsumer<C> {
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
            lifecycle: Arc::new(Lifecycle::new("log", grace)),
        }
    }
}

#[async_trait]
impl<C: LogClient + 'static> BrokerConsumer for LogConsumer<C> {
    async fn start(&self) -> Result<()> {
        self.config.validate()?;
        self.lifecycle.begin_start()?;
        if let Err(err) = self.client.connect(&self.config).await {
            self.lifecycle.mark_stopped();
            return Err(err);
        }
        info!(topic = %self.config.source, "log consumer started");

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
        info!(topic = %self.config.source, "log consumer stopped");
        Ok(())
    }

    fn state(&self) -> ConsumerState {
        self.lifecycle.state()
    }

    fn name(&self) -> &str {
        "log"
    }
}

async fn run_loop<C: LogClient>(
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
        let polled = tokio::select! {
            _ = shutdown.changed() => break,
            polled = client.poll() => polled,
        };
        match polled {
            Ok(Some(record)) => {
                let (partition, offset) = (record.partition, record.offset);
                match decode_record(record, &config.source) {
                    Ok(envelope) => match dispatch.process_message(&envelope).await {
                        Ok(()) => {
                            if let Err(err) = client.commit(partition, offset).await {
                                warn!(
                                    %err, partition, offset,
                                    "offset commit failed; duplicate delivery possible"
                                );
                            }
                        }
                        Err(err) if err.is_per_message() => error!(
                            %err, partition, offset,
                            "message processing failed; offset left uncommitted for redelivery"
                        ),
                        Err(err) => {
                            error!(
                                %err, partition, offset,
                                "unrecoverable dispatch failure; stopping consumer"
                            );
                            break;
                        }
                    },
                    Err(err) => warn!(%err, partition, offset, "skipping undecodable record"),
                }
            }
            Ok(None) => {
                info!(topic = %config.source, "log subscription ended");
                break;
            }
            Err(err) => {
                warn!(%err, "log connection lost");
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

/// Publishes envelopes as log records. The destination is the topic;
/// the envelope's routing key doubles as the partitioning key so that
/// per-key order is preserved.
pub struct LogProducer<P> {
    publisher: P,
}

impl<P: LogPublisher> LogProducer<P> {
    pub fn new(publisher: P) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl<P: LogPublisher> BrokerProducer for LogProducer<P> {
    async fn send(&self, envelope: &Envelope, destination: &str) -> Result<()> {
        let (payload, headers) = encode_record(envelope);
        self.publisher
            .produce(destination, envelope.routing_key.as_deref(), &payload, &headers)
            .await
            .map_err(|err| RelayError::Publish {
                destination: destination.to_string(),
                reason: err.to_string(),
            })
    }

    fn name(&self) -> &str {
        "log"
    }
}
