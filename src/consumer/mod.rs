//! Consumer lifecycle contract and the dispatch path shared by every
//! broker adapter.

pub mod lifecycle;
pub mod traits;

pub use lifecycle::Lifecycle;
pub use traits::{BrokerConsumer, ConsumerState};

use crate::agent::AgentHandler;
use crate::brokers::BrokerProducer;
use crate::config::RetryPolicy;
use crate::envelope::Envelope;
use crate::error::{RelayError, Result};
use crate::routing::PatternRouter;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, warn};

/// What a consumer dispatches decoded envelopes into: either one fixed
/// handler, or a router when the physical channel multiplexes messages
/// for several logical recipients.
#[derive(Clone)]
pub enum AgentBinding {
    Single(Arc<dyn AgentHandler>),
    Routed(Arc<PatternRouter>),
}

impl AgentBinding {
    pub fn single(handler: Arc<dyn AgentHandler>) -> Self {
        Self::Single(handler)
    }

    pub fn routed(router: Arc<PatternRouter>) -> Self {
        Self::Routed(router)
    }

    /// Invoke the bound target and return its response, if any.
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<Option<Envelope>> {
        match self {
            Self::Single(handler) => handler
                .handle(envelope)
                .await
                .map_err(RelayError::Handler),
            Self::Routed(router) => router.route(envelope).await,
        }
    }
}

/// The internal dispatch primitive common to all adapters: invoke the
/// agent binding, then publish a returned response to the inbound
/// message's `reply_to` when one is set.
pub(crate) struct AgentDispatch {
    binding: AgentBinding,
    reply_producer: Option<Arc<dyn BrokerProducer>>,
}

impl AgentDispatch {
    pub fn new(binding: AgentBinding, reply_producer: Option<Arc<dyn BrokerProducer>>) -> Self {
        Self {
            binding,
            reply_producer,
        }
    }

    pub async fn process_message(&self, envelope: &Envelope) -> Result<()> {
        let response = self.binding.dispatch(envelope).await?;
        let (Some(response), Some(reply_to)) = (response, envelope.reply_to.as_deref()) else {
            return Ok(());
        };
        match &self.reply_producer {
            Some(producer) => producer.send(&response, reply_to).await,
            None => {
                warn!(
                    reply_to,
                    "handler produced a response but no reply producer is configured; dropping"
                );
                Ok(())
            }
        }
    }
}

/// Re-establish a dropped connection with bounded exponential backoff.
///
/// Returns `true` once connected, `false` when the shutdown signal
/// fired or the attempt budget ran out, at which point the caller must
/// exit its loop and mark the consumer stopped.
pub(crate) async fn reconnect_with_backoff<F, Fut>(
    retry: &RetryPolicy,
    shutdown: &mut watch::Receiver<bool>,
    mut connect: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    for attempt in 1..=retry.max_attempts {
        let delay = retry.delay_for(attempt);
        tokio::select! {
            _ = shutdown.changed() => return false,
            () = tokio::time::sleep(delay) => {}
        }
        match connect().await {
            Ok(()) => return true,
            Err(err) => warn!(
                %err,
                attempt,
                max_attempts = retry.max_attempts,
                "reconnect attempt failed"
            ),
        }
    }
    error!(
        max_attempts = retry.max_attempts,
        "reconnect attempts exhausted; consumer will stop"
    );
    false
}
