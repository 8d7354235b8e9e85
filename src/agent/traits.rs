//! Handler trait for the downstream agent execution engine.

use crate::envelope::Envelope;
use async_trait::async_trait;

/// The downstream agent boundary.
///
/// This layer makes no assumption about the handler's internals beyond
/// this signature: it consumes an [`Envelope`] and optionally produces a
/// response envelope, which the owning adapter publishes to the inbound
/// message's `reply_to` when one is set. A returned error is caught at
/// the adapter boundary and converted into that broker's reject path; a
/// handler can never terminate the receive loop.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> anyhow::Result<Option<Envelope>>;

    /// The name of this handler implementation.
    fn name(&self) -> &str;
}

impl std::fmt::Debug for dyn AgentHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandler")
            .field("name", &self.name())
            .finish()
    }
}
