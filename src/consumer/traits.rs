//! Lifecycle contract shared by every broker consumer.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Lifecycle states of a consumer. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerState {
    Created,
    Running,
    Stopped,
}

/// A broker-specific consumer driving envelopes into an agent binding.
///
/// Constructed in `Created`. `start()` is valid only once; `stop()` is
/// valid from any state and idempotent. The receive loop runs as a
/// background task owned by the consumer, and exactly one broker
/// connection belongs to each consumer instance.
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Connect to the broker and begin receiving messages.
    ///
    /// Fails with [`crate::RelayError::Connection`] when the broker is
    /// unreachable and with [`crate::RelayError::AlreadyRunning`] when
    /// called from `Running` or `Stopped`.
    async fn start(&self) -> Result<()>;

    /// Cancel the receive loop and release the connection.
    ///
    /// Returns only after in-flight processing completes or the grace
    /// period expires, in which case the handler is abandoned and its
    /// native acknowledgement left pending. A no-op from `Stopped`.
    async fn stop(&self) -> Result<()>;

    /// Current lifecycle state.
    fn state(&self) -> ConsumerState;

    /// The name of this consumer implementation.
    fn name(&self) -> &str;
}
