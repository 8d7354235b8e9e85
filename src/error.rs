//! Error taxonomy for the consumption and routing layer.
//!
//! Transient per-message failures are recovered locally by the receive
//! loop (see [`RelayError::is_per_message`]); connection and
//! configuration failures surface to the owning process, which decides
//! whether to restart the consumer.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Broker unreachable or connection dropped. Triggers bounded-retry
    /// reconnection; fatal once retries are exhausted.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// `start()` called on a consumer that is not in `Created`.
    #[error("consumer '{0}' is already running or stopped")]
    AlreadyRunning(String),

    /// Native message could not be decoded into an Envelope.
    #[error("malformed native message: {0}")]
    Decode(String),

    /// The agent handler failed while processing a message.
    #[error("agent handler failed")]
    Handler(#[source] anyhow::Error),

    /// Route pattern did not compile as a regular expression.
    #[error("invalid route pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// No route matched and no default agent is configured.
    #[error("no route matched routing key '{0}' and no default agent configured")]
    NoRoute(String),

    /// A route or binding names an agent the registry does not hold.
    #[error("no agent registered under name '{0}'")]
    UnknownAgent(String),

    /// Outbound publish failed; the message must not be assumed delivered.
    #[error("publish to '{destination}' failed: {reason}")]
    Publish { destination: String, reason: String },

    /// Construction-time configuration rejected at `start()`.
    #[error("invalid consumer configuration: {0}")]
    Config(String),
}

impl RelayError {
    /// Whether the receive loop may continue after this error.
    ///
    /// Per-message failures are tied to one delivery: a payload that
    /// would not decode, a handler fault, or a reply publish that did
    /// not go through. The loop rejects or skips that message and keeps
    /// receiving. Everything else (no route for the key, an unknown
    /// agent, connection loss) is a consumer-level fault and stops the
    /// loop.
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            RelayError::Decode(_) | RelayError::Handler(_) | RelayError::Publish { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_route_names_the_key() {
        let err = RelayError::NoRoute("orders.eu".into());
        assert!(err.to_string().contains("orders.eu"));
    }

    #[test]
    fn per_message_classification() {
        assert!(RelayError::Decode("bad utf-8".into()).is_per_message());
        assert!(RelayError::Handler(anyhow::anyhow!("boom")).is_per_message());
        assert!(
            RelayError::Publish {
                destination: "replies".into(),
                reason: "send buffer full".into(),
            }
            .is_per_message()
        );
        assert!(!RelayError::Connection("refused".into()).is_per_message());
        assert!(!RelayError::NoRoute("k".into()).is_per_message());
        assert!(!RelayError::UnknownAgent("ghost".into()).is_per_message());
    }
}
