//! Construction-time configuration surface for consumers and producers.
//!
//! Loading (files, flags, env) happens outside this layer; these structs
//! are what a loaded configuration deserializes into. Validation runs
//! once inside `start()`, never per message.

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broker authentication credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Bounded exponential backoff for reconnection after a dropped
/// connection. After `max_attempts` consecutive failures the consumer
/// gives up and transitions to `Stopped`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive reconnect attempts before the consumer goes fatal.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    /// Ceiling on the backoff delay.
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Configuration consumed by every consumer adapter at construction.
///
/// `source` is the topic, queue, or channel name depending on backend;
/// `group` is the consumer group for the log broker and unused by the
/// others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Broker endpoint address, e.g. `"broker-1:9092"`.
    pub endpoint: String,
    /// Optional authentication.
    #[serde(default)]
    pub credentials: Option<Credentials>,
    /// Consumer group ID (log broker only).
    #[serde(default)]
    pub group: Option<String>,
    /// Topic, queue, or channel to consume from.
    pub source: String,
    /// Queue broker only: requeue messages whose handler failed.
    #[serde(default = "default_requeue")]
    pub requeue_on_failure: bool,
    /// Reconnection policy for transient connection loss.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// How long `stop()` waits for an in-flight handler before
    /// abandoning it.
    #[serde(default = "default_grace", with = "duration_millis")]
    pub grace_period: Duration,
}

fn default_requeue() -> bool {
    true
}

fn default_grace() -> Duration {
    Duration::from_secs(5)
}

impl ConsumerConfig {
    pub fn new(endpoint: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credentials: None,
            group: None,
            source: source.into(),
            requeue_on_failure: default_requeue(),
            retry: RetryPolicy::default(),
            grace_period: default_grace(),
        }
    }

    /// Checked once at `start()` time.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(RelayError::Config("endpoint cannot be empty".into()));
        }
        if self.source.trim().is_empty() {
            return Err(RelayError::Config(
                "source (topic/queue/channel) cannot be empty".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(RelayError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn validate_rejects_empty_endpoint() {
        let cfg = ConsumerConfig::new("", "orders");
        match cfg.validate() {
            Err(RelayError::Config(msg)) => assert!(msg.contains("endpoint")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_empty_source() {
        let cfg = ConsumerConfig::new("broker-1:9092", "  ");
        tokio_test::assert_err!(cfg.validate());
    }

    #[test]
    fn validate_accepts_defaults() {
        let cfg = ConsumerConfig::new("broker-1:9092", "orders");
        tokio_test::assert_ok!(cfg.validate());
        assert!(cfg.requeue_on_failure);
        assert_eq!(cfg.grace_period, Duration::from_secs(5));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(450),
        };
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(400));
        assert_eq!(retry.delay_for(4), Duration::from_millis(450));
    }

    #[test]
    fn deserializes_from_json() {
        let cfg: ConsumerConfig = serde_json::from_str(
            r#"{"endpoint":"broker-1:9092","source":"orders","group":"workers"}"#,
        )
        .unwrap();
        assert_eq!(cfg.group.as_deref(), Some("workers"));
        assert_eq!(cfg.retry.max_attempts, 5);
    }
}
