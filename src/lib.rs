#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use,
    clippy::uninlined_format_args
)]

//! relayq: a broker-agnostic consumption and routing layer for agents.
//!
//! One application handler (an "agent") can receive and answer messages
//! arriving from a partitioned log, an AMQP-style queue broker, or a
//! pub/sub store through a single contract: every native message is
//! decoded into an [`Envelope`], dispatched through an [`AgentBinding`]
//! (a fixed handler or a pattern [`PatternRouter`]), and acknowledged
//! back to the broker in whatever way that broker understands.
//!
//! The wire-protocol clients themselves are external: each adapter is
//! generic over a native-client trait in [`brokers::traits`] that a
//! provided broker library implements.

pub mod agent;
pub mod brokers;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod routing;

pub use agent::{AgentHandler, AgentRegistry};
pub use brokers::BrokerProducer;
pub use config::{ConsumerConfig, RetryPolicy};
pub use consumer::{AgentBinding, BrokerConsumer, ConsumerState};
pub use envelope::{DeliveryToken, Envelope};
pub use error::{RelayError, Result};
pub use routing::PatternRouter;
