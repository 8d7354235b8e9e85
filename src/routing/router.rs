//! Router that maps routing-key patterns to agent handlers.
//!
//! One physical channel often multiplexes messages for several logical
//! recipients; the router picks the recipient by matching the envelope's
//! routing key against an ordered rule list.

use crate::agent::{AgentHandler, AgentRegistry};
use crate::envelope::Envelope;
use crate::error::{RelayError, Result};
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

struct Route {
    pattern: Regex,
    raw: String,
    agent_name: String,
    handler: Arc<dyn AgentHandler>,
}

/// Routes envelopes to agents by first-match-wins pattern evaluation.
///
/// Patterns are compiled once at [`PatternRouter::add_route`] time and
/// matched against the whole routing key (full match, not substring).
/// Handler references are resolved from the registry when a route is
/// added, never looked up per message. Routes are immutable during
/// routing: `add_route` takes `&mut self`, `route` takes `&self`.
pub struct PatternRouter {
    registry: AgentRegistry,
    routes: Vec<Route>,
    default_agent: Option<(String, Arc<dyn AgentHandler>)>,
}

impl PatternRouter {
    pub fn new(registry: AgentRegistry) -> Self {
        Self {
            registry,
            routes: Vec::new(),
            default_agent: None,
        }
    }

    /// Configure the agent used when no pattern matches. Without one,
    /// an unmatched routing key is a [`RelayError::NoRoute`] error.
    pub fn with_default_agent(mut self, agent_name: &str) -> Result<Self> {
        let handler = self.registry.get(agent_name)?;
        self.default_agent = Some((agent_name.to_string(), handler));
        Ok(self)
    }

    /// Append a routing rule: routing keys fully matching `pattern` go
    /// to `agent_name`. Rules are evaluated in insertion order.
    pub fn add_route(&mut self, pattern: &str, agent_name: &str) -> Result<()> {
        let anchored = format!("^(?:{pattern})$");
        let compiled = Regex::new(&anchored).map_err(|source| RelayError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        let handler = self.registry.get(agent_name)?;
        debug!(pattern, agent = agent_name, "route added");
        self.routes.push(Route {
            pattern: compiled,
            raw: pattern.to_string(),
            agent_name: agent_name.to_string(),
            handler,
        });
        Ok(())
    }

    /// Name of the agent `routing_key` resolves to, without dispatching.
    pub fn resolve(&self, routing_key: &str) -> Result<&str> {
        for route in &self.routes {
            if route.pattern.is_match(routing_key) {
                return Ok(&route.agent_name);
            }
        }
        match &self.default_agent {
            Some((name, _)) => Ok(name),
            None => Err(RelayError::NoRoute(routing_key.to_string())),
        }
    }

    /// Dispatch `envelope` to the first matching agent and return its
    /// response. An absent routing key matches as the empty string.
    pub async fn route(&self, envelope: &Envelope) -> Result<Option<Envelope>> {
        let routing_key = envelope.routing_key_or_empty();
        let (agent_name, handler) = self.lookup(routing_key)?;
        debug!(routing_key, agent = agent_name, "routing envelope");
        handler
            .handle(envelope)
            .await
            .map_err(RelayError::Handler)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    fn lookup(&self, routing_key: &str) -> Result<(&str, &Arc<dyn AgentHandler>)> {
        for route in &self.routes {
            if route.pattern.is_match(routing_key) {
                return Ok((&route.agent_name, &route.handler));
            }
        }
        match &self.default_agent {
            Some((name, handler)) => Ok((name, handler)),
            None => Err(RelayError::NoRoute(routing_key.to_string())),
        }
    }
}

impl std::fmt::Debug for PatternRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternRouter")
            .field(
                "routes",
                &self
                    .routes
                    .iter()
                    .map(|r| (r.raw.as_str(), r.agent_name.as_str()))
                    .collect::<Vec<_>>(),
            )
            .field(
                "default_agent",
                &self.default_agent.as_ref().map(|(name, _)| name),
            )
            .finish()
    }
}
