//! Explicit agent registry passed at construction.
//!
//! Routes refer to agents by name; the registry resolves those names to
//! handler instances. It is an owned object handed to the router when it
//! is built, not process-global state, so two routers can hold disjoint
//! agent sets.

use crate::agent::traits::AgentHandler;
use crate::error::{RelayError, Result};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct AgentRegistry {
    handlers: HashMap<String, Arc<dyn AgentHandler>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`, replacing any previous holder.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn AgentHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Resolve `name` to its handler.
    pub fn get(&self, name: &str) -> Result<Arc<dyn AgentHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::UnknownAgent(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
