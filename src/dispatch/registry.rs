//! Handler registry keyed by action type.

use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatch::handler::ActionHandler;
use crate::error::ConfigError;
use crate::state::ActionType;

/// Registry of designer/applier handlers.
///
/// Built once at startup and then shared read-only.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ActionType, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its action type, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        let action_type = handler.action_type();
        if self.handlers.insert(action_type, handler).is_some() {
            tracing::warn!(%action_type, "Replaced existing handler");
        } else {
            tracing::debug!(%action_type, "Registered handler");
        }
    }

    /// Builder-style registration.
    pub fn with(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Get the handler for an action type.
    pub fn get(&self, action_type: ActionType) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&action_type).cloned()
    }

    /// Check if a handler exists.
    pub fn has(&self, action_type: ActionType) -> bool {
        self.handlers.contains_key(&action_type)
    }

    /// Registered action types, sorted.
    pub fn types(&self) -> Vec<ActionType> {
        let mut types: Vec<_> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }

    /// Get the number of registered handlers.
    pub fn count(&self) -> usize {
        self.handlers.len()
    }

    /// Ensure every given type has a handler.
    pub fn validate<I>(&self, required: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = ActionType>,
    {
        let mut missing: Vec<ActionType> =
            required.into_iter().filter(|t| !self.has(*t)).collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        missing.dedup();
        Err(ConfigError::UnregisteredTypes { types: missing })
    }

    /// Ensure every type the planner can emit has a handler.
    pub fn validate_all(&self) -> Result<(), ConfigError> {
        self.validate(ActionType::ALL)
    }
}
