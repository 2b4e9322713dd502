//! External collaborators: planner/classifier, response writer, memory.
//!
//! The orchestrator treats all of these as fallible black boxes and degrades
//! instead of aborting when they fail.

use async_trait::async_trait;

use crate::error::CollaboratorError;
use crate::graph::RunSummary;
use crate::state::{Action, ExecutionState, Intent, Message};

/// Classifies intent and proposes actions for a conversation.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Decide what the latest user message wants.
    async fn classify(&self, messages: &[Message]) -> Result<Intent, CollaboratorError>;

    /// Propose actions. Ids are the planner's responsibility.
    async fn plan(
        &self,
        messages: &[Message],
        memory_context: &str,
    ) -> Result<Vec<Action>, CollaboratorError>;
}

/// Writes the final prose response for a run.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(
        &self,
        state: &ExecutionState,
        summary: &RunSummary,
    ) -> Result<String, CollaboratorError>;
}

/// Long-term memory used for planning context and post-run synthesis.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Recall context relevant to the conversation.
    async fn recall(&self, thread_id: &str, messages: &[Message])
    -> Result<String, CollaboratorError>;

    /// Store what happened in a finished run.
    async fn synthesize(
        &self,
        thread_id: &str,
        summary: &RunSummary,
    ) -> Result<(), CollaboratorError>;
}

/// Planner that returns a fixed intent and action list.
#[derive(Debug, Clone, Default)]
pub struct StaticPlanner {
    intent: Intent,
    actions: Vec<Action>,
}

impl StaticPlanner {
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            intent: Intent::Action,
            actions,
        }
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = intent;
        self
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn classify(&self, _messages: &[Message]) -> Result<Intent, CollaboratorError> {
        Ok(self.intent)
    }

    async fn plan(
        &self,
        _messages: &[Message],
        _memory_context: &str,
    ) -> Result<Vec<Action>, CollaboratorError> {
        Ok(self.actions.clone())
    }
}

/// Responder that returns the rendered run summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryResponder;

#[async_trait]
impl Responder for SummaryResponder {
    async fn respond(
        &self,
        _state: &ExecutionState,
        summary: &RunSummary,
    ) -> Result<String, CollaboratorError> {
        Ok(summary.render())
    }
}

/// Memory store that remembers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMemory;

#[async_trait]
impl MemoryStore for NoMemory {
    async fn recall(
        &self,
        _thread_id: &str,
        _messages: &[Message],
    ) -> Result<String, CollaboratorError> {
        Ok(String::new())
    }

    async fn synthesize(
        &self,
        _thread_id: &str,
        _summary: &RunSummary,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
