//! Error types for the action orchestrator.

use std::time::Duration;

use crate::state::ActionType;

/// Top-level error type for the orchestrator.
///
/// Only infrastructure failures surface here. Action-level failures are
/// recorded in the execution state instead, and suspensions are values.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("No handler registered for action types: {types:?}")]
    UnregisteredTypes { types: Vec<ActionType> },
}

/// Checkpoint store errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Errors raised by a designer/applier handler.
///
/// These never abort a run: the dispatcher converts them into
/// `failed_actions` entries.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("No handler registered for action type {action_type}")]
    NotRegistered { action_type: ActionType },

    #[error("Handler for {action_id} failed: {reason}")]
    Failed { action_id: String, reason: String },

    #[error("Handler for {action_id} timed out after {timeout:?}")]
    Timeout { action_id: String, timeout: Duration },

    #[error("Handler for {action_id} panicked: {reason}")]
    Panicked { action_id: String, reason: String },

    #[error("No preview available for {action_id}")]
    MissingPreview { action_id: String },

    #[error("Invalid parameters for {action_id}: {reason}")]
    InvalidParams { action_id: String, reason: String },
}

/// Graph construction and run-level errors.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("No node registered for {node}")]
    MissingNode { node: String },

    #[error("Node {node} failed: {reason}")]
    NodeFailed { node: String, reason: String },

    #[error("Run for thread {thread_id} exceeded {max} steps")]
    StepLimit { thread_id: String, max: usize },

    #[error("Thread {thread_id} not found")]
    ThreadNotFound { thread_id: String },

    #[error("Thread {thread_id} is not awaiting approval")]
    NotSuspended { thread_id: String },

    #[error("Thread {thread_id} is awaiting approval; resume it instead")]
    AlreadySuspended { thread_id: String },
}

/// Failures reported by external collaborators (planner, responder, memory).
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Classification failed: {0}")]
    Classify(String),

    #[error("Planning failed: {0}")]
    Plan(String),

    #[error("Response generation failed: {0}")]
    Respond(String),

    #[error("Memory store failed: {0}")]
    Memory(String),
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
