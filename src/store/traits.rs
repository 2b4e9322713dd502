//! `CheckpointStore` trait — durable per-thread execution state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::graph::NodeId;
use crate::state::ExecutionState;

/// A persisted snapshot of one thread's run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub state: ExecutionState,
    /// Node to run next. While suspended this is the approval node; once the
    /// run has finished it is `NodeId::End`.
    pub next: NodeId,
    /// Node steps taken on this thread so far.
    pub step: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(state: ExecutionState, next: NodeId) -> Self {
        Self {
            state,
            next,
            step: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.state.is_suspended()
    }

    pub fn is_finished(&self) -> bool {
        self.next == NodeId::End
    }
}

/// Backend-agnostic checkpoint storage. Must retain checkpoints across
/// process restarts for durable suspension.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for a thread.
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Insert or replace the checkpoint for a thread.
    async fn put(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Remove a thread's checkpoint. Returns whether one existed.
    async fn delete(&self, thread_id: &str) -> Result<bool, CheckpointError>;

    /// All thread ids with a checkpoint, sorted.
    async fn list_threads(&self) -> Result<Vec<String>, CheckpointError>;

    /// Thread ids currently waiting on an approval decision, sorted.
    async fn list_suspended(&self) -> Result<Vec<String>, CheckpointError>;
}
