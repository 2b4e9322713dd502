//! In-memory checkpoint store for tests and embedding.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CheckpointError;
use crate::store::traits::{Checkpoint, CheckpointStore};

/// Checkpoints held in a map; lost when the process exits.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored checkpoints.
    pub async fn count(&self) -> usize {
        self.checkpoints.read().await.len()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.checkpoints.read().await.get(thread_id).cloned())
    }

    async fn put(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.checkpoints
            .write()
            .await
            .insert(thread_id.to_string(), checkpoint.clone());
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, CheckpointError> {
        Ok(self.checkpoints.write().await.remove(thread_id).is_some())
    }

    async fn list_threads(&self) -> Result<Vec<String>, CheckpointError> {
        let mut ids: Vec<String> = self.checkpoints.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_suspended(&self) -> Result<Vec<String>, CheckpointError> {
        let mut ids: Vec<String> = self
            .checkpoints
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.is_suspended())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
