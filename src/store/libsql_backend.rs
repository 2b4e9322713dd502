//! libSQL checkpoint store — survives process restarts.
//!
//! Supports local file and in-memory databases. The execution state is
//! stored as a JSON document; the next node and step count are columns.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::CheckpointError;
use crate::graph::NodeId;
use crate::state::ExecutionState;
use crate::store::migrations;
use crate::store::traits::{Checkpoint, CheckpointStore};

/// libSQL checkpoint backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlCheckpointStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlCheckpointStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, CheckpointError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                CheckpointError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| {
                CheckpointError::Connection(format!("Failed to open libSQL database: {e}"))
            })?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Checkpoint database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, CheckpointError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                CheckpointError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, CheckpointError> {
        let conn = db
            .connect()
            .map_err(|e| CheckpointError::Connection(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    async fn thread_ids(&self, sql: &str, op: &str) -> Result<Vec<String>, CheckpointError> {
        let mut rows = self
            .conn
            .query(sql, ())
            .await
            .map_err(|e| CheckpointError::Query(format!("{op}: {e}")))?;

        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| CheckpointError::Query(format!("{op}: {e}")))?
        {
            let id: String = row
                .get(0)
                .map_err(|e| CheckpointError::Query(format!("{op} row parse: {e}")))?;
            ids.push(id);
        }
        Ok(ids)
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn row_to_checkpoint(row: &libsql::Row) -> Result<Checkpoint, CheckpointError> {
    let parse = |e: libsql::Error| CheckpointError::Query(format!("get row parse: {e}"));
    let next_str: String = row.get(0).map_err(parse)?;
    let step: i64 = row.get(1).map_err(parse)?;
    let state_str: String = row.get(2).map_err(parse)?;
    let updated_str: String = row.get(3).map_err(parse)?;

    let next: NodeId = next_str
        .parse()
        .map_err(|e: String| CheckpointError::Serialization(e))?;
    let state: ExecutionState = serde_json::from_str(&state_str)?;

    Ok(Checkpoint {
        state,
        next,
        step: u64::try_from(step).unwrap_or(0),
        updated_at: parse_datetime(&updated_str),
    })
}

#[async_trait]
impl CheckpointStore for LibSqlCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let mut rows = self
            .conn
            .query(
                "SELECT next_node, step, state, updated_at FROM checkpoints WHERE thread_id = ?1",
                params![thread_id],
            )
            .await
            .map_err(|e| CheckpointError::Query(format!("get: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_checkpoint(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(CheckpointError::Query(format!("get: {e}"))),
        }
    }

    async fn put(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let state = serde_json::to_string(&checkpoint.state)?;
        let step = i64::try_from(checkpoint.step).unwrap_or(i64::MAX);
        let suspended = i64::from(checkpoint.is_suspended());

        self.conn
            .execute(
                "INSERT INTO checkpoints (thread_id, next_node, step, state, suspended, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(thread_id) DO UPDATE SET
                    next_node = excluded.next_node,
                    step = excluded.step,
                    state = excluded.state,
                    suspended = excluded.suspended,
                    updated_at = excluded.updated_at",
                params![
                    thread_id,
                    checkpoint.next.as_str(),
                    step,
                    state,
                    suspended,
                    checkpoint.updated_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| CheckpointError::Query(format!("put: {e}")))?;

        debug!(thread_id, next = %checkpoint.next, step = checkpoint.step, "Checkpoint saved");
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, CheckpointError> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM checkpoints WHERE thread_id = ?1",
                params![thread_id],
            )
            .await
            .map_err(|e| CheckpointError::Query(format!("delete: {e}")))?;
        Ok(affected > 0)
    }

    async fn list_threads(&self) -> Result<Vec<String>, CheckpointError> {
        self.thread_ids(
            "SELECT thread_id FROM checkpoints ORDER BY thread_id",
            "list_threads",
        )
        .await
    }

    async fn list_suspended(&self) -> Result<Vec<String>, CheckpointError> {
        self.thread_ids(
            "SELECT thread_id FROM checkpoints WHERE suspended = 1 ORDER BY thread_id",
            "list_suspended",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Action, ActionType, ApprovalPayload, Interrupt, Plan, Preview};
    use serde_json::json;

    fn suspended_state() -> ExecutionState {
        let mut state = ExecutionState {
            plan: Plan {
                actions: vec![Action::new("a1", ActionType::CreateTask)],
            },
            ..Default::default()
        };
        let preview = Preview::new("a1", ActionType::CreateTask, json!({"title": "Call Bob"}))
            .with_summary("Create task \"Call Bob\"");
        state.previews.insert("a1".into(), preview.clone());
        state.interrupt = Some(Interrupt::PendingApproval {
            payload: ApprovalPayload::new(vec![preview]),
        });
        state
    }

    #[tokio::test]
    async fn put_and_get_round_trip() {
        let store = LibSqlCheckpointStore::new_memory().await.unwrap();
        assert!(store.get("t1").await.unwrap().is_none());

        let mut checkpoint = Checkpoint::new(suspended_state(), NodeId::Approval);
        checkpoint.step = 4;
        store.put("t1", &checkpoint).await.unwrap();

        let loaded = store.get("t1").await.unwrap().unwrap();
        assert_eq!(loaded.state, checkpoint.state);
        assert_eq!(loaded.next, NodeId::Approval);
        assert_eq!(loaded.step, 4);
        assert_eq!(loaded.updated_at.timestamp(), checkpoint.updated_at.timestamp());
    }

    #[tokio::test]
    async fn put_replaces_and_tracks_suspension() {
        let store = LibSqlCheckpointStore::new_memory().await.unwrap();
        store
            .put("t1", &Checkpoint::new(suspended_state(), NodeId::Approval))
            .await
            .unwrap();
        store
            .put("t2", &Checkpoint::new(ExecutionState::default(), NodeId::End))
            .await
            .unwrap();
        assert_eq!(store.list_suspended().await.unwrap(), vec!["t1"]);

        let mut resumed = suspended_state();
        resumed.interrupt = None;
        store
            .put("t1", &Checkpoint::new(resumed, NodeId::Apply))
            .await
            .unwrap();
        assert!(store.list_suspended().await.unwrap().is_empty());
        assert_eq!(store.list_threads().await.unwrap(), vec!["t1", "t2"]);
        assert_eq!(store.get("t1").await.unwrap().unwrap().next, NodeId::Apply);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = LibSqlCheckpointStore::new_memory().await.unwrap();
        store
            .put("t1", &Checkpoint::new(ExecutionState::default(), NodeId::Classify))
            .await
            .unwrap();
        assert!(store.delete("t1").await.unwrap());
        assert!(!store.delete("t1").await.unwrap());
        assert!(store.get("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn checkpoint_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("checkpoints.db");
        let state = suspended_state();

        {
            let store = LibSqlCheckpointStore::new_local(&path).await.unwrap();
            store
                .put("t1", &Checkpoint::new(state.clone(), NodeId::Approval))
                .await
                .unwrap();
        }

        let reopened = LibSqlCheckpointStore::new_local(&path).await.unwrap();
        let loaded = reopened.get("t1").await.unwrap().unwrap();
        assert!(loaded.is_suspended());
        assert_eq!(loaded.state, state);
    }
}
