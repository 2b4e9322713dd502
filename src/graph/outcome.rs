//! Run results returned to callers.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::plan::blocked;
use crate::state::{ApprovalPayload, ExecutionState, Phase};

/// One failed action in a run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSummary {
    pub action_id: String,
    pub error: String,
    pub phase: Phase,
    pub retryable: bool,
}

/// What happened to each planned action, in plan order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub done: Vec<String>,
    pub failed: Vec<FailedSummary>,
    pub rejected: Vec<String>,
    /// Can never run because something they depend on failed.
    pub blocked: Vec<String>,
    /// Neither settled nor blocked; typically waiting behind a rejection.
    pub pending: Vec<String>,
}

impl RunSummary {
    pub fn from_state(state: &ExecutionState) -> Self {
        let artifacts = &state.artifacts;
        let blocked_ids: HashSet<&str> =
            blocked(&state.plan, &artifacts.done_ids, &artifacts.failed_actions)
                .into_iter()
                .map(|a| a.id.as_str())
                .collect();

        let mut summary = Self::default();
        for action in &state.plan.actions {
            let id = &action.id;
            if artifacts.is_done(id) {
                summary.done.push(id.clone());
            } else if let Some(failure) = artifacts.failed_actions.get(id) {
                summary.failed.push(FailedSummary {
                    action_id: id.clone(),
                    error: failure.error.clone(),
                    phase: failure.phase,
                    retryable: failure.retryable,
                });
            } else if artifacts.is_rejected(id) {
                summary.rejected.push(id.clone());
            } else if blocked_ids.contains(id.as_str()) {
                summary.blocked.push(id.clone());
            } else {
                summary.pending.push(id.clone());
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.done.len()
            + self.failed.len()
            + self.rejected.len()
            + self.blocked.len()
            + self.pending.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty()
    }

    /// Plain-text rendering used when no responder is available.
    pub fn render(&self) -> String {
        if self.total() == 0 {
            return "No actions were planned.".to_string();
        }

        let mut lines = Vec::new();
        if !self.done.is_empty() {
            lines.push(format!("Completed: {}.", self.done.join(", ")));
        }
        if !self.failed.is_empty() {
            let failed: Vec<String> = self
                .failed
                .iter()
                .map(|f| format!("{} ({} failed: {})", f.action_id, f.phase, f.error))
                .collect();
            lines.push(format!("Failed: {}.", failed.join("; ")));
        }
        if !self.rejected.is_empty() {
            lines.push(format!("Not approved: {}.", self.rejected.join(", ")));
        }
        if !self.blocked.is_empty() {
            lines.push(format!("Blocked by failures: {}.", self.blocked.join(", ")));
        }
        if !self.pending.is_empty() {
            lines.push(format!("Not started: {}.", self.pending.join(", ")));
        }
        lines.join("\n")
    }
}

/// Final result of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub response: String,
    pub summary: RunSummary,
}

/// Status returned by `run` and `resume`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    PendingApproval { payload: ApprovalPayload },
    Complete { result: RunResult },
}

impl RunStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingApproval { .. })
    }

    pub fn payload(&self) -> Option<&ApprovalPayload> {
        match self {
            Self::PendingApproval { payload } => Some(payload),
            Self::Complete { .. } => None,
        }
    }

    pub fn result(&self) -> Option<&RunResult> {
        match self {
            Self::Complete { result } => Some(result),
            Self::PendingApproval { .. } => None,
        }
    }
}
