//! Approval gate — hands pending previews to a human and suspends the run.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::gate::summary::{SummaryError, render_summary};
use crate::state::{ApprovalPayload, Decisions, ExecutionState, Interrupt, Preview, StateUpdate};

/// State of the approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    /// Execution is proceeding normally.
    Running,
    /// Suspended until a decision set arrives.
    AwaitingApproval,
    /// Decisions are in; the apply phase is next.
    Resumed,
}

impl GateState {
    /// Derive the gate state from a checkpointed execution state.
    pub fn of(state: &ExecutionState) -> Self {
        if state.is_suspended() {
            Self::AwaitingApproval
        } else {
            Self::Running
        }
    }

    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: GateState) -> bool {
        use GateState::*;

        matches!(
            (self, target),
            (Running, AwaitingApproval) | (Running, Resumed) |
            (AwaitingApproval, Resumed) |
            (Resumed, Running)
        )
    }
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Resumed => "resumed",
        };
        write!(f, "{s}")
    }
}

/// What the gate decided on entry.
#[derive(Debug, Clone)]
pub enum GateOutcome {
    /// Nothing is pending; the gate is a pass-through.
    Skipped,
    /// Every pending preview was approved without asking.
    AutoApproved(StateUpdate),
    /// Suspend and wait for a human decision.
    Suspend {
        payload: ApprovalPayload,
        update: StateUpdate,
    },
}

/// The approval checkpoint between design and apply.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalGate {
    enabled: bool,
}

impl ApprovalGate {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enter the gate with the current state.
    ///
    /// If the payload cannot be built the gate fails open and approves every
    /// pending preview rather than leaving the run stuck.
    pub fn enter(&self, state: &ExecutionState) -> GateOutcome {
        let pending: Vec<Preview> = state.pending_previews().into_iter().cloned().collect();
        if pending.is_empty() {
            return GateOutcome::Skipped;
        }

        if !self.enabled {
            tracing::info!(count = pending.len(), "Approval disabled, auto-approving");
            return GateOutcome::AutoApproved(auto_approve(&pending));
        }

        match build_payload(pending.clone()) {
            Ok(payload) => {
                tracing::info!(
                    count = payload.previews.len(),
                    "{} -> {}",
                    GateState::Running,
                    GateState::AwaitingApproval
                );
                let update = StateUpdate {
                    previews: Some(payload.previews.clone()),
                    ..Default::default()
                }
                .with_approvals(Decisions::new())
                .with_interrupt(Some(Interrupt::PendingApproval {
                    payload: payload.clone(),
                }));
                GateOutcome::Suspend { payload, update }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Approval payload failed, auto-approving");
                GateOutcome::AutoApproved(auto_approve(&pending))
            }
        }
    }

    /// Consume a decision set.
    ///
    /// Clears the interrupt marker and replaces the approvals. Decisions for
    /// actions that were not pending are ignored; pending actions without a
    /// `true` decision are recorded as rejected.
    pub fn resume(&self, state: &ExecutionState, decisions: &Decisions) -> StateUpdate {
        let from = GateState::of(state);
        if !from.can_transition_to(GateState::Resumed) {
            tracing::warn!(state = %from, "Resume outside of a suspension");
        }

        let pending: BTreeSet<String> = match &state.interrupt {
            Some(interrupt) => interrupt.payload().action_ids().map(str::to_string).collect(),
            None => state
                .pending_previews()
                .into_iter()
                .map(|p| p.action_id.clone())
                .collect(),
        };

        let ignored: Vec<&String> = decisions.keys().filter(|id| !pending.contains(*id)).collect();
        if !ignored.is_empty() {
            tracing::warn!(ids = ?ignored, "Ignoring decisions for actions not awaiting approval");
        }

        let approvals: Decisions = decisions
            .iter()
            .filter(|(id, _)| pending.contains(*id))
            .map(|(id, approved)| (id.clone(), *approved))
            .collect();
        let rejected: BTreeSet<String> = pending
            .iter()
            .filter(|id| !approvals.get(*id).copied().unwrap_or(false))
            .cloned()
            .collect();

        tracing::info!(
            approved = approvals.values().filter(|a| **a).count(),
            rejected = rejected.len(),
            "{} -> {}",
            from,
            GateState::Resumed
        );

        StateUpdate::new()
            .with_approvals(approvals)
            .with_rejected(rejected)
            .with_interrupt(None)
    }
}

/// Build the approval payload, rendering a summary for each preview.
fn build_payload(pending: Vec<Preview>) -> Result<ApprovalPayload, SummaryError> {
    let previews = pending
        .into_iter()
        .map(|p| {
            let summary = render_summary(&p)?;
            Ok(p.with_summary(summary))
        })
        .collect::<Result<Vec<_>, SummaryError>>()?;
    Ok(ApprovalPayload::new(previews))
}

fn auto_approve(pending: &[Preview]) -> StateUpdate {
    let approvals: Decisions = pending
        .iter()
        .map(|p| (p.action_id.clone(), true))
        .collect();
    StateUpdate::new()
        .with_approvals(approvals)
        .with_interrupt(None)
}
