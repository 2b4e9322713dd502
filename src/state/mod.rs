//! Execution state — the canonical, checkpointed record for one thread.
//!
//! - `model` — actions, plans, previews, artifacts, approvals, interrupts
//! - `merge` — partial updates and per-field merge rules

pub mod merge;
pub mod model;

pub use merge::{
    StateUpdate, merge_done_ids, merge_failed, merge_previews, merge_rejected_ids,
    merge_user_context,
};
pub use model::{
    Action, ActionType, ApprovalPayload, Decisions, ExecutionArtifacts, ExecutionState,
    FailedAction, Intent, Interrupt, Message, Phase, Plan, Preview, Role,
};
