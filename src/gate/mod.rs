//! Approval gate — human-in-the-loop suspend/resume checkpoint.

pub mod approval;
pub mod summary;

pub use approval::{ApprovalGate, GateOutcome, GateState};
pub use summary::{SummaryError, render_summary};
