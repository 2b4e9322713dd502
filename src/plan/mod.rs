//! Planning — plan validation and readiness.

pub mod builder;
pub mod readiness;

pub use builder::{BuildReport, DropReason, DroppedEdge, PlanBuilder, has_cycle};
pub use readiness::{blocked, ready};
