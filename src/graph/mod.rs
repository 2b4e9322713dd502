//! Orchestration graph — nodes, routing, run results and the runner.
//!
//! - `node` — node trait, ids and outcomes
//! - `nodes` — classify, plan, design, approval, apply, finalize
//! - `topology` — graph structure and conditional routing
//! - `outcome` — `RunStatus` and `RunSummary`
//! - `runner` — `Orchestrator`, the checkpointing driver

pub mod node;
pub mod nodes;
pub mod outcome;
pub mod runner;
pub mod topology;

pub use node::{Node, NodeContext, NodeId, NodeOutcome};
pub use outcome::{FailedSummary, RunResult, RunStatus, RunSummary};
pub use runner::Orchestrator;
pub use topology::{Edge, Graph};
