//! Action orchestrator — plan, design, approve and apply business actions.

pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod graph;
pub mod handlers;
pub mod plan;
pub mod state;
pub mod store;

pub use config::OrchestratorConfig;
pub use error::{Error, Result};
pub use graph::{Orchestrator, RunStatus};
