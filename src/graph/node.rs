//! Node abstraction for the orchestration graph.

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::state::{ApprovalPayload, Decisions, ExecutionState, StateUpdate};

/// Named graph nodes. `End` is terminal and has no implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Classify,
    Plan,
    Design,
    Approval,
    Apply,
    Finalize,
    End,
}

impl NodeId {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Plan => "plan",
            Self::Design => "design",
            Self::Approval => "approval",
            Self::Apply => "apply",
            Self::Finalize => "finalize",
            Self::End => "end",
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "classify" => Ok(Self::Classify),
            "plan" => Ok(Self::Plan),
            "design" => Ok(Self::Design),
            "approval" => Ok(Self::Approval),
            "apply" => Ok(Self::Apply),
            "finalize" => Ok(Self::Finalize),
            "end" => Ok(Self::End),
            other => Err(format!("Unknown node: {other}")),
        }
    }
}

/// What a node produced.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    /// Merge the update and follow the outgoing edge.
    Continue(StateUpdate),
    /// Merge the update, checkpoint, and stop until resumed.
    Suspend {
        payload: ApprovalPayload,
        update: StateUpdate,
    },
    /// Abort the run.
    Failed(String),
}

/// Per-step context handed to a node.
#[derive(Debug, Clone, Copy)]
pub struct NodeContext<'a> {
    pub thread_id: &'a str,
    /// Decisions supplied by a resume call; only set for the first step.
    pub resume: Option<&'a Decisions>,
}

/// A single step of the orchestration graph.
#[async_trait]
pub trait Node: Send + Sync {
    fn id(&self) -> NodeId;

    /// Run against a read-only view of the state.
    async fn run(&self, state: &ExecutionState, ctx: &NodeContext<'_>) -> NodeOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_parses_its_own_name() {
        for id in [
            NodeId::Classify,
            NodeId::Plan,
            NodeId::Design,
            NodeId::Approval,
            NodeId::Apply,
            NodeId::Finalize,
            NodeId::End,
        ] {
            assert_eq!(id.as_str().parse::<NodeId>(), Ok(id));
        }
        assert!("review".parse::<NodeId>().is_err());
    }
}
