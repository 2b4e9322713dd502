//! Graph topology: nodes, edges and the routing functions between them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatch::Dispatcher;
use crate::error::GraphError;
use crate::graph::node::{Node, NodeId};
use crate::state::ExecutionState;

/// Outgoing edge of a node.
#[derive(Clone, Copy)]
pub enum Edge {
    To(NodeId),
    Conditional(fn(&ExecutionState) -> NodeId),
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::To(id) => write!(f, "To({id})"),
            Self::Conditional(_) => f.write_str("Conditional"),
        }
    }
}

/// A directed graph of nodes with one entry point.
pub struct Graph {
    entry: NodeId,
    nodes: HashMap<NodeId, Arc<dyn Node>>,
    edges: HashMap<NodeId, Edge>,
}

impl Graph {
    pub fn new(entry: NodeId) -> Self {
        Self {
            entry,
            nodes: HashMap::new(),
            edges: HashMap::new(),
        }
    }

    /// Add a node with its outgoing edge.
    pub fn with_node(mut self, node: Arc<dyn Node>, edge: Edge) -> Self {
        let id = node.id();
        if self.nodes.insert(id, node).is_some() {
            tracing::warn!(node = %id, "Replacing graph node");
        }
        self.edges.insert(id, edge);
        self
    }

    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Check that the entry and every static edge target exist.
    pub fn validate(&self) -> Result<(), GraphError> {
        self.require(self.entry)?;
        for edge in self.edges.values() {
            if let Edge::To(target) = edge {
                self.require(*target)?;
            }
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Result<&Arc<dyn Node>, GraphError> {
        self.nodes.get(&id).ok_or_else(|| GraphError::MissingNode {
            node: id.to_string(),
        })
    }

    /// Follow the outgoing edge of `from` given the merged state.
    pub fn next(&self, from: NodeId, state: &ExecutionState) -> Result<NodeId, GraphError> {
        let edge = self.edges.get(&from).ok_or_else(|| GraphError::MissingNode {
            node: from.to_string(),
        })?;
        let target = match edge {
            Edge::To(target) => *target,
            Edge::Conditional(route) => route(state),
        };
        self.require(target)?;
        Ok(target)
    }

    fn require(&self, id: NodeId) -> Result<(), GraphError> {
        if id == NodeId::End || self.nodes.contains_key(&id) {
            Ok(())
        } else {
            Err(GraphError::MissingNode {
                node: id.to_string(),
            })
        }
    }
}

/// Questions skip planning entirely.
pub fn after_classify(state: &ExecutionState) -> NodeId {
    match state.intent {
        Some(intent) if !intent.needs_plan() => NodeId::Finalize,
        _ => NodeId::Plan,
    }
}

/// Anything awaiting a decision goes to the gate.
pub fn after_design(state: &ExecutionState) -> NodeId {
    if state.pending_previews().is_empty() {
        NodeId::Finalize
    } else {
        NodeId::Approval
    }
}

/// Nothing approved means the run is cancelled.
pub fn after_approval(state: &ExecutionState) -> NodeId {
    if Dispatcher::apply_eligible(state).is_empty() {
        NodeId::Finalize
    } else {
        NodeId::Apply
    }
}

/// Loop back to design while dependents have become ready.
pub fn after_apply(state: &ExecutionState) -> NodeId {
    if state.all_done() {
        NodeId::Finalize
    } else if !Dispatcher::design_eligible(state).is_empty() {
        NodeId::Design
    } else {
        NodeId::Finalize
    }
}
