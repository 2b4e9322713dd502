//! The orchestration nodes: classify, plan, design, approval, apply, finalize.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::collaborators::{MemoryStore, Planner, Responder};
use crate::dispatch::Dispatcher;
use crate::gate::{ApprovalGate, GateOutcome};
use crate::graph::node::{Node, NodeContext, NodeId, NodeOutcome};
use crate::graph::outcome::RunSummary;
use crate::plan::PlanBuilder;
use crate::state::{ExecutionState, Intent, Message, Plan, StateUpdate};

/// Classifies the latest user message. Failure falls back to `Intent::Action`.
pub struct ClassifyNode {
    planner: Arc<dyn Planner>,
}

impl ClassifyNode {
    pub fn new(planner: Arc<dyn Planner>) -> Self {
        Self { planner }
    }
}

#[async_trait]
impl Node for ClassifyNode {
    fn id(&self) -> NodeId {
        NodeId::Classify
    }

    async fn run(&self, state: &ExecutionState, ctx: &NodeContext<'_>) -> NodeOutcome {
        let intent = match self.planner.classify(&state.messages).await {
            Ok(intent) => intent,
            Err(e) => {
                warn!(thread_id = ctx.thread_id, error = %e, "Classification failed, assuming action intent");
                Intent::default()
            }
        };
        info!(thread_id = ctx.thread_id, ?intent, "Classified");

        let mut update = StateUpdate::new().with_intent(intent);
        if !intent.needs_plan() {
            // Nothing to execute this turn; drop the previous turn's plan.
            update = update.with_plan(Plan::default()).with_progress_reset();
        }
        NodeOutcome::Continue(update)
    }
}

/// Asks the planner for actions and validates them into a plan.
pub struct PlanNode {
    planner: Arc<dyn Planner>,
    memory: Arc<dyn MemoryStore>,
}

impl PlanNode {
    pub fn new(planner: Arc<dyn Planner>, memory: Arc<dyn MemoryStore>) -> Self {
        Self { planner, memory }
    }
}

#[async_trait]
impl Node for PlanNode {
    fn id(&self) -> NodeId {
        NodeId::Plan
    }

    async fn run(&self, state: &ExecutionState, ctx: &NodeContext<'_>) -> NodeOutcome {
        let context = match self.memory.recall(ctx.thread_id, &state.messages).await {
            Ok(context) => context,
            Err(e) => {
                warn!(thread_id = ctx.thread_id, error = %e, "Memory recall failed");
                String::new()
            }
        };

        let proposed = match self.planner.plan(&state.messages, &context).await {
            Ok(actions) => actions,
            Err(e) => {
                warn!(thread_id = ctx.thread_id, error = %e, "Planning failed, continuing with an empty plan");
                Vec::new()
            }
        };

        let (update, report) = PlanBuilder::build_update(proposed);
        info!(
            thread_id = ctx.thread_id,
            actions = update.plan.as_ref().map_or(0, Plan::len),
            dropped_edges = report.dropped_edges.len(),
            "Plan built"
        );
        NodeOutcome::Continue(update)
    }
}

/// Fans ready actions out to their designers.
pub struct DesignNode {
    dispatcher: Arc<Dispatcher>,
}

impl DesignNode {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Node for DesignNode {
    fn id(&self) -> NodeId {
        NodeId::Design
    }

    async fn run(&self, state: &ExecutionState, _ctx: &NodeContext<'_>) -> NodeOutcome {
        NodeOutcome::Continue(self.dispatcher.design_phase(state).await.update)
    }
}

/// Suspends for human approval, or consumes the decisions on resume.
pub struct ApprovalNode {
    gate: ApprovalGate,
}

impl ApprovalNode {
    pub fn new(gate: ApprovalGate) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Node for ApprovalNode {
    fn id(&self) -> NodeId {
        NodeId::Approval
    }

    async fn run(&self, state: &ExecutionState, ctx: &NodeContext<'_>) -> NodeOutcome {
        if let Some(decisions) = ctx.resume {
            return NodeOutcome::Continue(self.gate.resume(state, decisions));
        }
        match self.gate.enter(state) {
            GateOutcome::Skipped => NodeOutcome::Continue(StateUpdate::new()),
            GateOutcome::AutoApproved(update) => NodeOutcome::Continue(update),
            GateOutcome::Suspend { payload, update } => {
                info!(
                    thread_id = ctx.thread_id,
                    previews = payload.previews.len(),
                    "Awaiting approval"
                );
                NodeOutcome::Suspend { payload, update }
            }
        }
    }
}

/// Fans approved actions out to their appliers.
pub struct ApplyNode {
    dispatcher: Arc<Dispatcher>,
}

impl ApplyNode {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Node for ApplyNode {
    fn id(&self) -> NodeId {
        NodeId::Apply
    }

    async fn run(&self, state: &ExecutionState, _ctx: &NodeContext<'_>) -> NodeOutcome {
        if state.is_suspended() {
            return NodeOutcome::Failed("apply reached while approval is still pending".into());
        }
        NodeOutcome::Continue(self.dispatcher.apply_phase(state).await.update)
    }
}

/// Writes the response and hands the run to memory.
pub struct FinalizeNode {
    responder: Arc<dyn Responder>,
    memory: Arc<dyn MemoryStore>,
}

impl FinalizeNode {
    pub fn new(responder: Arc<dyn Responder>, memory: Arc<dyn MemoryStore>) -> Self {
        Self { responder, memory }
    }
}

#[async_trait]
impl Node for FinalizeNode {
    fn id(&self) -> NodeId {
        NodeId::Finalize
    }

    async fn run(&self, state: &ExecutionState, ctx: &NodeContext<'_>) -> NodeOutcome {
        let summary = RunSummary::from_state(state);
        let response = match self.responder.respond(state, &summary).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => summary.render(),
            Err(e) => {
                warn!(thread_id = ctx.thread_id, error = %e, "Responder failed, using run summary");
                summary.render()
            }
        };

        if let Err(e) = self.memory.synthesize(ctx.thread_id, &summary).await {
            warn!(thread_id = ctx.thread_id, error = %e, "Memory synthesis failed");
        }

        info!(
            thread_id = ctx.thread_id,
            done = summary.done.len(),
            failed = summary.failed.len(),
            rejected = summary.rejected.len(),
            "Run finalized"
        );
        NodeOutcome::Continue(
            StateUpdate::new()
                .with_message(Message::assistant(response.clone()))
                .with_response(response),
        )
    }
}
