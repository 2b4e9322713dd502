//! Orchestrator — drives the graph for one thread and checkpoints each step.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::collaborators::{MemoryStore, NoMemory, Planner, Responder, SummaryResponder};
use crate::config::OrchestratorConfig;
use crate::dispatch::{Dispatcher, HandlerRegistry};
use crate::error::{GraphError, Result};
use crate::gate::ApprovalGate;
use crate::graph::node::{NodeContext, NodeId, NodeOutcome};
use crate::graph::nodes::{
    ApplyNode, ApprovalNode, ClassifyNode, DesignNode, FinalizeNode, PlanNode,
};
use crate::graph::outcome::{RunResult, RunStatus, RunSummary};
use crate::graph::topology::{
    Edge, Graph, after_apply, after_approval, after_classify, after_design,
};
use crate::state::{Decisions, ExecutionState, Message, StateUpdate};
use crate::store::{Checkpoint, CheckpointStore};

/// Graph steps granted per planned action: design, approval, apply.
const STEPS_PER_ACTION: usize = 3;

/// Runs and resumes threads.
///
/// The graph is built on first use and cached until `reset()`. Calls on the
/// same thread are serialized.
pub struct Orchestrator {
    config: RwLock<OrchestratorConfig>,
    registry: Arc<HandlerRegistry>,
    store: Arc<dyn CheckpointStore>,
    planner: Arc<dyn Planner>,
    responder: Arc<dyn Responder>,
    memory: Arc<dyn MemoryStore>,
    graph: RwLock<Option<Arc<Graph>>>,
    thread_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<HandlerRegistry>,
        planner: Arc<dyn Planner>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            registry,
            store,
            planner,
            responder: Arc::new(SummaryResponder),
            memory: Arc::new(NoMemory),
            graph: RwLock::new(None),
            thread_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = responder;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    /// Drop the cached graph; the next call rebuilds it.
    pub async fn reset(&self) {
        *self.graph.write().await = None;
        debug!("Graph reset");
    }

    /// Swap the configuration and rebuild the graph on next use.
    pub async fn reconfigure(&self, config: OrchestratorConfig) {
        *self.config.write().await = config;
        self.reset().await;
    }

    pub async fn config(&self) -> OrchestratorConfig {
        self.config.read().await.clone()
    }

    /// Start a new turn on a thread.
    ///
    /// A thread that is awaiting approval must be resumed instead. A finished
    /// thread keeps its transcript and starts over from classification.
    pub async fn run(&self, thread_id: &str, message: impl Into<String>) -> Result<RunStatus> {
        let graph = self.graph().await?;
        let _guard = self.lock_thread(thread_id).await;

        let mut checkpoint = match self.store.get(thread_id).await? {
            Some(checkpoint) if checkpoint.is_suspended() => {
                return Err(GraphError::AlreadySuspended {
                    thread_id: thread_id.to_string(),
                }
                .into());
            }
            Some(mut checkpoint) => {
                if !checkpoint.is_finished() {
                    warn!(
                        thread_id,
                        next = %checkpoint.next,
                        "Previous run did not finish, starting a new turn"
                    );
                }
                checkpoint.next = graph.entry();
                checkpoint
            }
            None => Checkpoint::new(ExecutionState::default(), graph.entry()),
        };

        checkpoint
            .state
            .apply(StateUpdate::new().with_message(Message::user(message)));
        info!(thread_id, "Run started");
        self.drive(&graph, thread_id, checkpoint, None).await
    }

    /// Resume a suspended thread with the human's decisions.
    pub async fn resume(&self, thread_id: &str, decisions: Decisions) -> Result<RunStatus> {
        let graph = self.graph().await?;
        let _guard = self.lock_thread(thread_id).await;

        let checkpoint =
            self.store
                .get(thread_id)
                .await?
                .ok_or_else(|| GraphError::ThreadNotFound {
                    thread_id: thread_id.to_string(),
                })?;
        if !checkpoint.is_suspended() {
            return Err(GraphError::NotSuspended {
                thread_id: thread_id.to_string(),
            }
            .into());
        }

        info!(thread_id, decisions = decisions.len(), "Resuming");
        self.drive(&graph, thread_id, checkpoint, Some(decisions))
            .await
    }

    /// The checkpointed state of a thread.
    pub async fn state(&self, thread_id: &str) -> Result<Option<ExecutionState>> {
        Ok(self.store.get(thread_id).await?.map(|c| c.state))
    }

    /// Threads currently awaiting approval.
    pub async fn pending_threads(&self) -> Result<Vec<String>> {
        Ok(self.store.list_suspended().await?)
    }

    /// Exclusive access to one thread until the guard drops.
    async fn lock_thread(&self, thread_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.thread_locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    async fn graph(&self) -> Result<Arc<Graph>> {
        if let Some(graph) = self.graph.read().await.as_ref() {
            return Ok(graph.clone());
        }

        let mut slot = self.graph.write().await;
        if let Some(graph) = slot.as_ref() {
            return Ok(graph.clone());
        }
        let config = self.config.read().await.clone();
        let graph = Arc::new(self.build_graph(&config)?);
        *slot = Some(graph.clone());
        Ok(graph)
    }

    fn build_graph(&self, config: &OrchestratorConfig) -> Result<Graph> {
        if let Err(e) = self.registry.validate_all() {
            warn!(error = %e, "Handler registry is incomplete");
        }

        let dispatcher = Arc::new(Dispatcher::new(self.registry.clone(), config));
        let graph = Graph::new(NodeId::Classify)
            .with_node(
                Arc::new(ClassifyNode::new(self.planner.clone())),
                Edge::Conditional(after_classify),
            )
            .with_node(
                Arc::new(PlanNode::new(self.planner.clone(), self.memory.clone())),
                Edge::To(NodeId::Design),
            )
            .with_node(
                Arc::new(DesignNode::new(dispatcher.clone())),
                Edge::Conditional(after_design),
            )
            .with_node(
                Arc::new(ApprovalNode::new(ApprovalGate::new(config.approval_enabled))),
                Edge::Conditional(after_approval),
            )
            .with_node(
                Arc::new(ApplyNode::new(dispatcher)),
                Edge::Conditional(after_apply),
            )
            .with_node(
                Arc::new(FinalizeNode::new(
                    self.responder.clone(),
                    self.memory.clone(),
                )),
                Edge::To(NodeId::End),
            );
        graph.validate()?;

        debug!(
            approval = config.approval_enabled,
            max_concurrency = config.max_concurrency,
            "Graph built"
        );
        Ok(graph)
    }

    /// Step the graph until it ends or suspends, checkpointing after every node.
    ///
    /// The step budget is `max_steps` plus three per planned action, so
    /// dependency chains of any depth can reach finalize.
    async fn drive(
        &self,
        graph: &Graph,
        thread_id: &str,
        mut checkpoint: Checkpoint,
        resume: Option<Decisions>,
    ) -> Result<RunStatus> {
        let max_steps = self.config.read().await.max_steps;
        let mut resume = resume;
        let mut taken = 0usize;

        while checkpoint.next != NodeId::End {
            let limit = max_steps + STEPS_PER_ACTION * checkpoint.state.plan.actions.len();
            if taken >= limit {
                error!(thread_id, limit, "Step limit reached");
                return Err(GraphError::StepLimit {
                    thread_id: thread_id.to_string(),
                    max: limit,
                }
                .into());
            }

            let current = checkpoint.next;
            let node = graph.node(current)?;
            let decisions = resume.take();
            let ctx = NodeContext {
                thread_id,
                resume: decisions.as_ref(),
            };

            debug!(thread_id, node = %current, step = checkpoint.step, "Entering node");
            let outcome = node.run(&checkpoint.state, &ctx).await;
            taken += 1;
            checkpoint.step += 1;

            match outcome {
                NodeOutcome::Continue(update) => {
                    checkpoint.state.apply(update);
                    checkpoint.next = graph.next(current, &checkpoint.state)?;
                    checkpoint.updated_at = Utc::now();
                    self.store.put(thread_id, &checkpoint).await?;
                }
                NodeOutcome::Suspend { payload, update } => {
                    checkpoint.state.apply(update);
                    checkpoint.next = current;
                    checkpoint.updated_at = Utc::now();
                    self.store.put(thread_id, &checkpoint).await?;
                    info!(thread_id, node = %current, "Run suspended");
                    return Ok(RunStatus::PendingApproval { payload });
                }
                NodeOutcome::Failed(reason) => {
                    error!(thread_id, node = %current, %reason, "Node failed");
                    return Err(GraphError::NodeFailed {
                        node: current.to_string(),
                        reason,
                    }
                    .into());
                }
            }
        }

        let state = &checkpoint.state;
        let summary = RunSummary::from_state(state);
        let response = state.response.clone().unwrap_or_else(|| summary.render());
        info!(thread_id, steps = taken, "Run complete");
        Ok(RunStatus::Complete {
            result: RunResult { response, summary },
        })
    }
}
