//! End-to-end runs through the public orchestrator API.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use action_orchestrator::collaborators::{MemoryStore, Planner, StaticPlanner};
use action_orchestrator::dispatch::{ActionHandler, ApplyOutcome, HandlerRegistry};
use action_orchestrator::error::{CollaboratorError, Error, GraphError, HandlerError};
use action_orchestrator::graph::RunSummary;
use action_orchestrator::handlers::dry_run_registry;
use action_orchestrator::state::{Action, ActionType, Decisions, Intent, Message, Phase, Preview};
use action_orchestrator::store::{CheckpointStore, LibSqlCheckpointStore, MemoryCheckpointStore};
use action_orchestrator::{Orchestrator, OrchestratorConfig, RunStatus};

/// Counts design/apply calls per action id; fails apply for configured ids.
#[derive(Default)]
struct RecordingHandler {
    designs: Mutex<HashMap<String, usize>>,
    applies: Mutex<HashMap<String, usize>>,
    fail_apply: BTreeSet<String>,
}

impl RecordingHandler {
    fn failing(ids: &[&str]) -> Self {
        Self {
            fail_apply: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn designs(&self, id: &str) -> usize {
        self.designs.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    fn applies(&self, id: &str) -> usize {
        self.applies.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ActionHandler for RecordingHandler {
    fn action_type(&self) -> ActionType {
        ActionType::CreateWorkflow
    }

    async fn design(&self, action: &Action) -> Result<Preview, HandlerError> {
        *self.designs.lock().unwrap().entry(action.id.clone()).or_default() += 1;
        Ok(Preview::new(
            action.id.clone(),
            ActionType::CreateWorkflow,
            json!({"name": action.id, "steps": [1, 2]}),
        ))
    }

    async fn apply(
        &self,
        action: &Action,
        _preview: &Preview,
    ) -> Result<ApplyOutcome, HandlerError> {
        *self.applies.lock().unwrap().entry(action.id.clone()).or_default() += 1;
        if self.fail_apply.contains(&action.id) {
            Ok(ApplyOutcome::failed("upstream rejected the workflow"))
        } else {
            Ok(ApplyOutcome::Done)
        }
    }
}

fn workflow(id: &str) -> Action {
    Action::new(id, ActionType::CreateWorkflow)
}

fn harness(
    approval: bool,
    actions: Vec<Action>,
    handler: Arc<RecordingHandler>,
) -> (Orchestrator, Arc<MemoryCheckpointStore>) {
    let store = Arc::new(MemoryCheckpointStore::new());
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default().with_approval(approval),
        Arc::new(HandlerRegistry::new().with(handler)),
        Arc::new(StaticPlanner::new(actions)),
        store.clone(),
    );
    (orchestrator, store)
}

fn decisions(pairs: &[(&str, bool)]) -> Decisions {
    pairs.iter().map(|(id, v)| (id.to_string(), *v)).collect()
}

fn complete(status: RunStatus) -> RunSummary {
    match status {
        RunStatus::Complete { result } => result.summary,
        other => panic!("expected Complete, got {other:?}"),
    }
}

#[tokio::test]
async fn single_action_without_approval_completes() {
    let handler = Arc::new(RecordingHandler::default());
    let (orch, _) = harness(false, vec![workflow("a1")], handler.clone());

    let summary = complete(orch.run("t1", "build it").await.unwrap());
    assert_eq!(summary.done, vec!["a1"]);

    let state = orch.state("t1").await.unwrap().unwrap();
    assert_eq!(state.artifacts.done_ids, BTreeSet::from(["a1".to_string()]));
    assert_eq!(handler.applies("a1"), 1);
}

#[tokio::test]
async fn single_action_with_approval_suspends_then_completes() {
    let handler = Arc::new(RecordingHandler::default());
    let (orch, store) = harness(true, vec![workflow("a1")], handler.clone());

    let status = orch.run("t1", "build it").await.unwrap();
    let payload = status.payload().expect("suspended").clone();
    assert_eq!(payload.previews.len(), 1);
    assert_eq!(payload.previews[0].summary, "Create workflow \"a1\" with 2 steps");
    assert_eq!(handler.applies("a1"), 0);
    assert_eq!(store.list_suspended().await.unwrap(), vec!["t1"]);

    let summary = complete(orch.resume("t1", decisions(&[("a1", true)])).await.unwrap());
    assert_eq!(summary.done, vec!["a1"]);

    let state = orch.state("t1").await.unwrap().unwrap();
    assert!(state.interrupt.is_none());
    assert_eq!(handler.applies("a1"), 1);
    assert!(store.list_suspended().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_apply_blocks_dependents() {
    let handler = Arc::new(RecordingHandler::failing(&["a1"]));
    let actions = vec![workflow("a1"), workflow("a2").depends_on(["a1"])];
    let (orch, _) = harness(false, actions, handler.clone());

    let summary = complete(orch.run("t1", "go").await.unwrap());
    assert!(summary.done.is_empty());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].action_id, "a1");
    assert_eq!(summary.failed[0].phase, Phase::Apply);
    assert_eq!(summary.blocked, vec!["a2"]);
    assert_eq!(handler.designs("a2"), 0);

    let state = orch.state("t1").await.unwrap().unwrap();
    assert!(state.artifacts.done_ids.is_empty());
    assert!(state.response.unwrap().contains("a1 (apply failed"));
}

#[tokio::test]
async fn cyclic_plan_is_repaired_and_runs() {
    let handler = Arc::new(RecordingHandler::default());
    let actions = vec![
        workflow("a1").depends_on(["a2"]),
        workflow("a2").depends_on(["a1"]),
    ];
    let (orch, _) = harness(false, actions, handler.clone());

    let summary = complete(orch.run("t1", "go").await.unwrap());
    assert_eq!(summary.done.len(), 2);

    let state = orch.state("t1").await.unwrap().unwrap();
    let edges: usize = state.plan.actions.iter().map(|a| a.depends_on.len()).sum();
    assert!(edges < 2);
}

#[tokio::test]
async fn dependents_are_designed_after_their_dependencies_apply() {
    let handler = Arc::new(RecordingHandler::default());
    let actions = vec![workflow("a1"), workflow("a2").depends_on(["a1"])];
    let (orch, _) = harness(true, actions, handler.clone());

    let status = orch.run("t1", "go").await.unwrap();
    let ids: Vec<&str> = status.payload().unwrap().action_ids().collect();
    assert_eq!(ids, vec!["a1"]);

    let status = orch.resume("t1", decisions(&[("a1", true)])).await.unwrap();
    let ids: Vec<&str> = status.payload().unwrap().action_ids().collect();
    assert_eq!(ids, vec!["a2"]);

    let summary = complete(orch.resume("t1", decisions(&[("a2", true)])).await.unwrap());
    assert_eq!(summary.done, vec!["a1", "a2"]);
    assert_eq!(handler.designs("a1"), 1);
    assert_eq!(handler.applies("a1"), 1);
    assert_eq!(handler.applies("a2"), 1);
}

#[tokio::test]
async fn rejecting_everything_finalizes_without_apply() {
    let handler = Arc::new(RecordingHandler::default());
    let (orch, _) = harness(true, vec![workflow("a1"), workflow("a2")], handler.clone());

    orch.run("t1", "go").await.unwrap();
    let summary = complete(
        orch.resume("t1", decisions(&[("a1", false), ("a2", false)]))
            .await
            .unwrap(),
    );
    assert!(summary.done.is_empty());
    assert_eq!(summary.rejected, vec!["a1", "a2"]);
    assert_eq!(handler.applies("a1") + handler.applies("a2"), 0);
}

#[tokio::test]
async fn partial_approval_applies_only_approved() {
    let handler = Arc::new(RecordingHandler::default());
    let (orch, _) = harness(true, vec![workflow("a1"), workflow("a2")], handler.clone());

    orch.run("t1", "go").await.unwrap();
    let summary = complete(orch.resume("t1", decisions(&[("a1", true)])).await.unwrap());
    assert_eq!(summary.done, vec!["a1"]);
    assert_eq!(summary.rejected, vec!["a2"]);
    assert_eq!(handler.designs("a2"), 1);
}

#[tokio::test]
async fn resume_errors() {
    let handler = Arc::new(RecordingHandler::default());
    let (orch, _) = harness(true, vec![workflow("a1")], handler);

    assert!(matches!(
        orch.resume("missing", Decisions::new()).await,
        Err(Error::Graph(GraphError::ThreadNotFound { .. }))
    ));

    orch.run("t1", "go").await.unwrap();
    assert!(matches!(
        orch.run("t1", "again").await,
        Err(Error::Graph(GraphError::AlreadySuspended { .. }))
    ));

    orch.resume("t1", decisions(&[("a1", true)])).await.unwrap();
    assert!(matches!(
        orch.resume("t1", decisions(&[("a1", true)])).await,
        Err(Error::Graph(GraphError::NotSuspended { .. }))
    ));
}

#[tokio::test]
async fn help_questions_skip_execution() {
    let handler = Arc::new(RecordingHandler::default());
    let store = Arc::new(MemoryCheckpointStore::new());
    let orch = Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::new(HandlerRegistry::new().with(handler.clone())),
        Arc::new(StaticPlanner::new(vec![workflow("a1")]).with_intent(Intent::HelpKb)),
        store,
    );

    let status = orch.run("t1", "how do workflows work?").await.unwrap();
    assert!(!status.is_pending());
    assert_eq!(handler.designs("a1"), 0);
}

#[tokio::test]
async fn new_turn_on_finished_thread_keeps_transcript() {
    let handler = Arc::new(RecordingHandler::default());
    let (orch, _) = harness(false, vec![workflow("a1")], handler.clone());

    orch.run("t1", "first").await.unwrap();
    orch.run("t1", "second").await.unwrap();

    let state = orch.state("t1").await.unwrap().unwrap();
    assert_eq!(state.messages.len(), 4);
    assert_eq!(state.last_user_message(), Some("second"));
    assert_eq!(handler.applies("a1"), 2);
}

struct RecordingMemory {
    synthesized: Mutex<Vec<RunSummary>>,
}

#[async_trait]
impl MemoryStore for RecordingMemory {
    async fn recall(
        &self,
        _thread_id: &str,
        _messages: &[Message],
    ) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Memory("index offline".into()))
    }

    async fn synthesize(
        &self,
        _thread_id: &str,
        summary: &RunSummary,
    ) -> Result<(), CollaboratorError> {
        self.synthesized.lock().unwrap().push(summary.clone());
        Ok(())
    }
}

struct ContextCheckingPlanner;

#[async_trait]
impl Planner for ContextCheckingPlanner {
    async fn classify(&self, _messages: &[Message]) -> Result<Intent, CollaboratorError> {
        Ok(Intent::Mixed)
    }

    async fn plan(
        &self,
        _messages: &[Message],
        memory_context: &str,
    ) -> Result<Vec<Action>, CollaboratorError> {
        assert!(memory_context.is_empty());
        Ok(vec![
            Action::new("t", ActionType::CreateTask).with_params(json!({"title": "Follow up"})),
        ])
    }
}

#[tokio::test]
async fn memory_failures_are_ignored_and_summary_is_synthesized() {
    let memory = Arc::new(RecordingMemory {
        synthesized: Mutex::new(Vec::new()),
    });
    let orch = Orchestrator::new(
        OrchestratorConfig::default().with_approval(false),
        Arc::new(dry_run_registry()),
        Arc::new(ContextCheckingPlanner),
        Arc::new(MemoryCheckpointStore::new()),
    )
    .with_memory(memory.clone());

    let summary = complete(orch.run("t1", "remind me").await.unwrap());
    assert_eq!(summary.done, vec!["t"]);
    assert_eq!(memory.synthesized.lock().unwrap().as_slice(), &[summary]);
}

#[tokio::test]
async fn suspension_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoints.db");
    let handler = Arc::new(RecordingHandler::default());

    let build = |store: Arc<dyn CheckpointStore>| {
        Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(HandlerRegistry::new().with(handler.clone())),
            Arc::new(StaticPlanner::new(vec![workflow("a1")])),
            store,
        )
    };

    {
        let store: Arc<dyn CheckpointStore> =
            Arc::new(LibSqlCheckpointStore::new_local(&path).await.unwrap());
        let status = build(store).run("t1", "go").await.unwrap();
        assert!(status.is_pending());
    }

    let store: Arc<dyn CheckpointStore> =
        Arc::new(LibSqlCheckpointStore::new_local(&path).await.unwrap());
    let orch = build(store);
    let summary = complete(orch.resume("t1", decisions(&[("a1", true)])).await.unwrap());
    assert_eq!(summary.done, vec!["a1"]);
    assert_eq!(handler.designs("a1"), 1);
}

#[tokio::test]
async fn previews_without_display_fields_still_need_approval() {
    let actions = vec![
        Action::new("c1", ActionType::CreateRecord)
            .with_params(json!({"object_type": "company", "domain": "acme.com"})),
        Action::new("k1", ActionType::CreateTask).with_params(json!({"title": "Call Ada"})),
    ];
    let store = Arc::new(MemoryCheckpointStore::new());
    let orch = Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::new(dry_run_registry()),
        Arc::new(StaticPlanner::new(actions)),
        store.clone(),
    );

    let status = orch.run("t1", "add acme").await.unwrap();
    let payload = status.payload().expect("safe mode suspends").clone();
    let summaries: Vec<&str> = payload.previews.iter().map(|p| p.summary.as_str()).collect();
    assert_eq!(summaries, vec!["Create company record", "Create task \"Call Ada\""]);

    let state = orch.state("t1").await.unwrap().unwrap();
    assert!(state.artifacts.done_ids.is_empty());
    assert_eq!(store.list_suspended().await.unwrap(), vec!["t1"]);

    let summary = complete(
        orch.resume("t1", decisions(&[("c1", true), ("k1", false)]))
            .await
            .unwrap(),
    );
    assert_eq!(summary.done, vec!["c1"]);
    assert_eq!(summary.rejected, vec!["k1"]);
}

/// Designs a free-text spec that no summary can be rendered for.
struct FreeTextHandler {
    applies: Mutex<usize>,
}

#[async_trait]
impl ActionHandler for FreeTextHandler {
    fn action_type(&self) -> ActionType {
        ActionType::CreateTask
    }

    async fn design(&self, action: &Action) -> Result<Preview, HandlerError> {
        Ok(Preview::new(
            action.id.clone(),
            ActionType::CreateTask,
            json!("call the customer back"),
        ))
    }

    async fn apply(
        &self,
        _action: &Action,
        _preview: &Preview,
    ) -> Result<ApplyOutcome, HandlerError> {
        *self.applies.lock().unwrap() += 1;
        Ok(ApplyOutcome::Done)
    }
}

#[tokio::test]
async fn unrenderable_preview_fails_open() {
    let handler = Arc::new(FreeTextHandler {
        applies: Mutex::new(0),
    });
    let orch = Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::new(HandlerRegistry::new().with(handler.clone())),
        Arc::new(StaticPlanner::new(vec![Action::new("n1", ActionType::CreateTask)])),
        Arc::new(MemoryCheckpointStore::new()),
    );

    let summary = complete(orch.run("t1", "call them").await.unwrap());
    assert_eq!(summary.done, vec!["n1"]);
    assert_eq!(*handler.applies.lock().unwrap(), 1);
    assert!(orch.pending_threads().await.unwrap().is_empty());
}

#[tokio::test]
async fn long_dependency_chain_reaches_finalize() {
    let actions: Vec<Action> = (0..30)
        .map(|i| {
            let action = Action::new(format!("s{i}"), ActionType::CreateTask)
                .with_params(json!({"title": format!("Step {i}")}));
            if i == 0 {
                action
            } else {
                action.depends_on([format!("s{}", i - 1)])
            }
        })
        .collect();
    let orch = Orchestrator::new(
        OrchestratorConfig::default().with_approval(false),
        Arc::new(dry_run_registry()),
        Arc::new(StaticPlanner::new(actions)),
        Arc::new(MemoryCheckpointStore::new()),
    );

    let summary = complete(orch.run("t1", "do all of it").await.unwrap());
    assert_eq!(summary.done.len(), 30);
    assert!(summary.is_clean());
}

#[tokio::test]
async fn design_errors_are_recorded_not_raised() {
    let orch = Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::new(dry_run_registry()),
        Arc::new(StaticPlanner::new(vec![Action::new("x1", ActionType::CreateTask)])),
        Arc::new(MemoryCheckpointStore::new()),
    );

    let summary = complete(orch.run("t1", "make a task").await.unwrap());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].action_id, "x1");
    assert_eq!(summary.failed[0].phase, Phase::Design);
}

#[tokio::test]
async fn concurrent_resumes_apply_once() {
    let handler = Arc::new(RecordingHandler::default());
    let (orch, _) = harness(true, vec![workflow("a1")], handler.clone());
    orch.run("t1", "go").await.unwrap();

    let (first, second) = tokio::join!(
        orch.resume("t1", decisions(&[("a1", true)])),
        orch.resume("t1", decisions(&[("a1", true)])),
    );
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(Error::Graph(GraphError::NotSuspended { .. }))
    )));
    assert_eq!(handler.applies("a1"), 1);
}
