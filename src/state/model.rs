//! Execution state types: actions, plans, previews, artifacts, approvals.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Errors whose text matches this are considered non-retryable.
static FATAL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(fatal|critical)\b").unwrap());

/// Kind of business action. Selects the designer/applier handler.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a record (contact, company, deal...).
    CreateRecord,
    /// Update fields on an existing record.
    UpdateRecord,
    /// Schedule a calendar event or meeting.
    ScheduleEvent,
    /// Create a follow-up task.
    CreateTask,
    /// Build a multi-step workflow.
    CreateWorkflow,
}

impl ActionType {
    /// Every action type the planner can emit.
    pub const ALL: [ActionType; 5] = [
        Self::CreateRecord,
        Self::UpdateRecord,
        Self::ScheduleEvent,
        Self::CreateTask,
        Self::CreateWorkflow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRecord => "create_record",
            Self::UpdateRecord => "update_record",
            Self::ScheduleEvent => "schedule_event",
            Self::CreateTask => "create_task",
            Self::CreateWorkflow => "create_workflow",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown action type: {s}"))
    }
}

/// A single schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Action {
    pub fn new(id: impl Into<String>, action_type: ActionType) -> Self {
        Self {
            id: id.into(),
            action_type,
            params: serde_json::Map::new(),
            depends_on: Vec::new(),
        }
    }

    /// Attach parameters. Non-object values are ignored.
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = params {
            self.params = map;
        }
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    /// String parameter lookup.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

/// The validated, cycle-free set of actions for one planning pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn get(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|a| a.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Designed-but-not-yet-applied representation of one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub action_id: String,
    pub kind: ActionType,
    pub spec: serde_json::Value,
    #[serde(default)]
    pub summary: String,
}

impl Preview {
    pub fn new(action_id: impl Into<String>, kind: ActionType, spec: serde_json::Value) -> Self {
        Self {
            action_id: action_id.into(),
            kind,
            spec,
            summary: String::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

/// Phase an action failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Design,
    Apply,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Design => write!(f, "design"),
            Self::Apply => write!(f, "apply"),
        }
    }
}

/// A recorded action failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAction {
    pub error: String,
    pub phase: Phase,
    pub retryable: bool,
}

impl FailedAction {
    /// Record a failure; `retryable` is derived from the error text.
    pub fn new(error: impl Into<String>, phase: Phase) -> Self {
        let error = error.into();
        let retryable = !FATAL_PATTERN.is_match(&error);
        Self {
            error,
            phase,
            retryable,
        }
    }
}

/// Progress record for the current plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionArtifacts {
    #[serde(default)]
    pub done_ids: BTreeSet<String>,
    #[serde(default)]
    pub failed_actions: BTreeMap<String, FailedAction>,
    /// Actions the human declined; they are not offered again for this plan.
    #[serde(default)]
    pub rejected_ids: BTreeSet<String>,
}

impl ExecutionArtifacts {
    pub fn is_done(&self, id: &str) -> bool {
        self.done_ids.contains(id)
    }

    pub fn is_failed(&self, id: &str) -> bool {
        self.failed_actions.contains_key(id)
    }

    pub fn is_rejected(&self, id: &str) -> bool {
        self.rejected_ids.contains(id)
    }

    /// Settled actions are never dispatched again.
    pub fn is_settled(&self, id: &str) -> bool {
        self.is_done(id) || self.is_failed(id) || self.is_rejected(id)
    }
}

/// Human decisions, keyed by action id.
pub type Decisions = BTreeMap<String, bool>;

/// Snapshot handed to the human when the run suspends for approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPayload {
    pub previews: Vec<Preview>,
    pub requested_at: DateTime<Utc>,
}

impl ApprovalPayload {
    pub fn new(previews: Vec<Preview>) -> Self {
        Self {
            previews,
            requested_at: Utc::now(),
        }
    }

    pub fn action_ids(&self) -> impl Iterator<Item = &str> {
        self.previews.iter().map(|p| p.action_id.as_str())
    }
}

/// Set while the run is suspended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Interrupt {
    PendingApproval { payload: ApprovalPayload },
}

impl Interrupt {
    pub fn payload(&self) -> &ApprovalPayload {
        match self {
            Self::PendingApproval { payload } => payload,
        }
    }
}

/// Classified intent of the latest user message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Answer from the knowledge base; nothing to execute.
    HelpKb,
    /// Execute business actions.
    #[default]
    Action,
    /// Both answer and act.
    Mixed,
}

impl Intent {
    pub fn needs_plan(&self) -> bool {
        !matches!(self, Self::HelpKb)
    }
}

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The full, checkpointed execution state for one conversation thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub artifacts: ExecutionArtifacts,
    /// Keyed by action id so a redesign supersedes the earlier preview.
    #[serde(default)]
    pub previews: BTreeMap<String, Preview>,
    #[serde(default)]
    pub approvals: Decisions,
    #[serde(default)]
    pub interrupt: Option<Interrupt>,
    #[serde(default)]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub user_context: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub response: Option<String>,
}

impl ExecutionState {
    /// Previews still awaiting a decision: their action is in the plan and
    /// has not completed, failed or been rejected.
    pub fn pending_previews(&self) -> Vec<&Preview> {
        self.previews
            .values()
            .filter(|p| self.plan.contains(&p.action_id))
            .filter(|p| !self.artifacts.is_settled(&p.action_id))
            .collect()
    }

    /// Whether every planned action has completed.
    pub fn all_done(&self) -> bool {
        self.plan.ids().all(|id| self.artifacts.is_done(id))
    }

    pub fn is_suspended(&self) -> bool {
        self.interrupt.is_some()
    }

    /// Most recent user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}
