//! Partial state updates and the per-field merge rules.
//!
//! Nodes and handler branches never mutate `ExecutionState` directly. They
//! return a `StateUpdate`, and only the orchestrator folds updates into the
//! state. The collection rules are commutative, so branch completion order
//! within a fan-out does not affect the result.
//!
//! | field            | rule                                         |
//! |------------------|----------------------------------------------|
//! | plan             | replace                                      |
//! | previews         | union keyed by action id, new wins           |
//! | done_ids         | set union; an explicitly empty set resets     |
//! | failed_actions   | union keyed by action id, first wins; empty resets |
//! | rejected_ids     | set union; an explicitly empty set resets     |
//! | approvals        | replace                                      |
//! | interrupt        | replace                                      |
//! | user_context     | shallow merge                                |
//! | messages         | append                                       |
//! | intent, response | replace                                      |

use std::collections::{BTreeMap, BTreeSet};

use super::model::{
    Decisions, ExecutionState, FailedAction, Intent, Interrupt, Message, Phase, Plan, Preview,
};

type JsonMap = serde_json::Map<String, serde_json::Value>;

/// A partial update to `ExecutionState`. `None` / empty means "no change".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub plan: Option<Plan>,
    /// `Some(empty)` clears all previews.
    pub previews: Option<Vec<Preview>>,
    /// `Some(empty)` resets completion progress.
    pub done_ids: Option<BTreeSet<String>>,
    /// `Some(empty)` clears recorded failures.
    pub failed_actions: Option<BTreeMap<String, FailedAction>>,
    /// `Some(empty)` forgets prior rejections.
    pub rejected_ids: Option<BTreeSet<String>>,
    pub approvals: Option<Decisions>,
    /// `Some(None)` clears the interrupt marker.
    pub interrupt: Option<Option<Interrupt>>,
    pub intent: Option<Intent>,
    pub messages: Vec<Message>,
    pub user_context: Option<JsonMap>,
    pub response: Option<String>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed action.
    pub fn mark_done(action_id: impl Into<String>) -> Self {
        Self {
            done_ids: Some(BTreeSet::from([action_id.into()])),
            ..Default::default()
        }
    }

    /// Record a failed action for the given phase.
    pub fn mark_failed(action_id: impl Into<String>, error: impl Into<String>, phase: Phase) -> Self {
        Self {
            failed_actions: Some(BTreeMap::from([(
                action_id.into(),
                FailedAction::new(error, phase),
            )])),
            ..Default::default()
        }
    }

    /// Record a designed preview.
    pub fn preview(preview: Preview) -> Self {
        Self {
            previews: Some(vec![preview]),
            ..Default::default()
        }
    }

    /// Record actions the human declined. An empty set leaves the state as-is.
    pub fn with_rejected(mut self, ids: BTreeSet<String>) -> Self {
        if !ids.is_empty() {
            self.rejected_ids = Some(ids);
        }
        self
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn with_approvals(mut self, approvals: Decisions) -> Self {
        self.approvals = Some(approvals);
        self
    }

    pub fn with_interrupt(mut self, interrupt: Option<Interrupt>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_user_context(mut self, context: JsonMap) -> Self {
        self.user_context = Some(context);
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    /// Reset per-plan progress: done ids, failures, rejections, previews and
    /// approvals.
    pub fn with_progress_reset(mut self) -> Self {
        self.done_ids = Some(BTreeSet::new());
        self.failed_actions = Some(BTreeMap::new());
        self.rejected_ids = Some(BTreeSet::new());
        self.previews = Some(Vec::new());
        self.approvals = Some(Decisions::new());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Combine two partial updates using the same rules as `apply`.
    ///
    /// Folding a set of branch updates with `merge` and applying the result
    /// is equivalent to applying each of them in turn.
    pub fn merge(mut self, other: StateUpdate) -> StateUpdate {
        if other.plan.is_some() {
            self.plan = other.plan;
        }
        self.previews = match (self.previews, other.previews) {
            (Some(mut ours), Some(theirs)) if !theirs.is_empty() => {
                ours.extend(theirs);
                Some(ours)
            }
            (ours, None) => ours,
            (_, theirs) => theirs,
        };
        self.done_ids = union_sets(self.done_ids, other.done_ids);
        self.rejected_ids = union_sets(self.rejected_ids, other.rejected_ids);
        self.failed_actions = match (self.failed_actions, other.failed_actions) {
            (Some(mut ours), Some(theirs)) if !theirs.is_empty() => {
                merge_failed(&mut ours, theirs);
                Some(ours)
            }
            (ours, None) => ours,
            (_, theirs) => theirs,
        };
        if other.approvals.is_some() {
            self.approvals = other.approvals;
        }
        if other.interrupt.is_some() {
            self.interrupt = other.interrupt;
        }
        if other.intent.is_some() {
            self.intent = other.intent;
        }
        self.messages.extend(other.messages);
        self.user_context = match (self.user_context, other.user_context) {
            (Some(mut ours), Some(theirs)) => {
                merge_user_context(&mut ours, theirs);
                Some(ours)
            }
            (ours, theirs) => theirs.or(ours),
        };
        if other.response.is_some() {
            self.response = other.response;
        }
        self
    }
}

fn union_sets(
    ours: Option<BTreeSet<String>>,
    theirs: Option<BTreeSet<String>>,
) -> Option<BTreeSet<String>> {
    match (ours, theirs) {
        (Some(mut ours), Some(theirs)) if !theirs.is_empty() => {
            ours.extend(theirs);
            Some(ours)
        }
        (ours, None) => ours,
        (_, theirs) => theirs,
    }
}

/// Union keyed by action id; the incoming preview supersedes the existing one.
/// An empty incoming list clears the collection.
pub fn merge_previews(current: &mut BTreeMap<String, Preview>, incoming: Vec<Preview>) {
    if incoming.is_empty() {
        current.clear();
        return;
    }
    for preview in incoming {
        current.insert(preview.action_id.clone(), preview);
    }
}

/// Set union. An explicitly empty incoming set signals a plan reset.
pub fn merge_done_ids(current: &mut BTreeSet<String>, incoming: BTreeSet<String>) {
    if incoming.is_empty() {
        current.clear();
    } else {
        current.extend(incoming);
    }
}

/// Set union. An explicitly empty incoming set forgets prior rejections.
pub fn merge_rejected_ids(current: &mut BTreeSet<String>, incoming: BTreeSet<String>) {
    merge_done_ids(current, incoming)
}

/// Union keyed by action id; the first recorded failure is kept.
/// An empty incoming map clears recorded failures.
pub fn merge_failed(
    current: &mut BTreeMap<String, FailedAction>,
    incoming: BTreeMap<String, FailedAction>,
) {
    if incoming.is_empty() {
        current.clear();
        return;
    }
    for (id, failure) in incoming {
        current.entry(id).or_insert(failure);
    }
}

/// Shallow merge: top-level keys from `incoming` overwrite.
pub fn merge_user_context(current: &mut JsonMap, incoming: JsonMap) {
    for (key, value) in incoming {
        current.insert(key, value);
    }
}

impl ExecutionState {
    /// Fold a partial update into the state.
    pub fn apply(&mut self, update: StateUpdate) {
        let StateUpdate {
            plan,
            previews,
            done_ids,
            failed_actions,
            rejected_ids,
            approvals,
            interrupt,
            intent,
            messages,
            user_context,
            response,
        } = update;

        if let Some(plan) = plan {
            self.plan = plan;
        }
        if let Some(previews) = previews {
            merge_previews(&mut self.previews, previews);
        }
        if let Some(done) = done_ids {
            merge_done_ids(&mut self.artifacts.done_ids, done);
        }
        if let Some(failed) = failed_actions {
            merge_failed(&mut self.artifacts.failed_actions, failed);
        }
        if let Some(rejected) = rejected_ids {
            merge_rejected_ids(&mut self.artifacts.rejected_ids, rejected);
        }
        if let Some(approvals) = approvals {
            self.approvals = approvals;
        }
        if let Some(interrupt) = interrupt {
            self.interrupt = interrupt;
        }
        if let Some(intent) = intent {
            self.intent = Some(intent);
        }
        self.messages.extend(messages);
        if let Some(context) = user_context {
            merge_user_context(&mut self.user_context, context);
        }
        if let Some(response) = response {
            self.response = Some(response);
        }
    }
}
