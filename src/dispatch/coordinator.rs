//! Fan-out/fan-in coordinator for the design and apply phases.
//!
//! Both phases share one dispatch path: eligible actions are sent to their
//! handlers with at most `max_concurrency` in flight, each branch yields a
//! partial `StateUpdate`, and the branch updates are merged at fan-in. Any
//! handler error, timeout or panic becomes a `failed_actions` entry for that
//! action only.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt, stream};

use crate::config::OrchestratorConfig;
use crate::dispatch::handler::ApplyOutcome;
use crate::dispatch::registry::HandlerRegistry;
use crate::error::HandlerError;
use crate::plan::ready;
use crate::state::{Action, ExecutionState, Phase, Preview, StateUpdate};

/// Result of one fan-out.
#[derive(Debug, Clone, Default)]
pub struct PhaseOutcome {
    /// Merged branch updates.
    pub update: StateUpdate,
    /// Ids that were dispatched, in dispatch order.
    pub dispatched: Vec<String>,
}

/// Dispatches actions to handlers with bounded concurrency.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    max_concurrency: usize,
    handler_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, config: &OrchestratorConfig) -> Self {
        Self {
            registry,
            max_concurrency: config.max_concurrency.max(1),
            handler_timeout: config.handler_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Actions the design phase may dispatch now.
    pub fn design_eligible(state: &ExecutionState) -> Vec<Action> {
        ready(
            &state.plan,
            &state.artifacts.done_ids,
            &state.artifacts.failed_actions,
        )
        .into_iter()
        .filter(|a| !state.artifacts.is_rejected(&a.id))
        .cloned()
        .collect()
    }

    /// Approved actions the apply phase may dispatch, paired with their preview.
    pub fn apply_eligible(state: &ExecutionState) -> Vec<(Action, Option<Preview>)> {
        state
            .plan
            .actions
            .iter()
            .filter(|a| state.approvals.get(&a.id).copied().unwrap_or(false))
            .filter(|a| !state.artifacts.is_failed(&a.id) && !state.artifacts.is_done(&a.id))
            .map(|a| (a.clone(), state.previews.get(&a.id).cloned()))
            .collect()
    }

    /// Design every ready action.
    pub async fn design_phase(&self, state: &ExecutionState) -> PhaseOutcome {
        let eligible = Self::design_eligible(state);
        let dispatched: Vec<String> = eligible.iter().map(|a| a.id.clone()).collect();
        if eligible.is_empty() {
            tracing::debug!("Design phase: nothing ready");
            return PhaseOutcome::default();
        }
        tracing::info!(actions = ?dispatched, "Design phase fan-out");

        let update = self
            .fan_out(eligible, |action| async move {
                let id = action.id.clone();
                let handler = match self.registry.get(action.action_type) {
                    Some(h) => h,
                    None => {
                        return branch_failure(
                            &id,
                            Phase::Design,
                            HandlerError::NotRegistered {
                                action_type: action.action_type,
                            },
                        );
                    }
                };
                match self.guarded(&id, handler.design(&action)).await {
                    Ok(mut preview) => {
                        if preview.action_id != id {
                            tracing::warn!(
                                action_id = %id,
                                returned = %preview.action_id,
                                "Designer returned a preview for a different id"
                            );
                            preview.action_id = id.clone();
                        }
                        tracing::debug!(action_id = %id, "Designed preview");
                        StateUpdate::preview(preview)
                    }
                    Err(e) => branch_failure(&id, Phase::Design, e),
                }
            })
            .await;

        PhaseOutcome { update, dispatched }
    }

    /// Apply every approved action.
    pub async fn apply_phase(&self, state: &ExecutionState) -> PhaseOutcome {
        let eligible = Self::apply_eligible(state);
        let dispatched: Vec<String> = eligible.iter().map(|(a, _)| a.id.clone()).collect();
        if eligible.is_empty() {
            tracing::debug!("Apply phase: nothing approved");
            return PhaseOutcome::default();
        }
        tracing::info!(actions = ?dispatched, "Apply phase fan-out");

        let update = self
            .fan_out(eligible, |(action, preview)| async move {
                let id = action.id.clone();
                let Some(preview) = preview else {
                    return branch_failure(
                        &id,
                        Phase::Apply,
                        HandlerError::MissingPreview { action_id: id.clone() },
                    );
                };
                let handler = match self.registry.get(action.action_type) {
                    Some(h) => h,
                    None => {
                        return branch_failure(
                            &id,
                            Phase::Apply,
                            HandlerError::NotRegistered {
                                action_type: action.action_type,
                            },
                        );
                    }
                };
                match self.guarded(&id, handler.apply(&action, &preview)).await {
                    Ok(ApplyOutcome::Done) => {
                        tracing::info!(action_id = %id, "Action applied");
                        StateUpdate::mark_done(id)
                    }
                    Ok(ApplyOutcome::Failed { error }) => {
                        tracing::warn!(action_id = %id, %error, "Action rejected by handler");
                        StateUpdate::mark_failed(id, error, Phase::Apply)
                    }
                    Err(e) => branch_failure(&id, Phase::Apply, e),
                }
            })
            .await;

        PhaseOutcome { update, dispatched }
    }

    /// Run `branch` for every item with bounded concurrency and merge the
    /// resulting updates. Completion order does not affect the result.
    async fn fan_out<T, F, Fut>(&self, items: Vec<T>, branch: F) -> StateUpdate
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = StateUpdate>,
    {
        stream::iter(items)
            .map(branch)
            .buffer_unordered(self.max_concurrency)
            .fold(StateUpdate::new(), |acc, update| async move { acc.merge(update) })
            .await
    }

    /// Await a handler call under the configured timeout, converting panics
    /// into errors.
    async fn guarded<T, Fut>(&self, action_id: &str, fut: Fut) -> Result<T, HandlerError>
    where
        Fut: Future<Output = Result<T, HandlerError>>,
    {
        match tokio::time::timeout(self.handler_timeout, AssertUnwindSafe(fut).catch_unwind())
            .await
        {
            Err(_) => Err(HandlerError::Timeout {
                action_id: action_id.to_string(),
                timeout: self.handler_timeout,
            }),
            Ok(Err(panic)) => Err(HandlerError::Panicked {
                action_id: action_id.to_string(),
                reason: panic_message(&*panic),
            }),
            Ok(Ok(result)) => result,
        }
    }
}

fn branch_failure(action_id: &str, phase: Phase, error: HandlerError) -> StateUpdate {
    tracing::warn!(action_id = %action_id, %phase, error = %error, "Action failed");
    StateUpdate::mark_failed(action_id, error.to_string(), phase)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handler::ActionHandler;
    use crate::state::{ActionType, Decisions, Plan};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Tracks how many branches run at once.
    #[derive(Default)]
    struct CountingHandler {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ActionHandler for CountingHandler {
        fn action_type(&self) -> ActionType {
            ActionType::CreateTask
        }
        async fn design(&self, action: &Action) -> Result<Preview, HandlerError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match action.param_str("mode") {
                Some("error") => Err(HandlerError::Failed {
                    action_id: action.id.clone(),
                    reason: "upstream refused".into(),
                }),
                Some("panic") => panic!("designer exploded"),
                Some("slow") => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    unreachable!()
                }
                _ => Ok(Preview::new(&action.id, ActionType::CreateTask, serde_json::json!({}))),
            }
        }
        async fn apply(
            &self,
            action: &Action,
            _preview: &Preview,
        ) -> Result<ApplyOutcome, HandlerError> {
            match action.param_str("mode") {
                Some("reject") => Ok(ApplyOutcome::failed("FATAL: duplicate record")),
                _ => Ok(ApplyOutcome::Done),
            }
        }
    }

    fn dispatcher(handler: Arc<CountingHandler>, concurrency: usize) -> Dispatcher {
        let registry = Arc::new(HandlerRegistry::new().with(handler));
        let config = OrchestratorConfig {
            handler_timeout: Duration::from_millis(500),
            ..OrchestratorConfig::default().with_max_concurrency(concurrency)
        };
        Dispatcher::new(registry, &config)
    }

    fn state_with(actions: Vec<Action>) -> ExecutionState {
        ExecutionState {
            plan: Plan { actions },
            ..Default::default()
        }
    }

    fn task(id: &str, mode: &str) -> Action {
        Action::new(id, ActionType::CreateTask).with_params(serde_json::json!({ "mode": mode }))
    }

    #[tokio::test]
    async fn design_respects_concurrency_ceiling() {
        let handler = Arc::new(CountingHandler::default());
        let dispatcher = dispatcher(handler.clone(), 3);
        let state = state_with((0..8).map(|i| task(&format!("a{i}"), "ok")).collect());

        let outcome = dispatcher.design_phase(&state).await;
        assert_eq!(outcome.dispatched.len(), 8);
        assert_eq!(outcome.update.previews.as_ref().unwrap().len(), 8);
        assert!(handler.peak.load(Ordering::SeqCst) <= 3);
        assert!(handler.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn branch_failures_do_not_affect_siblings() {
        let handler = Arc::new(CountingHandler::default());
        let dispatcher = dispatcher(handler, 3);
        let state = state_with(vec![
            task("ok", "ok"),
            task("err", "error"),
            task("boom", "panic"),
            task("slow", "slow"),
            Action::new("unhandled", ActionType::ScheduleEvent),
        ]);

        let mut after = state.clone();
        after.apply(dispatcher.design_phase(&state).await.update);

        assert!(after.previews.contains_key("ok"));
        let failed = &after.artifacts.failed_actions;
        assert_eq!(failed.len(), 4);
        assert!(failed["err"].error.contains("upstream refused"));
        assert!(failed["boom"].error.contains("designer exploded"));
        assert!(failed["slow"].error.contains("timed out"));
        assert!(failed["unhandled"].error.contains("No handler registered"));
        assert!(failed.values().all(|f| f.phase == Phase::Design));
    }

    #[tokio::test]
    async fn apply_only_dispatches_approved_unsettled_actions() {
        let handler = Arc::new(CountingHandler::default());
        let dispatcher = dispatcher(handler, 3);
        let mut state = state_with(vec![
            task("a1", "ok"),
            task("a2", "reject"),
            task("a3", "ok"),
            task("a4", "ok"),
            task("a5", "ok"),
        ]);
        for id in ["a1", "a2", "a3", "a4"] {
            state.previews.insert(
                id.into(),
                Preview::new(id, ActionType::CreateTask, serde_json::json!({})),
            );
        }
        state.artifacts.done_ids.insert("a4".into());
        state.approvals = Decisions::from([
            ("a1".to_string(), true),
            ("a2".to_string(), true),
            ("a3".to_string(), false),
            ("a4".to_string(), true),
            ("a5".to_string(), true),
        ]);

        let outcome = dispatcher.apply_phase(&state).await;
        assert_eq!(outcome.dispatched, vec!["a1", "a2", "a5"]);

        state.apply(outcome.update);
        assert!(state.artifacts.is_done("a1"));
        let a2 = &state.artifacts.failed_actions["a2"];
        assert_eq!(a2.phase, Phase::Apply);
        assert!(!a2.retryable);
        assert!(state.artifacts.failed_actions["a5"].error.contains("No preview"));
    }

    #[tokio::test]
    async fn design_skips_rejected_actions() {
        let handler = Arc::new(CountingHandler::default());
        let dispatcher = dispatcher(handler, 3);
        let mut state = state_with(vec![task("a1", "ok"), task("a2", "ok")]);
        state.artifacts.rejected_ids.insert("a2".into());

        let outcome = dispatcher.design_phase(&state).await;
        assert_eq!(outcome.dispatched, vec!["a1"]);
    }
}
