//! Dry-run handler — designs previews from parameters and applies nothing.
//!
//! Parameters understood on every action type:
//! - `fail` (string): apply reports this error instead of succeeding
//! - `delay_ms` (number): sleep before designing and applying

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::dispatch::{ActionHandler, ApplyOutcome, HandlerRegistry};
use crate::error::HandlerError;
use crate::state::{Action, ActionType, Preview};

/// Handler that validates parameters and echoes them as the preview spec.
#[derive(Debug, Clone, Copy)]
pub struct DryRunHandler {
    action_type: ActionType,
}

impl DryRunHandler {
    pub fn new(action_type: ActionType) -> Self {
        Self { action_type }
    }

    /// Parameters a designer needs before it can describe the action.
    fn required_params(&self) -> &'static [&'static str] {
        match self.action_type {
            ActionType::CreateRecord => &["object_type"],
            ActionType::UpdateRecord => &["record_id"],
            ActionType::ScheduleEvent => &["title"],
            ActionType::CreateTask => &["title"],
            ActionType::CreateWorkflow => &["name"],
        }
    }

    async fn simulate_latency(action: &Action) {
        if let Some(ms) = action.params.get("delay_ms").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl ActionHandler for DryRunHandler {
    fn action_type(&self) -> ActionType {
        self.action_type
    }

    async fn design(&self, action: &Action) -> Result<Preview, HandlerError> {
        Self::simulate_latency(action).await;

        let missing: Vec<&str> = self
            .required_params()
            .iter()
            .copied()
            .filter(|key| action.params.get(*key).is_none_or(Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(HandlerError::InvalidParams {
                action_id: action.id.clone(),
                reason: format!("missing {}", missing.join(", ")),
            });
        }

        tracing::debug!(action_id = %action.id, kind = %self.action_type, "Dry-run design");
        Ok(Preview::new(
            action.id.clone(),
            self.action_type,
            Value::Object(action.params.clone()),
        ))
    }

    async fn apply(&self, action: &Action, preview: &Preview) -> Result<ApplyOutcome, HandlerError> {
        Self::simulate_latency(action).await;

        if let Some(reason) = action.param_str("fail") {
            return Ok(ApplyOutcome::failed(reason));
        }
        tracing::info!(
            action_id = %action.id,
            kind = %self.action_type,
            summary = %preview.summary,
            "Dry-run apply"
        );
        Ok(ApplyOutcome::Done)
    }
}

/// A registry with a dry-run handler for every action type.
pub fn dry_run_registry() -> HandlerRegistry {
    ActionType::ALL
        .iter()
        .fold(HandlerRegistry::new(), |registry, action_type| {
            registry.with(Arc::new(DryRunHandler::new(*action_type)))
        })
}
