//! Designer/applier handler abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HandlerError;
use crate::state::{Action, ActionType, Preview};

/// Result of applying an approved action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The action took effect.
    Done,
    /// The external system rejected the action.
    Failed { error: String },
}

impl ApplyOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }
}

/// Handles one action type: designs a preview, then applies it once approved.
///
/// Implementations talk to the external record system. They should be
/// short-lived and tolerate at most one dispatch per action per phase.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The action type this handler serves.
    fn action_type(&self) -> ActionType;

    /// Produce the preview shown to the human before anything is applied.
    async fn design(&self, action: &Action) -> Result<Preview, HandlerError>;

    /// Apply a previously designed and approved action.
    async fn apply(&self, action: &Action, preview: &Preview)
    -> Result<ApplyOutcome, HandlerError>;
}
