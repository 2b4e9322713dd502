//! Human-readable one-line summaries for previews.

use serde_json::Value;

use crate::state::{ActionType, Preview};

/// Why a summary could not be rendered.
#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("Preview {action_id} has a non-object spec")]
    InvalidSpec { action_id: String },
}

/// Render the summary for a preview.
///
/// A summary supplied by the designer is kept as-is. Any object spec renders;
/// missing display fields fall back to a generic phrasing.
pub fn render_summary(preview: &Preview) -> Result<String, SummaryError> {
    if !preview.summary.trim().is_empty() {
        return Ok(preview.summary.clone());
    }
    let spec = preview
        .spec
        .as_object()
        .ok_or_else(|| SummaryError::InvalidSpec {
            action_id: preview.action_id.clone(),
        })?;

    let summary = match preview.kind {
        ActionType::CreateWorkflow => {
            let steps = spec
                .get("steps")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            let noun = if steps == 1 { "step" } else { "steps" };
            match first_str(spec, &["name", "title"]) {
                Some(name) => format!("Create workflow \"{name}\" with {steps} {noun}"),
                None => format!("Create workflow with {steps} {noun}"),
            }
        }
        ActionType::CreateRecord => {
            let object = object_name(spec);
            match first_str(spec, &["name", "title", "email"]) {
                Some(name) => format!("Create {object} \"{name}\""),
                None => format!("Create {object} record"),
            }
        }
        ActionType::UpdateRecord => {
            let object = object_name(spec);
            let fields = spec
                .get("properties")
                .and_then(Value::as_object)
                .map(|m| m.len())
                .unwrap_or(0);
            let noun = if fields == 1 { "field" } else { "fields" };
            match spec.get("record_id").filter(|v| !v.is_null()) {
                Some(Value::String(id)) => format!("Update {object} {id} ({fields} {noun})"),
                Some(other) => format!("Update {object} {other} ({fields} {noun})"),
                None => format!("Update {object} ({fields} {noun})"),
            }
        }
        ActionType::ScheduleEvent => {
            let start = first_str(spec, &["start", "start_time", "when"]);
            match (first_str(spec, &["title", "name"]), start) {
                (Some(title), Some(start)) => format!("Schedule \"{title}\" at {start}"),
                (Some(title), None) => format!("Schedule \"{title}\""),
                (None, Some(start)) => format!("Schedule event at {start}"),
                (None, None) => "Schedule event".to_string(),
            }
        }
        ActionType::CreateTask => {
            let due = first_str(spec, &["due", "due_date"]);
            match (first_str(spec, &["title", "name", "subject"]), due) {
                (Some(title), Some(due)) => format!("Create task \"{title}\" due {due}"),
                (Some(title), None) => format!("Create task \"{title}\""),
                (None, Some(due)) => format!("Create task due {due}"),
                (None, None) => "Create task".to_string(),
            }
        }
    };
    Ok(summary)
}

fn first_str(spec: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| spec.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn object_name(spec: &serde_json::Map<String, Value>) -> String {
    first_str(spec, &["object_type", "object"]).unwrap_or_else(|| "record".into())
}
