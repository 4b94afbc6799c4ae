//! Conversion of permission requests into UI action requests.

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use crate::models::action::{
    ActionOrigin, ActionRequest, ClarifyingQuestion, ClarifyingQuestionAction, ToolApprovalAction,
};
use crate::models::event::{AgentEvent, AgentEventType, EventPayload};
use crate::{AppError, Result};

/// Tool the agent uses to ask the operator questions.
pub const QUESTION_TOOL_NAME: &str = "AskUserQuestion";

/// Input keys that may name the file a tool touches, in lookup order.
const FILE_PATH_KEYS: [&str; 3] = ["file_path", "path", "notebook_path"];

/// Build the action the UI must answer for a `permission:request` event.
///
/// # Errors
///
/// Returns `AppError::Context` if the event is not a permission request or
/// lacks its agent, session, workspace, branch or tool-use identifier.
pub fn build_action_request(event: &AgentEvent) -> Result<ActionRequest> {
    if event.event_type != AgentEventType::PermissionRequest {
        return Err(AppError::Context(format!(
            "event {} is {}, not a permission request",
            event.id,
            event.event_type.as_str()
        )));
    }

    let EventPayload::PermissionRequest {
        ref tool_name,
        ref tool_input,
    } = event.payload
    else {
        return Err(AppError::Context(format!(
            "permission request {} has no tool payload",
            event.id
        )));
    };

    let origin = origin_of(event)?;

    if tool_name == QUESTION_TOOL_NAME {
        return Ok(ActionRequest::ClarifyingQuestion(ClarifyingQuestionAction {
            origin,
            questions: parse_questions(tool_input),
            input: tool_input.clone(),
        }));
    }

    let field = |key: &str| tool_input.get(key).and_then(Value::as_str).map(str::to_owned);

    Ok(ActionRequest::ToolApproval(ToolApprovalAction {
        tool_name: tool_name.clone(),
        command: field("command"),
        file_path: FILE_PATH_KEYS.iter().find_map(|key| field(*key)),
        working_directory: field("cwd").or_else(|| Some(event.workspace_path.clone())),
        input: tool_input.clone(),
        origin,
    }))
}

fn origin_of(event: &AgentEvent) -> Result<ActionOrigin> {
    require("agent id", &event.agent_id, &event.id)?;
    require("session id", &event.session_id, &event.id)?;
    require("workspace path", &event.workspace_path, &event.id)?;
    require("git branch", &event.git_branch, &event.id)?;
    let tool_use_id = event
        .tool_use_id()
        .ok_or_else(|| AppError::Context(format!("missing tool use id on event {}", event.id)))?
        .to_owned();

    Ok(ActionOrigin {
        action_id: tool_use_id.clone(),
        event_id: event.id.clone(),
        agent_id: event.agent_id.clone(),
        session_id: event.session_id.clone(),
        workspace_path: event.workspace_path.clone(),
        git_branch: event.git_branch.clone(),
        tool_use_id,
        created_at: Utc::now(),
    })
}

fn require(field: &str, value: &str, event_id: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Context(format!(
            "missing {field} on event {event_id}"
        )));
    }
    Ok(())
}

fn parse_questions(input: &Value) -> Vec<ClarifyingQuestion> {
    let Some(items) = input.get("questions").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(question) => Some(question),
            Err(err) => {
                warn!(%err, "skipping malformed clarifying question");
                None
            }
        })
        .collect()
}
