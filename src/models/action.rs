//! UI-facing action requests and the responses that answer them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Discriminator shared by requests and responses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Approve or deny a tool call.
    ToolApproval,
    /// Answer questions asked by the agent.
    ClarifyingQuestion,
}

/// Identity shared by every action variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActionOrigin {
    /// Identifier a response must echo back; equals the tool-use id.
    pub action_id: String,
    /// Event that produced the action.
    pub event_id: String,
    /// Acting agent.
    pub agent_id: String,
    /// Session the request belongs to.
    pub session_id: String,
    /// Workspace of the session.
    pub workspace_path: String,
    /// Branch of the workspace.
    pub git_branch: String,
    /// Runtime identifier of the tool call.
    pub tool_use_id: String,
    /// When the action was built.
    pub created_at: DateTime<Utc>,
}

/// Tool call awaiting approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolApprovalAction {
    /// Common identity.
    #[serde(flatten)]
    pub origin: ActionOrigin,
    /// Tool name.
    pub tool_name: String,
    /// Shell command, for command-running tools.
    pub command: Option<String>,
    /// Target file, for file tools.
    pub file_path: Option<String>,
    /// Directory the tool runs in.
    pub working_directory: Option<String>,
    /// Unmodified tool input.
    pub input: Value,
}

/// Selectable option of a clarifying question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    /// Text shown on the option.
    pub label: String,
    /// Longer explanation.
    #[serde(default)]
    pub description: Option<String>,
}

/// One question asked by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClarifyingQuestion {
    /// Question text.
    pub question: String,
    /// Short heading.
    #[serde(default)]
    pub header: Option<String>,
    /// Offered answers.
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    /// Whether several options may be picked.
    #[serde(default)]
    pub multi_select: bool,
}

/// Questions awaiting answers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClarifyingQuestionAction {
    /// Common identity.
    #[serde(flatten)]
    pub origin: ActionOrigin,
    /// Questions in display order.
    pub questions: Vec<ClarifyingQuestion>,
    /// Unmodified tool input.
    pub input: Value,
}

/// Action request handed to the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionRequest {
    /// Tool approval.
    ToolApproval(ToolApprovalAction),
    /// Clarifying question.
    ClarifyingQuestion(ClarifyingQuestionAction),
}

impl ActionRequest {
    /// Common identity of the action.
    #[must_use]
    pub fn origin(&self) -> &ActionOrigin {
        match self {
            Self::ToolApproval(action) => &action.origin,
            Self::ClarifyingQuestion(action) => &action.origin,
        }
    }

    /// Identifier a response must echo back.
    #[must_use]
    pub fn action_id(&self) -> &str {
        &self.origin().action_id
    }

    /// Kind of the action.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::ToolApproval(_) => ActionKind::ToolApproval,
            Self::ClarifyingQuestion(_) => ActionKind::ClarifyingQuestion,
        }
    }
}

/// Operator decision on a tool approval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Let the tool run.
    #[serde(alias = "approve", alias = "approved")]
    Allow,
    /// Block the tool.
    #[serde(alias = "reject", alias = "rejected")]
    Deny,
}

/// Response accepted from the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    /// Identifier of the answered action.
    pub action_id: String,
    /// Kind of the answered action.
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// Decision for tool approvals.
    #[serde(default)]
    pub decision: Option<ApprovalDecision>,
    /// Answers for clarifying questions, keyed by question text.
    #[serde(default)]
    pub answers: Option<Map<String, Value>>,
    /// Optional message (e.g., denial reason).
    #[serde(default)]
    pub message: Option<String>,
}

impl ActionResponse {
    /// Tool-approval response.
    #[must_use]
    pub fn approval(
        action_id: impl Into<String>,
        decision: ApprovalDecision,
        message: Option<String>,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            kind: ActionKind::ToolApproval,
            decision: Some(decision),
            answers: None,
            message,
        }
    }

    /// Clarifying-question response.
    #[must_use]
    pub fn answers(action_id: impl Into<String>, answers: Map<String, Value>) -> Self {
        Self {
            action_id: action_id.into(),
            kind: ActionKind::ClarifyingQuestion,
            decision: None,
            answers: Some(answers),
            message: None,
        }
    }
}
