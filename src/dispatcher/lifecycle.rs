//! Lifecycle side-channel events reported by terminal-driven agent hooks.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::event::{AgentEvent, AgentEventType, EventPayload, EventTimestamp};

/// Hook that produced a lifecycle event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    /// The agent asks whether a tool may run.
    PermissionRequest,
    /// A tool is about to run.
    PreToolUse,
    /// A tool finished.
    PostToolUse,
    /// A session started.
    SessionStart,
    /// A session ended.
    SessionEnd,
    /// The agent stopped responding for this turn.
    Stop,
}

impl LifecycleKind {
    /// Stable label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PermissionRequest => "permission_request",
            Self::PreToolUse => "pre_tool_use",
            Self::PostToolUse => "post_tool_use",
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::Stop => "stop",
        }
    }
}

/// Event received on the lifecycle channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    /// Explicit identifier, if the hook supplied one.
    #[serde(default)]
    pub id: Option<String>,
    /// Hook kind.
    pub kind: LifecycleKind,
    /// Acting agent.
    pub agent_id: String,
    /// Session the event belongs to.
    pub session_id: String,
    /// Workspace of the session.
    pub workspace_path: String,
    /// Branch of the workspace.
    #[serde(default)]
    pub git_branch: String,
    /// Tool involved, for tool hooks.
    #[serde(default)]
    pub tool_name: Option<String>,
    /// Tool input, for tool hooks.
    #[serde(default)]
    pub tool_input: Option<Value>,
    /// Runtime identifier of the tool call.
    #[serde(default)]
    pub tool_use_id: Option<String>,
    /// When the hook fired (RFC 3339, epoch seconds or epoch millis).
    #[serde(default)]
    pub timestamp: Option<EventTimestamp>,
}

impl LifecycleEvent {
    /// Identifier used for deduplication.
    ///
    /// Without an explicit id, tool hooks derive a stable one from the
    /// tool-use id so repeated deliveries collapse. Otherwise empty, and the
    /// dispatcher assigns a fresh id.
    #[must_use]
    pub fn dedup_id(&self) -> String {
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            return id.to_owned();
        }
        match self.tool_use_id.as_deref().filter(|id| !id.is_empty()) {
            Some(tool_use_id) => format!("lifecycle:{}:{tool_use_id}", self.kind.as_str()),
            None => String::new(),
        }
    }

    /// Convert into the common event shape.
    #[must_use]
    pub fn into_agent_event(self) -> AgentEvent {
        let id = self.dedup_id();
        let tool_name = self.tool_name.unwrap_or_default();
        let tool_input = self
            .tool_input
            .unwrap_or_else(|| Value::Object(Map::new()));

        let (event_type, payload) = match self.kind {
            LifecycleKind::PermissionRequest => (
                AgentEventType::PermissionRequest,
                EventPayload::PermissionRequest {
                    tool_name,
                    tool_input,
                },
            ),
            LifecycleKind::PreToolUse => (
                AgentEventType::ToolBegin,
                EventPayload::Tool {
                    tool_name,
                    tool_input,
                },
            ),
            LifecycleKind::PostToolUse => (
                AgentEventType::ToolEnd,
                EventPayload::Tool {
                    tool_name,
                    tool_input,
                },
            ),
            LifecycleKind::SessionStart => (
                AgentEventType::SessionStart,
                EventPayload::SessionStart {
                    prompt: String::new(),
                },
            ),
            LifecycleKind::SessionEnd | LifecycleKind::Stop => (
                AgentEventType::SessionEnd,
                EventPayload::SessionEnd {
                    success: true,
                    error: None,
                },
            ),
        };

        let mut raw = Map::new();
        raw.insert("source".into(), Value::String("lifecycle".into()));
        raw.insert(
            "lifecycleKind".into(),
            Value::String(self.kind.as_str().into()),
        );
        if let Some(tool_use_id) = self.tool_use_id {
            raw.insert("toolUseId".into(), Value::String(tool_use_id));
        }

        AgentEvent {
            id,
            event_type,
            agent_id: self.agent_id,
            session_id: self.session_id,
            workspace_path: self.workspace_path,
            git_branch: self.git_branch,
            timestamp: self.timestamp,
            payload,
            raw,
            cancel: None,
            receipt: None,
        }
    }
}
