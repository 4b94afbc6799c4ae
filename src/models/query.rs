//! Query options, session directives and request context.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Permission-mode hint forwarded to the runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Ask for every sensitive tool.
    Default,
    /// Auto-approve file edits.
    AcceptEdits,
    /// Skip all permission checks.
    BypassPermissions,
    /// Plan only, never execute tools.
    Plan,
}

impl PermissionMode {
    /// Flag value understood by the agent CLI.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
            Self::Plan => "plan",
        }
    }
}

/// How the runtime should pick the conversation for a query.
///
/// The variants are mutually exclusive by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionDirective {
    /// Continue an existing session, optionally forking it first.
    Resume {
        /// Session to continue.
        session_id: String,
        /// Ask the runtime to branch the history into a new session.
        #[serde(default)]
        fork: bool,
    },
    /// Continue the most recent session in the working directory.
    ContinueLatest,
    /// Start a new session under a caller-chosen identifier.
    CreateWithId {
        /// Identifier for the new session.
        session_id: String,
    },
}

/// Options handed to the [`QueryExecutor`](crate::executor::QueryExecutor).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    /// Working directory of the runtime.
    pub cwd: PathBuf,
    /// Optional system prompt appended to the runtime default.
    pub system_prompt: Option<String>,
    /// Session selection.
    pub directive: Option<SessionDirective>,
    /// Permission-mode hint.
    pub permission_mode: Option<PermissionMode>,
    /// Whether partial deltas should be streamed.
    pub streaming: bool,
}

impl QueryOptions {
    /// Options for `cwd` with nothing else set.
    #[must_use]
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            system_prompt: None,
            directive: None,
            permission_mode: None,
            streaming: false,
        }
    }

    /// Copy of these options with `directive` replacing the current one.
    ///
    /// Every other option, the permission mode included, is preserved.
    #[must_use]
    pub fn with_directive(&self, directive: SessionDirective) -> Self {
        Self {
            directive: Some(directive),
            ..self.clone()
        }
    }
}

/// Identity of the acting agent, passed explicitly alongside each query's
/// cancellation token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryContext {
    /// Acting agent.
    pub agent_id: String,
    /// Session the query belongs to.
    pub session_id: String,
    /// Workspace the runtime operates in.
    pub workspace_path: PathBuf,
    /// Branch checked out in the workspace.
    pub git_branch: String,
}

impl QueryContext {
    /// Ensure every identifier is present.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Context` naming the first missing field.
    pub fn validate(&self) -> Result<()> {
        require("agent id", &self.agent_id)?;
        require("session id", &self.session_id)?;
        require("workspace path", &self.workspace_path.to_string_lossy())?;
        require("git branch", &self.git_branch)?;
        Ok(())
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Context(format!("missing {field}")));
    }
    Ok(())
}

/// Caller request for one conversational turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Prompt text.
    pub prompt: String,
    /// Acting agent.
    pub agent_id: Option<String>,
    /// Session identifier; resumed if known to the runtime, created otherwise.
    pub session_id: Option<String>,
    /// Workspace the runtime operates in.
    pub workspace_path: Option<PathBuf>,
    /// Optional system prompt.
    pub system_prompt: Option<String>,
    /// Permission-mode hint.
    pub permission_mode: Option<PermissionMode>,
    /// Fork this session natively before running the turn.
    pub fork_from: Option<String>,
}

impl GenerateRequest {
    /// Request for `prompt` in `session_id` inside `workspace_path`.
    #[must_use]
    pub fn new(
        prompt: impl Into<String>,
        agent_id: impl Into<String>,
        session_id: impl Into<String>,
        workspace_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            agent_id: Some(agent_id.into()),
            session_id: Some(session_id.into()),
            workspace_path: Some(workspace_path.into()),
            ..Self::default()
        }
    }
}
