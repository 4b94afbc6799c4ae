//! Session summary and session-record change notifications.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of one conversation stored by the agent runtime.
///
/// Identity is the `(workspace_path, id)` pair: the same id may exist in
/// several workspace directories as unrelated sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Runtime-assigned or caller-chosen session identifier.
    pub id: String,
    /// Workspace the session belongs to.
    pub workspace_path: PathBuf,
    /// Branch recorded on the most recent record, if any.
    pub git_branch: Option<String>,
    /// Number of user and assistant records.
    pub message_count: usize,
    /// Timestamp of the first record.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last record.
    pub updated_at: DateTime<Utc>,
    /// Source session when this one was produced by a fork.
    pub parent_session_id: Option<String>,
}

impl Session {
    /// Whether this session was produced by forking another one.
    #[must_use]
    pub fn is_fork(&self) -> bool {
        self.parent_session_id.is_some()
    }
}

/// Kind of change observed on a session record file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// The record file appeared.
    Created,
    /// The record file was written to.
    Updated,
    /// The record file disappeared.
    Deleted,
}

/// Debounced notification that a session record changed on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionChangeEvent {
    /// Classified change.
    pub change_type: ChangeType,
    /// File stem of the record file.
    pub session_id: String,
    /// Absolute path of the record file.
    pub file_path: PathBuf,
    /// Workspace path recovered from the encoded directory name (lossy).
    pub project_path: String,
    /// When the change was classified.
    pub timestamp: DateTime<Utc>,
}
