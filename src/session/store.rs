//! On-disk session records and the per-project session index.
//!
//! Layout under the projects root:
//!
//! ```text
//! <projects_root>/<encoded workspace>/<session id>.jsonl
//! <projects_root>/<encoded workspace>/sessions-index.json
//! ```
//!
//! Record files are newline-delimited JSON. Lines that fail to parse are kept
//! as [`RecordLine::Opaque`] and written back byte-for-byte.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::session::encoding::encode_workspace_path;
use crate::{AppError, Result};

/// File name of the per-project session index.
pub const INDEX_FILE_NAME: &str = "sessions-index.json";

/// Extension of session record files.
pub const RECORD_EXTENSION: &str = "jsonl";

/// One line of a session record file.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordLine {
    /// A line that parsed as JSON.
    Parsed(Value),
    /// A line that did not parse; preserved verbatim.
    Opaque(String),
}

impl RecordLine {
    /// Classify a raw line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        match serde_json::from_str(line) {
            Ok(value) => Self::Parsed(value),
            Err(_) => Self::Opaque(line.to_owned()),
        }
    }

    /// Parsed value, if any.
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Parsed(value) => Some(value),
            Self::Opaque(_) => None,
        }
    }

    fn render(&self) -> Result<String> {
        match self {
            Self::Parsed(value) => Ok(serde_json::to_string(value)?),
            Self::Opaque(line) => Ok(line.clone()),
        }
    }
}

/// Entry of `sessions-index.json`. Unknown fields survive a rewrite.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// Session identifier.
    pub session_id: String,
    /// Absolute path of the record file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
    /// Workspace the session belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    /// Branch recorded for the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    /// Number of user and assistant records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<usize>,
    /// Creation time (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Last modification time (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    /// Session this one was forked from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn index_version() -> u32 {
    1
}

/// Contents of `sessions-index.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionsIndex {
    /// Format version.
    #[serde(default = "index_version")]
    pub version: u32,
    /// Registered sessions.
    #[serde(default)]
    pub entries: Vec<IndexEntry>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SessionsIndex {
    fn default() -> Self {
        Self {
            version: index_version(),
            entries: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl SessionsIndex {
    /// Entry for `session_id`, if registered.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.session_id == session_id)
    }

    /// Insert `entry`, replacing any entry with the same session id.
    pub fn upsert(&mut self, entry: IndexEntry) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.session_id == entry.session_id)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }
}

/// Path arithmetic and raw file access for session records.
#[derive(Debug, Clone)]
pub struct SessionStore {
    projects_root: PathBuf,
}

impl SessionStore {
    /// Store rooted at `projects_root`.
    #[must_use]
    pub fn new(projects_root: impl Into<PathBuf>) -> Self {
        Self {
            projects_root: projects_root.into(),
        }
    }

    /// Root directory holding one directory per workspace.
    #[must_use]
    pub fn projects_root(&self) -> &Path {
        &self.projects_root
    }

    /// Directory holding the records of `workspace`.
    #[must_use]
    pub fn project_dir(&self, workspace: &Path) -> PathBuf {
        self.projects_root.join(encode_workspace_path(workspace))
    }

    /// Record file of `session_id` in `workspace`.
    #[must_use]
    pub fn record_path(&self, workspace: &Path, session_id: &str) -> PathBuf {
        self.project_dir(workspace)
            .join(format!("{session_id}.{RECORD_EXTENSION}"))
    }

    /// Index file of `workspace`.
    #[must_use]
    pub fn index_path(&self, workspace: &Path) -> PathBuf {
        self.project_dir(workspace).join(INDEX_FILE_NAME)
    }

    /// Load the index of `workspace`; a missing file is an empty index.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` or `AppError::Serialization` when the file
    /// exists but cannot be read or parsed.
    pub fn load_index(&self, workspace: &Path) -> Result<SessionsIndex> {
        let path = self.index_path(workspace);
        match std::fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).map_err(|err| {
                AppError::Serialization(format!("invalid index {}: {err}", path.display()))
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(SessionsIndex::default()),
            Err(err) => Err(AppError::Io(format!(
                "failed to read index {}: {err}",
                path.display()
            ))),
        }
    }

    /// Upsert `entry` into the index of `workspace`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` or `AppError::Serialization` if the index
    /// cannot be read or rewritten.
    pub fn register_in_index(&self, workspace: &Path, entry: IndexEntry) -> Result<()> {
        let mut index = self.load_index(workspace)?;
        let session_id = entry.session_id.clone();
        index.upsert(entry);
        let data = serde_json::to_string_pretty(&index)?;
        write_atomic(&self.index_path(workspace), data.as_bytes())?;
        debug!(session_id, workspace = %workspace.display(), "session registered in index");
        Ok(())
    }
}

/// Read every non-blank line of a record file.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the file does not exist and
/// `AppError::Io` for other read failures.
pub fn read_lines(path: &Path) -> Result<Vec<RecordLine>> {
    let data = std::fs::read_to_string(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound(format!("session record {}", path.display()))
        } else {
            AppError::Io(format!("failed to read {}: {err}", path.display()))
        }
    })?;
    Ok(data
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(RecordLine::parse)
        .collect())
}

/// Write `lines` to `path` through a temporary file in the same directory.
///
/// # Errors
///
/// Returns `AppError::Io` on any file-system failure.
pub fn write_lines(path: &Path, lines: &[RecordLine]) -> Result<()> {
    let mut buf = String::new();
    for line in lines {
        buf.push_str(&line.render()?);
        buf.push('\n');
    }
    write_atomic(path, buf.as_bytes())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| AppError::Io(format!("{} has no parent directory", path.display())))?;
    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::Io(format!("failed to create {}: {err}", parent.display()))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;
    tmp.write_all(bytes)
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;
    tmp.persist(path).map_err(|err| {
        AppError::Io(format!("failed to persist {}: {err}", path.display()))
    })?;
    Ok(())
}
