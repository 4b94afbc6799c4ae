//! Read-only view over stored sessions.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::session::Session;
use crate::session::store::{read_lines, RecordLine, SessionStore, SessionsIndex, RECORD_EXTENSION};
use crate::{AppError, Result};

/// Lists and reads the session records of a workspace.
#[derive(Debug, Clone)]
pub struct SessionHistory {
    store: SessionStore,
}

impl SessionHistory {
    /// History reader over `store`.
    #[must_use]
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Every session of `workspace`, most recently updated first.
    ///
    /// A record that cannot be read is skipped with a warning; a workspace
    /// without a project directory has no sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` only if the directory listing itself fails.
    pub fn list_sessions(&self, workspace: &Path) -> Result<Vec<Session>> {
        let project_dir = self.store.project_dir(workspace);
        if !project_dir.is_dir() {
            debug!(workspace = %workspace.display(), "no project directory");
            return Ok(Vec::new());
        }

        let pattern = format!(
            "{}/*.{RECORD_EXTENSION}",
            glob::Pattern::escape(&project_dir.to_string_lossy())
        );
        let paths = glob::glob(&pattern)
            .map_err(|err| AppError::Io(format!("invalid session listing pattern: {err}")))?;

        let index = self.store.load_index(workspace).unwrap_or_else(|err| {
            warn!(%err, workspace = %workspace.display(), "ignoring unreadable session index");
            SessionsIndex::default()
        });

        let mut sessions = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(err) => {
                    warn!(%err, "skipping unreadable session path");
                    continue;
                }
            };
            match summarize(&path, workspace, &index) {
                Ok(session) => sessions.push(session),
                Err(err) => warn!(%err, path = %path.display(), "skipping session record"),
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    /// Every line of the record of `session_id` in `workspace`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session has no record.
    pub fn read_records(&self, workspace: &Path, session_id: &str) -> Result<Vec<RecordLine>> {
        read_lines(&self.resolve_record(workspace, session_id))
    }

    /// Whether `session_id` has a record in `workspace`.
    #[must_use]
    pub fn session_exists(&self, workspace: &Path, session_id: &str) -> bool {
        self.resolve_record(workspace, session_id).is_file()
    }

    fn resolve_record(&self, workspace: &Path, session_id: &str) -> PathBuf {
        let direct = self.store.record_path(workspace, session_id);
        if direct.is_file() {
            return direct;
        }
        self.store
            .load_index(workspace)
            .ok()
            .and_then(|index| index.get(session_id).and_then(|e| e.full_path.clone()))
            .map_or(direct, PathBuf::from)
    }
}

fn summarize(path: &Path, workspace: &Path, index: &SessionsIndex) -> Result<Session> {
    let id = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| AppError::Io(format!("no session id in {}", path.display())))?
        .to_owned();

    let lines = read_lines(path)?;

    let mut message_count = 0;
    let mut git_branch = None;
    let mut forked_from = None;
    let mut first: Option<DateTime<Utc>> = None;
    let mut last: Option<DateTime<Utc>> = None;

    for value in lines.iter().filter_map(RecordLine::as_value) {
        if matches!(
            value.get("type").and_then(Value::as_str),
            Some("user" | "assistant")
        ) {
            message_count += 1;
        }
        if let Some(branch) = value.get("gitBranch").and_then(Value::as_str) {
            git_branch = Some(branch.to_owned());
        }
        if forked_from.is_none() {
            forked_from = value
                .get("forkedFrom")
                .and_then(Value::as_str)
                .map(str::to_owned);
        }
        if let Some(ts) = value
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        {
            let ts = ts.with_timezone(&Utc);
            first = Some(first.map_or(ts, |f| f.min(ts)));
            last = Some(last.map_or(ts, |l| l.max(ts)));
        }
    }

    let (created_at, updated_at) = match (first, last) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            let modified = std::fs::metadata(path)
                .and_then(|meta| meta.modified())
                .map_err(|err| AppError::Io(format!("stat {}: {err}", path.display())))?;
            let modified = DateTime::<Utc>::from(modified);
            (modified, modified)
        }
    };

    let parent_session_id = index
        .get(&id)
        .and_then(|entry| entry.parent_session_id.clone())
        .or(forked_from);

    Ok(Session {
        id,
        workspace_path: workspace.to_path_buf(),
        git_branch,
        message_count,
        created_at,
        updated_at,
        parent_session_id,
    })
}
