//! Session forking.
//!
//! A fork produces a new session that starts from another session's
//! history. Two strategies exist:
//!
//! - **Native**: same directory, no isolation, and the runtime can fork on
//!   resume. Nothing is written; the outcome carries a resume+fork directive.
//! - **Record copy**: the source record is copied into the destination
//!   project directory with every occurrence of the source working directory
//!   rewritten, then registered in the destination index. Cross-directory
//!   forks keep the source id; same-directory copies get a fresh id.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::errors::{AgentError, AgentErrorKind, AgentResult};
use crate::models::query::SessionDirective;
use crate::session::encoding::canonicalize_or_fallback;
use crate::session::store::{read_lines, write_lines, IndexEntry, RecordLine, SessionStore};
use crate::{AppError, Result};

/// Agent runtimes a fork may target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    /// Claude Code CLI.
    ClaudeCode,
    /// OpenAI Codex CLI.
    Codex,
    /// Gemini CLI.
    Gemini,
}

impl AgentKind {
    /// Stable label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude-code",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }
}

/// What to fork and where.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ForkRequest {
    /// Runtime that owns the source session.
    pub agent_kind: AgentKind,
    /// Session to fork.
    pub source_session_id: String,
    /// Workspace of the source session.
    pub source_workspace: PathBuf,
    /// Destination workspace; the source workspace when absent.
    pub target_workspace: Option<PathBuf>,
    /// Require an independent copy even within the same directory.
    #[serde(default)]
    pub isolate: bool,
}

/// How a fork was carried out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ForkStrategy {
    /// Delegated to the runtime's resume+fork primitive.
    Native,
    /// The session record was copied and rewritten.
    RecordCopy,
}

/// Result of a successful fork.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ForkOutcome {
    /// Session id to use for the forked conversation.
    pub target_session_id: String,
    /// Workspace the forked conversation lives in.
    pub target_workspace: PathBuf,
    /// Strategy used.
    pub strategy: ForkStrategy,
    /// Written record file (record copy only).
    pub record_path: Option<PathBuf>,
    /// Directive the next query must carry (native only).
    pub directive: Option<SessionDirective>,
}

/// Per-runtime fork implementation.
pub trait ForkAdapter: Send + Sync {
    /// Runtime this adapter serves.
    fn kind(&self) -> AgentKind;

    /// Carry out `request`.
    ///
    /// # Errors
    ///
    /// Returns an `AppError` for any file-system failure.
    fn fork<'a>(
        &'a self,
        request: &'a ForkRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ForkOutcome>> + Send + 'a>>;
}

/// Fork adapter for Claude Code session records.
#[derive(Debug, Clone)]
pub struct ClaudeForkAdapter {
    store: SessionStore,
    native: bool,
}

impl ClaudeForkAdapter {
    /// Adapter over `store`; `native` enables the resume+fork strategy.
    #[must_use]
    pub fn new(store: SessionStore, native: bool) -> Self {
        Self { store, native }
    }

    async fn run(&self, request: &ForkRequest) -> Result<ForkOutcome> {
        let source = request.source_workspace.clone();
        let target = match request.target_workspace {
            Some(ref target) => resolve_target(target).await?,
            None => source.clone(),
        };
        let cross_directory = canonicalize_or_fallback(&source) != canonicalize_or_fallback(&target);

        if !cross_directory && !request.isolate && self.native {
            info!(strategy = "native", "forking through runtime");
            return Ok(ForkOutcome {
                target_session_id: request.source_session_id.clone(),
                target_workspace: target,
                strategy: ForkStrategy::Native,
                record_path: None,
                directive: Some(SessionDirective::Resume {
                    session_id: request.source_session_id.clone(),
                    fork: true,
                }),
            });
        }

        let target_session_id = if cross_directory {
            request.source_session_id.clone()
        } else {
            Uuid::new_v4().to_string()
        };

        let store = self.store.clone();
        let source_session_id = request.source_session_id.clone();
        let copy_target_id = target_session_id.clone();
        let copy_target = target.clone();
        let record_path = tokio::task::spawn_blocking(move || {
            copy_record(
                &store,
                &source_session_id,
                &source,
                &copy_target_id,
                &copy_target,
            )
        })
        .await
        .map_err(|err| AppError::Io(format!("fork task failed: {err}")))??;

        info!(
            strategy = "record_copy",
            target_session_id,
            path = %record_path.display(),
            "session record copied"
        );

        Ok(ForkOutcome {
            target_session_id,
            target_workspace: target,
            strategy: ForkStrategy::RecordCopy,
            record_path: Some(record_path),
            directive: None,
        })
    }
}

impl ForkAdapter for ClaudeForkAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::ClaudeCode
    }

    fn fork<'a>(
        &'a self,
        request: &'a ForkRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ForkOutcome>> + Send + 'a>> {
        Box::pin(self.run(request))
    }
}

/// Routes fork requests to the adapter of their runtime.
#[derive(Default)]
pub struct SessionForker {
    adapters: HashMap<AgentKind, Arc<dyn ForkAdapter>>,
}

impl SessionForker {
    /// Forker without adapters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` for its runtime, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ForkAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    /// Whether a runtime can be forked.
    #[must_use]
    pub fn supports(&self, kind: AgentKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    /// Fork according to `request`.
    ///
    /// # Errors
    ///
    /// The outer error is `AppError::Context` for a request without a source
    /// session or workspace. A missing adapter yields
    /// `capability-not-supported`; file-system failures yield `unknown` with
    /// the underlying cause attached.
    pub async fn fork_session(&self, request: &ForkRequest) -> Result<AgentResult<ForkOutcome>> {
        if request.source_session_id.trim().is_empty() {
            return Err(AppError::Context("missing source session id".into()));
        }
        if request.source_workspace.as_os_str().is_empty() {
            return Err(AppError::Context("missing source workspace".into()));
        }

        let Some(adapter) = self.adapters.get(&request.agent_kind) else {
            return Ok(Err(AgentError::new(
                AgentErrorKind::CapabilityNotSupported,
                format!("forking is not supported for {}", request.agent_kind.as_str()),
            )));
        };

        let span = info_span!(
            "fork_session",
            agent = request.agent_kind.as_str(),
            source_session_id = %request.source_session_id,
        );
        let outcome = adapter.fork(request).instrument(span).await;
        Ok(outcome.map_err(|err| AgentError::unknown("session fork failed").with_cause(err)))
    }
}

fn copy_record(
    store: &SessionStore,
    source_session_id: &str,
    source_workspace: &Path,
    target_session_id: &str,
    target_workspace: &Path,
) -> Result<PathBuf> {
    let source_path = store.record_path(source_workspace, source_session_id);
    let target_path = store.record_path(target_workspace, target_session_id);
    if target_path.exists() {
        return Err(AppError::Io(format!(
            "destination record {} already exists",
            target_path.display()
        )));
    }

    let target_str = target_workspace.to_string_lossy().into_owned();
    let mut from = vec![source_workspace.to_string_lossy().into_owned()];
    let canonical = canonicalize_or_fallback(source_workspace)
        .to_string_lossy()
        .into_owned();
    if !from.contains(&canonical) {
        from.push(canonical);
    }

    let mut git_branch = None;
    let mut message_count = 0;
    let mut lines = read_lines(&source_path)?;
    for line in &mut lines {
        let RecordLine::Parsed(value) = line else {
            continue;
        };
        rewrite_strings(value, &from, &target_str);

        if let Value::Object(map) = value {
            if map.contains_key("sessionId") {
                map.insert("sessionId".into(), Value::String(target_session_id.to_owned()));
            }
            map.insert(
                "forkedFrom".into(),
                Value::String(source_session_id.to_owned()),
            );
            if matches!(
                map.get("type").and_then(Value::as_str),
                Some("user" | "assistant")
            ) {
                message_count += 1;
            }
            if let Some(branch) = map.get("gitBranch").and_then(Value::as_str) {
                git_branch = Some(branch.to_owned());
            }
        }
    }

    write_lines(&target_path, &lines)?;

    let now = Utc::now().to_rfc3339();
    store.register_in_index(
        target_workspace,
        IndexEntry {
            session_id: target_session_id.to_owned(),
            full_path: Some(target_path.to_string_lossy().into_owned()),
            project_path: Some(target_str),
            git_branch,
            message_count: Some(message_count),
            created: Some(now.clone()),
            modified: Some(now),
            parent_session_id: Some(source_session_id.to_owned()),
            ..IndexEntry::default()
        },
    )?;

    Ok(target_path)
}

/// Replace every occurrence of any of `from` with `to` in all strings of
/// `value`, descending into arrays and objects.
///
/// Each string is scanned once, longest needle first at every position, so
/// a replacement is never rewritten again.
pub fn rewrite_strings(value: &mut Value, from: &[String], to: &str) {
    let mut needles: Vec<&str> = from
        .iter()
        .map(String::as_str)
        .filter(|n| !n.is_empty())
        .collect();
    needles.sort_by_key(|n| std::cmp::Reverse(n.len()));
    rewrite_with(value, &needles, to);
}

fn rewrite_with(value: &mut Value, needles: &[&str], to: &str) {
    match value {
        Value::String(s) => {
            if let Some(rewritten) = replace_any(s, needles, to) {
                *s = rewritten;
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_with(item, needles, to);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                rewrite_with(item, needles, to);
            }
        }
        _ => {}
    }
}

fn replace_any(text: &str, needles: &[&str], to: &str) -> Option<String> {
    if !needles.iter().any(|n| text.contains(n)) {
        return None;
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    'scan: while let Some(ch) = rest.chars().next() {
        for needle in needles {
            if let Some(tail) = rest.strip_prefix(needle) {
                out.push_str(to);
                rest = tail;
                continue 'scan;
            }
        }
        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    Some(out)
}

/// Create the destination workspace if needed and resolve it to the real
/// path the runtime will report as its working directory.
async fn resolve_target(target: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(target).await.map_err(|err| {
        AppError::Io(format!(
            "cannot create fork destination {}: {err}",
            target.display()
        ))
    })?;
    Ok(canonicalize_or_fallback(target))
}
