//! Integration tests for session forking against a real projects root.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use session_relay::errors::AgentErrorKind;
use session_relay::models::query::SessionDirective;
use session_relay::session::fork::{
    AgentKind, ClaudeForkAdapter, ForkRequest, ForkStrategy, SessionForker,
};
use session_relay::session::store::{read_lines, RecordLine, SessionStore};
use session_relay::AppError;

fn forker(store: &SessionStore, native: bool) -> SessionForker {
    let mut forker = SessionForker::new();
    forker.register(std::sync::Arc::new(ClaudeForkAdapter::new(store.clone(), native)));
    forker
}

/// Write a three-line record for `session_id` whose cwd is `workspace`.
fn seed_record(store: &SessionStore, workspace: &Path, session_id: &str) {
    let ws = workspace.to_string_lossy();
    let lines = [
        json!({ "type": "user", "sessionId": session_id, "cwd": ws, "gitBranch": "main",
                "timestamp": "2024-05-01T10:00:00Z",
                "message": { "content": format!("look at {ws}/src/lib.rs") } }),
        json!({ "type": "assistant", "sessionId": session_id, "cwd": ws, "gitBranch": "feature",
                "timestamp": "2024-05-01T10:00:05Z",
                "message": { "content": [
                    { "type": "tool_use", "input": { "file_path": format!("{ws}/src/lib.rs") } }
                ]} }),
        json!({ "type": "summary", "summary": "looked at lib.rs" }),
    ];
    let path = store.record_path(workspace, session_id);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
    std::fs::write(path, body).expect("write record");
}

/// Real path of `path`, as the runtime reports it.
fn real(path: &Path) -> PathBuf {
    path.canonicalize().expect("canonical path")
}

fn cross_request(source: &Path, target: &Path) -> ForkRequest {
    ForkRequest {
        agent_kind: AgentKind::ClaudeCode,
        source_session_id: "abc".into(),
        source_workspace: source.to_path_buf(),
        target_workspace: Some(target.to_path_buf()),
        isolate: false,
    }
}

fn parsed(lines: &[RecordLine]) -> Vec<&Value> {
    lines.iter().filter_map(RecordLine::as_value).collect()
}

// ── Cross-directory ─────────────────────────────────────────────────────────

/// A cross-directory fork keeps the source id and rewrites every path.
#[tokio::test]
async fn cross_directory_fork_rewrites_paths_and_keeps_id() {
    let projects = tempfile::tempdir().expect("projects");
    let source = tempfile::tempdir().expect("source ws");
    let target = tempfile::tempdir().expect("target ws");
    let store = SessionStore::new(projects.path());
    seed_record(&store, source.path(), "abc");

    let outcome = forker(&store, true)
        .fork_session(&ForkRequest {
            agent_kind: AgentKind::ClaudeCode,
            source_session_id: "abc".into(),
            source_workspace: source.path().to_path_buf(),
            target_workspace: Some(target.path().to_path_buf()),
            isolate: false,
        })
        .await
        .expect("valid request")
        .expect("fork succeeds");

    assert_eq!(outcome.strategy, ForkStrategy::RecordCopy);
    assert_eq!(outcome.target_session_id, "abc");
    let target_real = real(target.path());
    assert_eq!(outcome.target_workspace, target_real);
    let record_path = outcome.record_path.expect("record written");
    assert_eq!(record_path, store.record_path(&target_real, "abc"));

    let lines = read_lines(&record_path).expect("read fork");
    let values = parsed(&lines);
    assert_eq!(values.len(), 3);
    let target_ws = target_real.to_string_lossy();
    let source_ws = source.path().to_string_lossy();
    assert_eq!(values[0]["cwd"], &*target_ws);
    assert_eq!(
        values[0]["message"]["content"],
        format!("look at {target_ws}/src/lib.rs")
    );
    assert_eq!(
        values[1]["message"]["content"][0]["input"]["file_path"],
        format!("{target_ws}/src/lib.rs")
    );
    assert_eq!(values[0]["forkedFrom"], "abc");
    assert!(values[2].get("sessionId").is_none(), "no sessionId is invented");
    let raw = std::fs::read_to_string(&record_path).expect("raw fork");
    assert!(!raw.contains(&*source_ws), "no source path survives");

    let index = store.load_index(&target_real).expect("target index");
    let entry = index.get("abc").expect("fork registered");
    assert_eq!(entry.parent_session_id.as_deref(), Some("abc"));
    assert_eq!(entry.message_count, Some(2));
    assert_eq!(entry.git_branch.as_deref(), Some("feature"));

    assert!(
        store.record_path(source.path(), "abc").is_file(),
        "source record is untouched"
    );
}

#[tokio::test]
async fn existing_destination_is_not_overwritten() {
    let projects = tempfile::tempdir().expect("projects");
    let source = tempfile::tempdir().expect("source ws");
    let target = tempfile::tempdir().expect("target ws");
    let store = SessionStore::new(projects.path());
    seed_record(&store, source.path(), "abc");
    seed_record(&store, &real(target.path()), "abc");

    let err = forker(&store, true)
        .fork_session(&ForkRequest {
            agent_kind: AgentKind::ClaudeCode,
            source_session_id: "abc".into(),
            source_workspace: source.path().to_path_buf(),
            target_workspace: Some(target.path().to_path_buf()),
            isolate: false,
        })
        .await
        .expect("valid request")
        .expect_err("destination exists");

    assert_eq!(err.kind, AgentErrorKind::Unknown);
    assert!(err.cause.as_deref().is_some_and(|c| c.contains("already exists")));
}

/// Paths below the source workspace keep their relative part, even when the
/// session had moved into a subdirectory.
#[tokio::test]
async fn subdirectory_paths_keep_their_suffix() {
    let projects = tempfile::tempdir().expect("projects");
    let source = tempfile::tempdir().expect("source ws");
    let target = tempfile::tempdir().expect("target ws");
    let store = SessionStore::new(projects.path());

    let ws = source.path().to_string_lossy();
    let line = json!({ "type": "user", "sessionId": "abc", "cwd": format!("{ws}/crates/core"),
                       "message": { "content": format!("edit {ws}/crates/core/src/lib.rs") } });
    let path = store.record_path(source.path(), "abc");
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(&path, format!("{line}\n")).expect("write record");

    let outcome = forker(&store, true)
        .fork_session(&cross_request(source.path(), target.path()))
        .await
        .expect("valid request")
        .expect("fork succeeds");

    let lines = read_lines(&outcome.record_path.expect("record written")).expect("read fork");
    let value = parsed(&lines)[0];
    let target_ws = real(target.path()).to_string_lossy().into_owned();
    assert_eq!(value["cwd"], format!("{target_ws}/crates/core"));
    assert_eq!(
        value["message"]["content"],
        format!("edit {target_ws}/crates/core/src/lib.rs")
    );
}

/// A symlinked destination is resolved before the record is placed.
#[cfg(unix)]
#[tokio::test]
async fn symlinked_target_resolves_to_real_directory() {
    let projects = tempfile::tempdir().expect("projects");
    let source = tempfile::tempdir().expect("source ws");
    let target = tempfile::tempdir().expect("target ws");
    let links = tempfile::tempdir().expect("link dir");
    let link = links.path().join("ws-link");
    std::os::unix::fs::symlink(target.path(), &link).expect("symlink");
    let store = SessionStore::new(projects.path());
    seed_record(&store, source.path(), "abc");

    let outcome = forker(&store, true)
        .fork_session(&cross_request(source.path(), &link))
        .await
        .expect("valid request")
        .expect("fork succeeds");

    let target_real = real(target.path());
    assert_eq!(outcome.target_workspace, target_real);
    let record_path = outcome.record_path.expect("record written");
    assert_eq!(record_path, store.record_path(&target_real, "abc"));
    assert!(!store.record_path(&link, "abc").exists(), "nothing under the link");

    let lines = read_lines(&record_path).expect("read fork");
    assert_eq!(parsed(&lines)[0]["cwd"], &*target_real.to_string_lossy());
    let index = store.load_index(&target_real).expect("target index");
    assert_eq!(
        index.get("abc").and_then(|e| e.project_path.as_deref()),
        Some(&*target_real.to_string_lossy())
    );
}

/// A destination workspace that does not exist yet is created.
#[tokio::test]
async fn missing_target_workspace_is_created() {
    let projects = tempfile::tempdir().expect("projects");
    let source = tempfile::tempdir().expect("source ws");
    let parent = tempfile::tempdir().expect("target parent");
    let target = parent.path().join("fresh");
    let store = SessionStore::new(projects.path());
    seed_record(&store, source.path(), "abc");

    let outcome = forker(&store, true)
        .fork_session(&cross_request(source.path(), &target))
        .await
        .expect("valid request")
        .expect("fork succeeds");

    assert!(target.is_dir());
    assert_eq!(outcome.target_workspace, real(&target));
}

// ── Same directory ──────────────────────────────────────────────────────────

#[tokio::test]
async fn same_directory_fork_is_native() {
    let projects = tempfile::tempdir().expect("projects");
    let source = tempfile::tempdir().expect("source ws");
    let store = SessionStore::new(projects.path());

    let outcome = forker(&store, true)
        .fork_session(&ForkRequest {
            agent_kind: AgentKind::ClaudeCode,
            source_session_id: "abc".into(),
            source_workspace: source.path().to_path_buf(),
            target_workspace: None,
            isolate: false,
        })
        .await
        .expect("valid request")
        .expect("fork succeeds");

    assert_eq!(outcome.strategy, ForkStrategy::Native);
    assert_eq!(outcome.record_path, None);
    assert_eq!(
        outcome.directive,
        Some(SessionDirective::Resume {
            session_id: "abc".into(),
            fork: true
        })
    );
}

#[tokio::test]
async fn isolated_fork_copies_under_new_id() {
    let projects = tempfile::tempdir().expect("projects");
    let source = tempfile::tempdir().expect("source ws");
    let store = SessionStore::new(projects.path());
    seed_record(&store, source.path(), "abc");

    let outcome = forker(&store, true)
        .fork_session(&ForkRequest {
            agent_kind: AgentKind::ClaudeCode,
            source_session_id: "abc".into(),
            source_workspace: source.path().to_path_buf(),
            target_workspace: Some(source.path().to_path_buf()),
            isolate: true,
        })
        .await
        .expect("valid request")
        .expect("fork succeeds");

    assert_eq!(outcome.strategy, ForkStrategy::RecordCopy);
    assert_ne!(outcome.target_session_id, "abc");
    let lines = read_lines(&outcome.record_path.expect("record written")).expect("read fork");
    assert_eq!(parsed(&lines)[0]["sessionId"], outcome.target_session_id.as_str());
}

// ── Routing ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unsupported_agent_is_a_typed_failure() {
    let projects = tempfile::tempdir().expect("projects");
    let store = SessionStore::new(projects.path());
    let forker = forker(&store, true);
    assert!(!forker.supports(AgentKind::Gemini));

    let err = forker
        .fork_session(&ForkRequest {
            agent_kind: AgentKind::Gemini,
            source_session_id: "abc".into(),
            source_workspace: "/work/repo".into(),
            target_workspace: None,
            isolate: false,
        })
        .await
        .expect("valid request")
        .expect_err("unsupported");
    assert_eq!(err.kind, AgentErrorKind::CapabilityNotSupported);
    assert_eq!(err.message, "forking is not supported for gemini");
}

#[tokio::test]
async fn empty_source_fails_fast() {
    let projects = tempfile::tempdir().expect("projects");
    let store = SessionStore::new(projects.path());

    let result = forker(&store, true)
        .fork_session(&ForkRequest {
            agent_kind: AgentKind::ClaudeCode,
            source_session_id: String::new(),
            source_workspace: "/work/repo".into(),
            target_workspace: None,
            isolate: false,
        })
        .await;
    assert!(matches!(result, Err(AppError::Context(_))));
}

#[tokio::test]
async fn missing_source_record_fails() {
    let projects = tempfile::tempdir().expect("projects");
    let source = tempfile::tempdir().expect("source ws");
    let target = tempfile::tempdir().expect("target ws");
    let store = SessionStore::new(projects.path());

    let err = forker(&store, false)
        .fork_session(&ForkRequest {
            agent_kind: AgentKind::ClaudeCode,
            source_session_id: "ghost".into(),
            source_workspace: source.path().to_path_buf(),
            target_workspace: Some(target.path().to_path_buf()),
            isolate: false,
        })
        .await
        .expect("valid request")
        .expect_err("no source record");
    assert_eq!(err.message, "session fork failed");
    assert!(!store.record_path(target.path(), "ghost").exists());
}
