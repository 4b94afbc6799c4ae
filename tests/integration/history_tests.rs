//! Integration tests for session listing and history reads.

use std::path::Path;

use serde_json::json;
use session_relay::session::history::SessionHistory;
use session_relay::session::store::{IndexEntry, SessionStore};
use session_relay::AppError;

fn write_record(store: &SessionStore, workspace: &Path, session_id: &str, lines: &[serde_json::Value]) {
    let path = store.record_path(workspace, session_id);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
    std::fs::write(path, body).expect("write record");
}

fn turn(kind: &str, timestamp: &str) -> serde_json::Value {
    json!({ "type": kind, "timestamp": timestamp, "gitBranch": "main" })
}

#[test]
fn sessions_are_listed_newest_first() {
    let projects = tempfile::tempdir().expect("projects");
    let workspace = Path::new("/work/repo");
    let store = SessionStore::new(projects.path());

    write_record(
        &store,
        workspace,
        "old",
        &[turn("user", "2024-01-01T09:00:00Z"), turn("assistant", "2024-01-01T09:01:00Z")],
    );
    write_record(
        &store,
        workspace,
        "new",
        &[
            turn("user", "2024-06-01T09:00:00Z"),
            json!({ "type": "summary" }),
            turn("assistant", "2024-06-01T09:05:00Z"),
            turn("user", "2024-06-01T09:06:00Z"),
        ],
    );

    let sessions = SessionHistory::new(store).list_sessions(workspace).expect("list");
    let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["new", "old"]);

    let newest = &sessions[0];
    assert_eq!(newest.message_count, 3);
    assert_eq!(newest.git_branch.as_deref(), Some("main"));
    assert_eq!(newest.created_at.to_rfc3339(), "2024-06-01T09:00:00+00:00");
    assert_eq!(newest.updated_at.to_rfc3339(), "2024-06-01T09:06:00+00:00");
    assert_eq!(newest.workspace_path, workspace);
    assert!(!newest.is_fork());
}

/// One unreadable record does not abort the listing.
#[test]
fn unreadable_record_is_skipped() {
    let projects = tempfile::tempdir().expect("projects");
    let workspace = Path::new("/work/repo");
    let store = SessionStore::new(projects.path());

    write_record(&store, workspace, "good", &[turn("user", "2024-06-01T09:00:00Z")]);
    std::fs::write(store.record_path(workspace, "bad"), [0xff, 0xfe, 0x00, b'\n'])
        .expect("write invalid utf-8");

    let sessions = SessionHistory::new(store).list_sessions(workspace).expect("list");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, "good");
}

#[test]
fn corrupt_lines_still_count_the_rest() {
    let projects = tempfile::tempdir().expect("projects");
    let workspace = Path::new("/work/repo");
    let store = SessionStore::new(projects.path());
    let path = store.record_path(workspace, "mixed");
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(
        &path,
        "{\"type\":\"user\",\"timestamp\":\"2024-06-01T09:00:00Z\"}\n{truncated\n",
    )
    .expect("write record");

    let sessions = SessionHistory::new(store).list_sessions(workspace).expect("list");
    assert_eq!(sessions[0].message_count, 1);
}

#[test]
fn missing_project_directory_has_no_sessions() {
    let projects = tempfile::tempdir().expect("projects");
    let history = SessionHistory::new(SessionStore::new(projects.path()));
    assert!(history
        .list_sessions(Path::new("/never/used"))
        .expect("list")
        .is_empty());
}

#[test]
fn parent_comes_from_index_then_record() {
    let projects = tempfile::tempdir().expect("projects");
    let workspace = Path::new("/work/repo");
    let store = SessionStore::new(projects.path());

    write_record(&store, workspace, "indexed", &[turn("user", "2024-06-01T09:00:00Z")]);
    write_record(
        &store,
        workspace,
        "marked",
        &[json!({ "type": "user", "timestamp": "2024-05-01T09:00:00Z", "forkedFrom": "root-2" })],
    );
    store
        .register_in_index(
            workspace,
            IndexEntry {
                session_id: "indexed".into(),
                parent_session_id: Some("root-1".into()),
                ..IndexEntry::default()
            },
        )
        .expect("register");

    let sessions = SessionHistory::new(store).list_sessions(workspace).expect("list");
    let parent = |id: &str| {
        sessions
            .iter()
            .find(|s| s.id == id)
            .and_then(|s| s.parent_session_id.clone())
    };
    assert_eq!(parent("indexed").as_deref(), Some("root-1"));
    assert_eq!(parent("marked").as_deref(), Some("root-2"));
}

#[test]
fn records_resolve_through_index_full_path() {
    let projects = tempfile::tempdir().expect("projects");
    let elsewhere = tempfile::tempdir().expect("elsewhere");
    let workspace = Path::new("/work/repo");
    let store = SessionStore::new(projects.path());

    let moved = elsewhere.path().join("moved.jsonl");
    std::fs::write(&moved, "{\"type\":\"user\"}\n").expect("write moved record");
    store
        .register_in_index(
            workspace,
            IndexEntry {
                session_id: "moved".into(),
                full_path: Some(moved.to_string_lossy().into_owned()),
                ..IndexEntry::default()
            },
        )
        .expect("register");

    let history = SessionHistory::new(store);
    assert!(history.session_exists(workspace, "moved"));
    assert_eq!(history.read_records(workspace, "moved").expect("read").len(), 1);
    assert!(matches!(
        history.read_records(workspace, "ghost"),
        Err(AppError::NotFound(_))
    ));
}
