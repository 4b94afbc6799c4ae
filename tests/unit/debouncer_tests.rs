//! Unit tests for per-file change debouncing.
//!
//! Instants are passed explicitly, so no real waiting is involved.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use session_relay::models::session::{ChangeType, SessionChangeEvent};
use session_relay::session::debounce::{DebounceKey, Debouncer};
use tokio::time::Instant;

fn debouncer() -> Debouncer {
    Debouncer::new(Duration::from_millis(300), Duration::from_millis(1000))
}

fn change(session_id: &str, change_type: ChangeType) -> SessionChangeEvent {
    SessionChangeEvent {
        change_type,
        session_id: session_id.into(),
        file_path: PathBuf::from(format!("/projects/-repo/{session_id}.jsonl")),
        project_path: "/repo".into(),
        timestamp: Utc::now(),
    }
}

fn key(session_id: &str) -> DebounceKey {
    DebounceKey::new("/projects", session_id)
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

// ── Bursts ──────────────────────────────────────────────────────────────────

/// Ten writes 50 ms apart collapse into one update after the quiet period.
#[test]
fn burst_collapses_into_single_update() {
    let mut debouncer = debouncer();
    let start = Instant::now();

    for i in 0..10 {
        let emitted =
            debouncer.on_notification(key("s1"), change("s1", ChangeType::Updated), start + ms(i * 50));
        assert!(emitted.is_none(), "no emission inside the burst");
    }

    assert_eq!(debouncer.next_deadline(), Some(start + ms(750)));
    assert!(debouncer.drain_due(start + ms(700)).is_empty());

    let due = debouncer.drain_due(start + ms(750));
    assert_eq!(due.len(), 1, "exactly one event for the burst");
    assert_eq!(due[0].change_type, ChangeType::Updated);
    assert_eq!(due[0].session_id, "s1");
    assert_eq!(debouncer.pending_len(), 0);
}

/// A continuous stream surfaces once the burst reaches the maximum wait.
#[test]
fn continuous_stream_is_capped_at_max_wait() {
    let mut debouncer = debouncer();
    let start = Instant::now();

    let mut emitted = None;
    for i in 0..=10 {
        emitted =
            debouncer.on_notification(key("s1"), change("s1", ChangeType::Updated), start + ms(i * 100));
        if emitted.is_some() {
            assert_eq!(i, 10, "emission happens at the maximum wait");
        }
    }

    assert!(emitted.is_some(), "stream emits within max wait");
    assert_eq!(debouncer.pending_len(), 0);
}

#[test]
fn deadline_never_passes_max_wait() {
    let mut debouncer = debouncer();
    let start = Instant::now();

    debouncer.on_notification(key("s1"), change("s1", ChangeType::Updated), start);
    debouncer.on_notification(key("s1"), change("s1", ChangeType::Updated), start + ms(900));

    assert_eq!(debouncer.next_deadline(), Some(start + ms(1000)));
}

// ── Merging ─────────────────────────────────────────────────────────────────

#[test]
fn pending_creation_is_not_downgraded() {
    let mut debouncer = debouncer();
    let start = Instant::now();

    debouncer.on_notification(key("s1"), change("s1", ChangeType::Created), start);
    debouncer.on_notification(key("s1"), change("s1", ChangeType::Updated), start + ms(10));

    let due = debouncer.drain_due(start + ms(1000));
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].change_type, ChangeType::Created);
}

#[test]
fn latest_classification_wins_otherwise() {
    let mut debouncer = debouncer();
    let start = Instant::now();

    debouncer.on_notification(key("s1"), change("s1", ChangeType::Created), start);
    debouncer.on_notification(key("s1"), change("s1", ChangeType::Deleted), start + ms(10));

    let due = debouncer.drain_due(start + ms(1000));
    assert_eq!(due[0].change_type, ChangeType::Deleted);
}

// ── Keys ────────────────────────────────────────────────────────────────────

#[test]
fn keys_are_independent() {
    let mut debouncer = debouncer();
    let start = Instant::now();

    debouncer.on_notification(key("a"), change("a", ChangeType::Updated), start);
    debouncer.on_notification(key("b"), change("b", ChangeType::Updated), start + ms(100));
    debouncer.on_notification(
        DebounceKey::new("/other-root", "a"),
        change("a", ChangeType::Updated),
        start + ms(200),
    );
    assert_eq!(debouncer.pending_len(), 3);

    let due = debouncer.drain_due(start + ms(400));
    let ids: Vec<&str> = due.iter().map(|e| e.session_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"], "due events come out earliest first");
    assert_eq!(debouncer.pending_len(), 1);
}

#[test]
fn empty_debouncer_has_no_deadline() {
    let mut debouncer = debouncer();
    assert_eq!(debouncer.next_deadline(), None);

    debouncer.on_notification(key("s1"), change("s1", ChangeType::Updated), Instant::now());
    debouncer.clear();
    assert_eq!(debouncer.next_deadline(), None);
}
