//! Integration tests for the CLI executor against a stand-in shell process.
//!
//! The stand-in ignores the generated agent flags, records its pid, prints
//! stream-JSON lines and then idles, so the tests can observe whether the
//! child is torn down.

#![cfg(target_os = "linux")]

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use session_relay::config::ExecutorConfig;
use session_relay::errors::AgentErrorKind;
use session_relay::executor::cli::CliExecutor;
use session_relay::executor::{ExecutorMessage, QueryExecutor, QueryInvocation};
use session_relay::models::query::QueryOptions;
use tokio_util::sync::CancellationToken;

use super::test_helpers::wait_until;

const INIT_LINE: &str = r#"{"type":"system","subtype":"init","session_id":"s-1"}"#;

/// Executor running `sh -c <script>`; the agent flags land in `$0..$n`.
fn shell_executor(script: String) -> CliExecutor {
    CliExecutor::new(ExecutorConfig {
        host_cli: "sh".into(),
        host_cli_args: vec!["-c".into(), script, "agent".into()],
        include_partial_messages: false,
    })
}

/// Init line, a pause, a second init line, then idle for a long time.
fn chatty_then_idle(pid_file: &Path) -> String {
    format!(
        "echo $$ > '{pid}'; echo '{INIT_LINE}'; sleep 0.3; echo '{INIT_LINE}'; exec sleep 30",
        pid = pid_file.display()
    )
}

fn invocation(cwd: &Path, cancel: CancellationToken) -> QueryInvocation {
    QueryInvocation {
        prompt: "hi".into(),
        options: QueryOptions::new(cwd),
        cancel,
        permissions: None,
    }
}

fn process_path(pid_file: &Path) -> PathBuf {
    let pid = std::fs::read_to_string(pid_file).expect("pid written");
    PathBuf::from(format!("/proc/{}", pid.trim()))
}

async fn exited(proc_dir: &Path) -> bool {
    for _ in 0..5 {
        if wait_until(|| !proc_dir.exists()).await {
            return true;
        }
    }
    false
}

// ── Teardown ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn dropped_stream_kills_the_process() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pid_file = dir.path().join("agent.pid");
    let executor = shell_executor(chatty_then_idle(&pid_file));

    let mut stream = executor.query(invocation(dir.path(), CancellationToken::new()));
    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("first line in time")
        .expect("stream open")
        .expect("init parses");
    assert!(matches!(first, ExecutorMessage::System { ref session_id } if session_id == "s-1"));

    let proc_dir = process_path(&pid_file);
    drop(stream);

    assert!(
        exited(&proc_dir).await,
        "agent process is killed once the next line finds no consumer"
    );
}

#[tokio::test]
async fn cancellation_kills_the_process_and_reports_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pid_file = dir.path().join("agent.pid");
    let executor = shell_executor(chatty_then_idle(&pid_file));
    let cancel = CancellationToken::new();

    let mut stream = executor.query(invocation(dir.path(), cancel.clone()));
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("first line in time")
        .expect("stream open")
        .expect("init parses");
    let proc_dir = process_path(&pid_file);

    cancel.cancel();
    let mut killed = false;
    while let Some(item) = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("stream ends in time")
    {
        if let Err(err) = item {
            assert_eq!(err.kind, AgentErrorKind::ProcessKilled);
            killed = true;
        }
    }
    assert!(killed, "cancellation is reported as process-killed");
    assert!(exited(&proc_dir).await, "agent process is gone");
}

#[tokio::test]
async fn missing_binary_is_a_spawn_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let executor = CliExecutor::new(ExecutorConfig {
        host_cli: dir.path().join("no-such-agent").to_string_lossy().into_owned(),
        ..ExecutorConfig::default()
    });

    let mut stream = executor.query(invocation(dir.path(), CancellationToken::new()));
    let err = stream
        .next()
        .await
        .expect("one item")
        .expect_err("spawn fails");
    assert_eq!(err.kind, AgentErrorKind::ProcessSpawnFailed);
}
