//! Unit tests for TOML configuration parsing and validation.

use std::io::Write;
use std::path::PathBuf;

use serial_test::serial;
use session_relay::{config::GlobalConfig, AppError};

fn sample_toml() -> &'static str {
    r#"
projects_root = "/srv/agent/projects"
default_agent_id = "planner"

[executor]
host_cli = "claude-dev"
host_cli_args = ["--model", "sonnet"]
include_partial_messages = false

[watcher]
debounce_ms = 200
max_debounce_ms = 800

[dispatcher]
stale_grace_ms = 2500
seen_capacity = 64
seen_retain = 32

[fork]
native = false
"#
}

#[test]
fn empty_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("empty config is valid");
    assert_eq!(config, GlobalConfig::default());
    assert_eq!(config.default_agent_id, "claude-code");
    assert_eq!(config.executor.host_cli, "claude");
    assert!(config.executor.include_partial_messages);
    assert_eq!(config.watcher.debounce_ms, 300);
    assert_eq!(config.watcher.max_debounce_ms, 1000);
    assert_eq!(config.dispatcher.stale_grace_ms, 1000);
    assert_eq!(config.dispatcher.seen_capacity, 1000);
    assert_eq!(config.dispatcher.seen_retain, 500);
    assert!(config.fork.native);
}

#[test]
fn full_config_parses_every_section() {
    let config = GlobalConfig::from_toml_str(sample_toml()).expect("valid config");
    assert_eq!(
        config.projects_root,
        Some(PathBuf::from("/srv/agent/projects"))
    );
    assert_eq!(config.default_agent_id, "planner");
    assert_eq!(config.executor.host_cli, "claude-dev");
    assert_eq!(config.executor.host_cli_args, vec!["--model", "sonnet"]);
    assert!(!config.executor.include_partial_messages);
    assert_eq!(config.watcher.debounce_ms, 200);
    assert_eq!(config.dispatcher.seen_retain, 32);
    assert!(!config.fork.native);
}

#[test]
fn zero_debounce_is_rejected() {
    let err = GlobalConfig::from_toml_str("[watcher]\ndebounce_ms = 0\n").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("debounce_ms")));
}

#[test]
fn max_debounce_below_debounce_is_rejected() {
    let err = GlobalConfig::from_toml_str("[watcher]\ndebounce_ms = 500\nmax_debounce_ms = 100\n")
        .unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("max_debounce_ms")));
}

#[test]
fn seen_retain_must_be_below_capacity() {
    let err = GlobalConfig::from_toml_str("[dispatcher]\nseen_capacity = 10\nseen_retain = 10\n")
        .unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("seen_retain")));
}

#[test]
fn empty_host_cli_is_rejected() {
    let err = GlobalConfig::from_toml_str("[executor]\nhost_cli = \"  \"\n").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("host_cli")));
}

#[test]
fn invalid_toml_is_a_config_error() {
    let err = GlobalConfig::from_toml_str("[watcher\n").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(sample_toml().as_bytes()).expect("write config");

    let config = GlobalConfig::load_from_path(file.path()).expect("config loads");
    assert_eq!(config.default_agent_id, "planner");
}

#[test]
fn load_from_missing_path_fails() {
    let err = GlobalConfig::load_from_path("/nonexistent/session-relay.toml").unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("failed to read config")));
}

#[test]
fn explicit_projects_root_wins() {
    let config = GlobalConfig::from_toml_str(sample_toml()).expect("valid config");
    assert_eq!(
        config.projects_root().expect("root"),
        PathBuf::from("/srv/agent/projects")
    );
}

#[test]
#[serial]
fn projects_root_defaults_under_home() {
    let previous = std::env::var_os("HOME");
    std::env::set_var("HOME", "/home/tester");

    let root = GlobalConfig::default().projects_root();

    match previous {
        Some(home) => std::env::set_var("HOME", home),
        None => std::env::remove_var("HOME"),
    }
    assert_eq!(
        root.expect("root from HOME"),
        PathBuf::from("/home/tester/.claude/projects")
    );
}
