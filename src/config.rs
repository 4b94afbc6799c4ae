//! Global configuration parsing and validation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Settings for the CLI-backed [`QueryExecutor`](crate::executor::QueryExecutor).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExecutorConfig {
    /// Agent CLI binary (e.g., `claude`).
    #[serde(default = "default_host_cli")]
    pub host_cli: String,
    /// Extra arguments passed to the agent CLI before the generated flags.
    #[serde(default)]
    pub host_cli_args: Vec<String>,
    /// Ask the runtime for partial (delta) messages while streaming.
    #[serde(default = "default_true")]
    pub include_partial_messages: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            host_cli: default_host_cli(),
            host_cli_args: Vec::new(),
            include_partial_messages: true,
        }
    }
}

/// Debounce settings for the session file watcher.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WatcherConfig {
    /// Quiet period after the last notification before emitting.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Upper bound on how long a burst may delay emission.
    #[serde(default = "default_max_debounce_ms")]
    pub max_debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_debounce_ms: default_max_debounce_ms(),
        }
    }
}

/// Deduplication and staleness settings for the event dispatcher.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DispatcherConfig {
    /// Grace period after initialisation during which old events are dropped.
    #[serde(default = "default_stale_grace_ms")]
    pub stale_grace_ms: u64,
    /// Seen-id count that triggers trimming.
    #[serde(default = "default_seen_capacity")]
    pub seen_capacity: usize,
    /// Number of most recent ids kept after trimming.
    #[serde(default = "default_seen_retain")]
    pub seen_retain: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            stale_grace_ms: default_stale_grace_ms(),
            seen_capacity: default_seen_capacity(),
            seen_retain: default_seen_retain(),
        }
    }
}

/// Fork policy settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ForkConfig {
    /// Use the runtime's native fork primitive when the policy allows it.
    #[serde(default = "default_true")]
    pub native: bool,
}

impl Default for ForkConfig {
    fn default() -> Self {
        Self { native: true }
    }
}

fn default_true() -> bool {
    true
}

fn default_host_cli() -> String {
    "claude".into()
}

fn default_agent_id() -> String {
    "claude-code".into()
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_max_debounce_ms() -> u64 {
    1000
}

fn default_stale_grace_ms() -> u64 {
    1000
}

fn default_seen_capacity() -> usize {
    1000
}

fn default_seen_retain() -> usize {
    500
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding one encoded sub-directory per workspace.
    ///
    /// Defaults to `$HOME/.claude/projects` when absent.
    #[serde(default)]
    pub projects_root: Option<PathBuf>,
    /// Agent identifier used when a request does not name one.
    #[serde(default = "default_agent_id")]
    pub default_agent_id: String,
    /// Agent CLI settings.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Session file watcher settings.
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Event dispatcher settings.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Fork policy settings.
    #[serde(default)]
    pub fork: ForkConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            projects_root: None,
            default_agent_id: default_agent_id(),
            executor: ExecutorConfig::default(),
            watcher: WatcherConfig::default(),
            dispatcher: DispatcherConfig::default(),
            fork: ForkConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the projects root, falling back to `$HOME/.claude/projects`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no root is configured and `HOME` is unset.
    pub fn projects_root(&self) -> Result<PathBuf> {
        if let Some(ref root) = self.projects_root {
            return Ok(root.clone());
        }
        let home = env::var_os("HOME")
            .or_else(|| env::var_os("USERPROFILE"))
            .ok_or_else(|| {
                AppError::Config("projects_root not set and no home directory found".into())
            })?;
        Ok(PathBuf::from(home).join(".claude").join("projects"))
    }

    fn validate(&self) -> Result<()> {
        if self.watcher.debounce_ms == 0 {
            return Err(AppError::Config(
                "watcher.debounce_ms must be greater than zero".into(),
            ));
        }

        if self.watcher.max_debounce_ms < self.watcher.debounce_ms {
            return Err(AppError::Config(
                "watcher.max_debounce_ms must not be lower than watcher.debounce_ms".into(),
            ));
        }

        if self.dispatcher.seen_retain >= self.dispatcher.seen_capacity {
            return Err(AppError::Config(
                "dispatcher.seen_retain must be lower than dispatcher.seen_capacity".into(),
            ));
        }

        if self.executor.host_cli.trim().is_empty() {
            return Err(AppError::Config("executor.host_cli must not be empty".into()));
        }

        Ok(())
    }
}
