//! Error types shared across the crate.
//!
//! Two channels exist side by side:
//!
//! - [`AppError`] is the "thrown" channel. Orchestration entry points only
//!   surface it for context-validation failures (missing agent, session,
//!   workspace, branch or tool-use identifiers), which are programming errors
//!   and must fail fast.
//! - [`AgentError`] is the typed outcome of a query or fork. Public
//!   orchestration operations return it inside an [`AgentResult`] rather than
//!   propagating it with `?`.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Result of an orchestration operation as seen by callers.
pub type AgentResult<T> = std::result::Result<T, AgentError>;

/// Application error enumeration.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// A required identifier could not be established before building a query
    /// or an action request.
    Context(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// File watcher creation or registration failure.
    Watch(String),
    /// JSON encoding or decoding failure.
    Serialization(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// A pending wait was aborted through its cancellation token.
    Cancelled(String),
    /// Typed failure reported by the agent runtime.
    Agent(AgentError),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Context(msg) => write!(f, "context: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Watch(msg) => write!(f, "watch: {msg}"),
            Self::Serialization(msg) => write!(f, "serialization: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Agent(err) => write!(f, "agent: {err}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<notify::Error> for AppError {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}

impl From<AgentError> for AppError {
    fn from(err: AgentError) -> Self {
        Self::Agent(err)
    }
}

/// Classification of agent runtime failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    /// No runtime is available for the requested agent.
    AgentNotAvailable,
    /// The runtime exists but has not been initialised.
    AgentNotInitialized,
    /// The referenced session could not be located.
    SessionNotFound,
    /// The referenced session exists but cannot be used.
    SessionInvalid,
    /// The runtime process did not answer in time.
    ProcessTimeout,
    /// The runtime process was killed or the query aborted.
    ProcessKilled,
    /// The runtime process could not be started.
    ProcessSpawnFailed,
    /// The runtime produced output that could not be parsed.
    ProcessOutputParseError,
    /// The agent has no implementation of the requested capability.
    CapabilityNotSupported,
    /// The turn ended because the maximum number of turns was reached.
    MaxTurnsExceeded,
    /// The turn ended because the spending budget was exhausted.
    BudgetExceeded,
    /// The runtime reported an error while executing the turn.
    GenerationFailed,
    /// Anything that does not fit another kind.
    Unknown,
}

impl AgentErrorKind {
    /// Stable kebab-case label, used in logs and wire payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentNotAvailable => "agent-not-available",
            Self::AgentNotInitialized => "agent-not-initialized",
            Self::SessionNotFound => "session-not-found",
            Self::SessionInvalid => "session-invalid",
            Self::ProcessTimeout => "process-timeout",
            Self::ProcessKilled => "process-killed",
            Self::ProcessSpawnFailed => "process-spawn-failed",
            Self::ProcessOutputParseError => "process-output-parse-error",
            Self::CapabilityNotSupported => "capability-not-supported",
            Self::MaxTurnsExceeded => "max-turns-exceeded",
            Self::BudgetExceeded => "budget-exceeded",
            Self::GenerationFailed => "generation-failed",
            Self::Unknown => "unknown",
        }
    }
}

impl Display for AgentErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed agent failure with an optional underlying cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentError {
    /// Failure classification.
    pub kind: AgentErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Rendered underlying cause, when one exists.
    pub cause: Option<String>,
}

impl AgentError {
    /// Build an error of `kind` with `message` and no cause.
    #[must_use]
    pub fn new(kind: AgentErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the rendered form of `cause`.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Shorthand for an [`AgentErrorKind::Unknown`] error.
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(AgentErrorKind::Unknown, message)
    }

    /// Map an arbitrary application error onto the typed channel.
    ///
    /// Errors that already carry an [`AgentError`] keep their kind.
    #[must_use]
    pub fn from_app(err: AppError) -> Self {
        match err {
            AppError::Agent(inner) => inner,
            AppError::Cancelled(msg) => Self::new(AgentErrorKind::ProcessKilled, msg),
            AppError::NotFound(msg) => Self::new(AgentErrorKind::SessionNotFound, msg),
            other => Self::unknown(other.to_string()),
        }
    }
}

impl Display for AgentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(ref cause) = self.cause {
            write!(f, " (caused by: {cause})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AgentError {}
