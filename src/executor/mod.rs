//! Agent runtime abstraction.
//!
//! A [`QueryExecutor`] turns a prompt plus [`QueryOptions`] into a lazy,
//! finite, non-restartable stream of [`ExecutorMessage`]s. Exactly one
//! [`ExecutorMessage::Result`] is expected per stream. Tool calls that need
//! approval are routed through the optional [`ToolPermissionGate`] carried by
//! the [`QueryInvocation`].

pub mod cli;
pub mod codec;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::AgentResult;
use crate::models::query::{QueryContext, QueryOptions};
use crate::Result;

/// Terminal message of a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ResultMessage {
    /// `success` or one of the `error_*` subtypes.
    pub subtype: String,
    /// Whether the runtime flagged the turn as failed.
    #[serde(default)]
    pub is_error: bool,
    /// Final text reported by the runtime.
    #[serde(default)]
    pub result: Option<String>,
    /// Session the turn ran in.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Number of agent turns.
    #[serde(default)]
    pub num_turns: Option<u32>,
    /// Cost reported by the runtime.
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
}

/// Message produced by a [`QueryExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorMessage {
    /// Session initialisation notice.
    System {
        /// Session the runtime is using.
        session_id: String,
    },
    /// Streamed text delta.
    TextDelta(String),
    /// Partial event that is not plain text (thinking, tool input deltas, …).
    Structured(Value),
    /// Complete assistant message with its content blocks.
    Assistant {
        /// Content blocks (`text`, `tool_use`, …).
        content: Vec<Value>,
    },
    /// Tool invocation started by the runtime.
    ToolUse {
        /// Tool-use identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input.
        input: Value,
    },
    /// Terminal result.
    Result(ResultMessage),
}

/// Stream returned by [`QueryExecutor::query`].
pub type MessageStream = Pin<Box<dyn Stream<Item = AgentResult<ExecutorMessage>> + Send>>;

/// Tool call the runtime wants permission for.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUseRequest {
    /// Tool name.
    pub tool_name: String,
    /// Tool input.
    pub input: Value,
    /// Runtime identifier of the tool call.
    pub tool_use_id: String,
    /// Per-call context; takes precedence over the gate's own context.
    pub context: Option<QueryContext>,
}

/// Directive handed back to the runtime for a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionDirective {
    /// Run the tool with `input`.
    Allow {
        /// Input to run the tool with (original or replaced).
        input: Value,
    },
    /// Refuse the tool call.
    Deny {
        /// Message reported to the agent.
        message: String,
    },
}

/// Decides whether tool calls may proceed.
pub trait ToolPermissionGate: Send + Sync {
    /// Decide on `request`, observing `cancel` while waiting.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Context` when the acting context is incomplete and
    /// `AppError::Cancelled` when `cancel` fires first.
    fn check(
        &self,
        request: ToolUseRequest,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<PermissionDirective>> + Send + '_>>;
}

/// Everything an executor needs to run one query.
#[derive(Clone)]
pub struct QueryInvocation {
    /// Prompt text.
    pub prompt: String,
    /// Runtime options.
    pub options: QueryOptions,
    /// Abort signal; executors must observe it.
    pub cancel: CancellationToken,
    /// Gate consulted before tool calls.
    pub permissions: Option<Arc<dyn ToolPermissionGate>>,
}

impl std::fmt::Debug for QueryInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryInvocation")
            .field("prompt", &self.prompt)
            .field("options", &self.options)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("permissions", &self.permissions.is_some())
            .finish()
    }
}

/// Streaming query protocol of the agent runtime.
pub trait QueryExecutor: Send + Sync {
    /// Start a query. Failures to start are reported as the first stream item.
    fn query(&self, invocation: QueryInvocation) -> MessageStream;
}
