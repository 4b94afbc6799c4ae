//! Agent events and handler decisions.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::query::QueryContext;

/// Event discriminator as delivered to subscribers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AgentEventType {
    /// A logical turn started.
    #[serde(rename = "session:start")]
    SessionStart,
    /// A logical turn finished (successfully or not).
    #[serde(rename = "session:end")]
    SessionEnd,
    /// The runtime asks whether a tool may run.
    #[serde(rename = "permission:request")]
    PermissionRequest,
    /// The runtime started a tool call.
    #[serde(rename = "tool:begin")]
    ToolBegin,
    /// A tool call finished.
    #[serde(rename = "tool:end")]
    ToolEnd,
}

impl AgentEventType {
    /// Wire name of the event type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStart => "session:start",
            Self::SessionEnd => "session:end",
            Self::PermissionRequest => "permission:request",
            Self::ToolBegin => "tool:begin",
            Self::ToolEnd => "tool:end",
        }
    }
}

/// Typed event payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// Start of a turn.
    SessionStart {
        /// Prompt submitted for the turn.
        prompt: String,
    },
    /// End of a turn.
    SessionEnd {
        /// Whether the turn produced a successful result.
        success: bool,
        /// Error description when `success` is false.
        error: Option<String>,
    },
    /// Tool permission request.
    PermissionRequest {
        /// Tool the runtime wants to invoke.
        tool_name: String,
        /// Input the tool would receive.
        tool_input: Value,
    },
    /// Tool invocation start or finish.
    Tool {
        /// Tool name.
        tool_name: String,
        /// Tool input.
        tool_input: Value,
    },
}

/// Timestamp as it arrives from either event channel.
///
/// Numeric values are epoch seconds or epoch milliseconds; the unit is
/// decided by magnitude.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EventTimestamp {
    /// Epoch seconds or milliseconds.
    Epoch(f64),
    /// RFC 3339 string (numeric strings are also accepted).
    Text(String),
}

/// Numeric values below this are treated as epoch seconds.
pub const EPOCH_SECONDS_CUTOFF: f64 = 10_000_000_000.0;

impl EventTimestamp {
    /// Normalise to epoch milliseconds.
    #[must_use]
    pub fn to_millis(&self) -> Option<i64> {
        match self {
            Self::Epoch(value) => epoch_to_millis(*value),
            Self::Text(text) => DateTime::parse_from_rfc3339(text.trim())
                .map(|dt| dt.timestamp_millis())
                .ok()
                .or_else(|| text.trim().parse::<f64>().ok().and_then(epoch_to_millis)),
        }
    }

    /// Interpret a loosely typed JSON value as a timestamp.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(Self::Epoch),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }
}

impl From<DateTime<Utc>> for EventTimestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Text(value.to_rfc3339())
    }
}

#[allow(clippy::cast_possible_truncation)] // Timestamps fit comfortably in i64 millis.
fn epoch_to_millis(value: f64) -> Option<i64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    if value < EPOCH_SECONDS_CUTOFF {
        Some((value * 1000.0) as i64)
    } else {
        Some(value as i64)
    }
}

/// Event raised by the orchestrator or the lifecycle side-channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    /// Unique event identifier.
    pub id: String,
    /// Event discriminator.
    #[serde(rename = "type")]
    pub event_type: AgentEventType,
    /// Acting agent.
    pub agent_id: String,
    /// Session the event belongs to.
    pub session_id: String,
    /// Workspace the session runs in.
    pub workspace_path: String,
    /// Branch checked out in the workspace.
    pub git_branch: String,
    /// When the event was produced.
    pub timestamp: Option<EventTimestamp>,
    /// Typed payload.
    pub payload: EventPayload,
    /// Fields not promoted to the payload (e.g., `toolUseId`).
    #[serde(default)]
    pub raw: Map<String, Value>,
    /// Abort signal of the query that raised the event.
    #[serde(skip)]
    pub cancel: Option<CancellationToken>,
    /// Reports whether a permission request surfaced as a UI action.
    #[serde(skip)]
    pub receipt: Option<DeliveryReceipt>,
}

impl AgentEvent {
    /// Build an event stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(event_type: AgentEventType, context: &QueryContext, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            agent_id: context.agent_id.clone(),
            session_id: context.session_id.clone(),
            workspace_path: context.workspace_path.to_string_lossy().into_owned(),
            git_branch: context.git_branch.clone(),
            timestamp: Some(Utc::now().into()),
            payload,
            raw: Map::new(),
            cancel: None,
            receipt: None,
        }
    }

    /// Attach a raw-context field.
    #[must_use]
    pub fn with_raw(mut self, key: &str, value: Value) -> Self {
        self.raw.insert(key.to_owned(), value);
        self
    }

    /// Attach the abort signal of the owning query.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Attach a delivery receipt.
    #[must_use]
    pub fn with_receipt(mut self, receipt: DeliveryReceipt) -> Self {
        self.receipt = Some(receipt);
        self
    }

    /// Tool-use id carried in the raw context, if any.
    #[must_use]
    pub fn tool_use_id(&self) -> Option<&str> {
        self.raw
            .get("toolUseId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }
}

/// One-shot report from the dispatcher on whether a permission request
/// became a pending UI action.
///
/// Clones share the same sender; only the first [`report`](Self::report)
/// is delivered. Dropping every clone unreported closes the receiver.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt(Arc<Mutex<Option<oneshot::Sender<bool>>>>);

impl DeliveryReceipt {
    /// Receipt plus the receiver the outcome arrives on.
    #[must_use]
    pub fn new() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (Self(Arc::new(Mutex::new(Some(tx)))), rx)
    }

    /// Report the outcome. Later reports are ignored.
    pub fn report(&self, surfaced: bool) {
        let sender = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sender) = sender {
            let _ = sender.send(surfaced);
        }
    }
}

/// Decision returned by a permission handler.
#[derive(Debug, Clone, PartialEq)]
pub enum EventResult {
    /// Let the tool run with its original input.
    Allow,
    /// Block the tool; the optional message is shown to the agent.
    Deny {
        /// Reason reported back to the runtime.
        message: Option<String>,
    },
    /// Let the tool run with a replacement input.
    Modify {
        /// Replacement tool input.
        payload: Value,
    },
    /// No opinion.
    Continue,
}

impl EventResult {
    fn rank(&self) -> u8 {
        match self {
            Self::Continue => 0,
            Self::Allow => 1,
            Self::Modify { .. } => 2,
            Self::Deny { .. } => 3,
        }
    }

    /// Combine the answers of several handlers.
    ///
    /// Deny beats modify, modify beats an explicit allow, and an explicit
    /// allow beats having no opinion. Among equals the first answer wins.
    /// With no opinion at all the request is allowed unmodified.
    #[must_use]
    pub fn resolve(results: Vec<Self>) -> Self {
        let mut winner = Self::Allow;
        let mut best = 0;
        for result in results {
            let rank = result.rank();
            if rank > best {
                best = rank;
                winner = result;
            }
        }
        winner
    }
}
