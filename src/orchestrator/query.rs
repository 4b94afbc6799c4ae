//! Query execution with resume-before-create retry and cancellation.
//!
//! [`QueryOrchestrator::execute_query`] runs one attempt against the
//! [`QueryExecutor`] and tracks it as a [`QueryHandle`] for the duration.
//! [`QueryOrchestrator::run_query`] is the retry state machine: with a target
//! session it first resumes, and on *any* failure retries once under a fresh
//! cancellation token with a create-with-id directive so the caller's chosen
//! identifier stays stable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::errors::{AgentError, AgentErrorKind, AgentResult};
use crate::executor::{
    ExecutorMessage, MessageStream, QueryExecutor, QueryInvocation, ResultMessage,
};
use crate::models::event::{AgentEvent, AgentEventType, EventPayload};
use crate::models::query::{QueryContext, QueryOptions, SessionDirective};
use crate::permission::bridge::PermissionBridge;
use crate::permission::registry::EventRegistry;

/// Callback receiving streamed text deltas.
pub type ChunkCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback receiving structured content blocks and partial events.
pub type StructuredCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Optional streaming callbacks for a query.
#[derive(Clone, Default)]
pub struct StreamCallbacks {
    /// Invoked for every text delta.
    pub on_chunk: Option<ChunkCallback>,
    /// Invoked for every structured chunk.
    pub on_structured_chunk: Option<StructuredCallback>,
}

impl StreamCallbacks {
    /// No callbacks.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Text-delta callback only.
    #[must_use]
    pub fn text(on_chunk: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            on_chunk: Some(Arc::new(on_chunk)),
            on_structured_chunk: None,
        }
    }

    /// Structured-chunk callback only.
    #[must_use]
    pub fn structured(on_structured: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        Self {
            on_chunk: None,
            on_structured_chunk: Some(Arc::new(on_structured)),
        }
    }

    fn chunk(&self, text: &str) {
        if let Some(ref callback) = self.on_chunk {
            callback(text);
        }
    }

    fn structured_chunk(&self, value: &Value) {
        if let Some(ref callback) = self.on_structured_chunk {
            callback(value);
        }
    }
}

/// In-flight query tracked for cancellation.
#[derive(Debug, Clone)]
pub struct QueryHandle {
    /// Query identifier.
    pub id: String,
    /// Abort signal threaded into the executor.
    pub cancel: CancellationToken,
    /// When the query started.
    pub started_at: DateTime<Utc>,
}

/// Successful outcome of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput {
    /// Accumulated response text.
    pub text: String,
    /// Session the runtime reported, if any.
    pub session_id: Option<String>,
    /// Terminal result message.
    pub result: ResultMessage,
    /// Structured content blocks from complete assistant messages.
    pub structured: Vec<Value>,
}

/// Executes queries and owns the active-query registry.
pub struct QueryOrchestrator {
    executor: Arc<dyn QueryExecutor>,
    registry: Arc<EventRegistry>,
    active: Mutex<HashMap<String, QueryHandle>>,
}

impl QueryOrchestrator {
    /// Create an orchestrator over `executor`, emitting through `registry`.
    #[must_use]
    pub fn new(executor: Arc<dyn QueryExecutor>, registry: Arc<EventRegistry>) -> Self {
        Self {
            executor,
            registry,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// The registry events are emitted through.
    #[must_use]
    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Run one logical turn, applying the resume/fallback policy.
    ///
    /// Without `target_session` the query runs exactly as `options` say.
    /// With it, a resume directive is tried first; if that attempt fails for
    /// any reason a create-with-id directive is tried under a new
    /// cancellation token. Only the fallback's outcome reaches the caller.
    pub async fn run_query(
        &self,
        prompt: &str,
        options: QueryOptions,
        context: &QueryContext,
        target_session: Option<&str>,
        callbacks: &StreamCallbacks,
    ) -> AgentResult<QueryOutput> {
        self.emit_lifecycle(
            context,
            AgentEventType::SessionStart,
            EventPayload::SessionStart {
                prompt: prompt.to_owned(),
            },
        )
        .await;

        let outcome = match target_session {
            None => {
                self.execute_query(prompt, options, context, CancellationToken::new(), callbacks)
                    .await
            }
            Some(session_id) => {
                self.resume_or_create(prompt, &options, context, session_id, callbacks)
                    .await
            }
        };

        self.emit_lifecycle(
            context,
            AgentEventType::SessionEnd,
            EventPayload::SessionEnd {
                success: outcome.is_ok(),
                error: outcome.as_ref().err().map(ToString::to_string),
            },
        )
        .await;

        outcome
    }

    async fn resume_or_create(
        &self,
        prompt: &str,
        options: &QueryOptions,
        context: &QueryContext,
        session_id: &str,
        callbacks: &StreamCallbacks,
    ) -> AgentResult<QueryOutput> {
        let resume = options.with_directive(SessionDirective::Resume {
            session_id: session_id.to_owned(),
            fork: false,
        });

        let first = self
            .execute_query(prompt, resume, context, CancellationToken::new(), callbacks)
            .await;

        let Err(resume_err) = first else {
            return first;
        };

        info!(
            session_id,
            error = %resume_err,
            "resume failed, retrying as new session with the same id"
        );

        let create = options.with_directive(SessionDirective::CreateWithId {
            session_id: session_id.to_owned(),
        });

        self.execute_query(prompt, create, context, CancellationToken::new(), callbacks)
            .await
            .map_err(|err| {
                warn!(session_id, error = %err, "fallback session creation failed");
                err
            })
    }

    /// Run a single attempt and consume its message stream.
    ///
    /// Exactly one result message is required; a result flagged as an error
    /// is mapped to a typed [`AgentError`] by subtype. The query is tracked
    /// in the active registry for its whole duration.
    pub async fn execute_query(
        &self,
        prompt: &str,
        options: QueryOptions,
        context: &QueryContext,
        cancel: CancellationToken,
        callbacks: &StreamCallbacks,
    ) -> AgentResult<QueryOutput> {
        let query_id = Uuid::new_v4().to_string();
        self.register(QueryHandle {
            id: query_id.clone(),
            cancel: cancel.clone(),
            started_at: Utc::now(),
        });

        let span = info_span!(
            "execute_query",
            query_id = %query_id,
            session_id = %context.session_id,
            directive = ?options.directive,
        );

        let bridge = Arc::new(PermissionBridge::new(
            Arc::clone(&self.registry),
            Some(context.clone()),
        ));
        let stream = self.executor.query(QueryInvocation {
            prompt: prompt.to_owned(),
            options,
            cancel: cancel.clone(),
            permissions: Some(bridge),
        });

        let outcome = self
            .consume(stream, context, &cancel, callbacks)
            .instrument(span)
            .await;

        self.deregister(&query_id);
        outcome
    }

    async fn consume(
        &self,
        mut stream: MessageStream,
        context: &QueryContext,
        cancel: &CancellationToken,
        callbacks: &StreamCallbacks,
    ) -> AgentResult<QueryOutput> {
        let mut deltas = String::new();
        let mut assistant_text = String::new();
        let mut structured = Vec::new();
        let mut session_id = None;
        let mut result: Option<ResultMessage> = None;

        loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(AgentError::new(AgentErrorKind::ProcessKilled, "query aborted"));
                }
                item = stream.next() => item,
            };

            let Some(item) = item else { break };
            match item? {
                ExecutorMessage::System { session_id: id } => session_id = Some(id),
                ExecutorMessage::TextDelta(text) => {
                    callbacks.chunk(&text);
                    deltas.push_str(&text);
                }
                ExecutorMessage::Structured(value) => callbacks.structured_chunk(&value),
                ExecutorMessage::Assistant { content } => {
                    for block in &content {
                        callbacks.structured_chunk(block);
                        if block.get("type").and_then(Value::as_str) == Some("text") {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                assistant_text.push_str(text);
                            }
                        }
                    }
                    structured.extend(content);
                }
                ExecutorMessage::ToolUse { id, name, input } => {
                    let event = AgentEvent::new(
                        AgentEventType::ToolBegin,
                        context,
                        EventPayload::Tool {
                            tool_name: name,
                            tool_input: input,
                        },
                    )
                    .with_raw("toolUseId", Value::String(id));
                    self.registry.emit(&event).await;
                }
                ExecutorMessage::Result(message) => {
                    if result.is_some() {
                        warn!("ignoring additional result message");
                    } else {
                        result = Some(message);
                    }
                }
            }
        }

        let Some(result) = result else {
            return Err(AgentError::new(
                AgentErrorKind::GenerationFailed,
                "no result message received",
            ));
        };

        if result.is_error {
            return Err(map_result_error(&result));
        }

        let text = if !deltas.is_empty() {
            deltas
        } else if !assistant_text.is_empty() {
            assistant_text
        } else {
            result.result.clone().unwrap_or_default()
        };

        debug!(chars = text.len(), "query completed");
        Ok(QueryOutput {
            text,
            session_id: result.session_id.clone().or(session_id),
            result,
            structured,
        })
    }

    /// Abort and remove every active query. Returns how many were aborted.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<QueryHandle> = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in &drained {
            handle.cancel.cancel();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "cancelled active queries");
        }
        drained.len()
    }

    /// Number of queries currently in flight.
    #[must_use]
    pub fn active_query_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Snapshot of the in-flight queries.
    #[must_use]
    pub fn active_queries(&self) -> Vec<QueryHandle> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn register(&self, handle: QueryHandle) {
        let id = handle.id.clone();
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), handle);
        debug!(query_id = %id, "query registered");
    }

    fn deregister(&self, query_id: &str) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(query_id);
        debug!(query_id, "query deregistered");
    }

    async fn emit_lifecycle(
        &self,
        context: &QueryContext,
        event_type: AgentEventType,
        payload: EventPayload,
    ) {
        let event = AgentEvent::new(event_type, context, payload);
        self.registry.emit(&event).await;
    }
}

/// Map an error result to its typed failure by subtype.
#[must_use]
pub fn map_result_error(result: &ResultMessage) -> AgentError {
    let kind = match result.subtype.as_str() {
        "error_max_turns" => AgentErrorKind::MaxTurnsExceeded,
        "error_max_budget_usd" | "error_budget_exceeded" => AgentErrorKind::BudgetExceeded,
        "error_during_execution" => AgentErrorKind::GenerationFailed,
        "error_max_structured_output_retries" | "error_output_parse" => {
            AgentErrorKind::ProcessOutputParseError
        }
        _ => AgentErrorKind::Unknown,
    };
    let message = result
        .result
        .clone()
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| format!("agent reported {}", result.subtype));
    AgentError::new(kind, message)
}
