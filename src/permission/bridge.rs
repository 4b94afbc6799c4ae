//! Tool-permission bridge.
//!
//! Converts a tool call raised mid-query into a `permission:request`
//! [`AgentEvent`], lets the [`EventRegistry`] handlers decide, and translates
//! the combined [`EventResult`] back into a [`PermissionDirective`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::executor::{PermissionDirective, ToolPermissionGate, ToolUseRequest};
use crate::models::event::{AgentEvent, AgentEventType, EventPayload, EventResult};
use crate::models::query::QueryContext;
use crate::permission::registry::EventRegistry;
use crate::{AppError, Result};

/// Message used when a handler denies without giving a reason.
pub const DEFAULT_DENY_MESSAGE: &str = "Permission denied";

/// Permission gate bound to one query.
pub struct PermissionBridge {
    registry: Arc<EventRegistry>,
    context: Option<QueryContext>,
}

impl PermissionBridge {
    /// Create a bridge; `context` is used when a call carries none.
    #[must_use]
    pub fn new(registry: Arc<EventRegistry>, context: Option<QueryContext>) -> Self {
        Self { registry, context }
    }

    /// Pick the per-call context, falling back to the bridge's own.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Context` if neither exists or a field is empty.
    pub fn resolve_context(&self, per_call: Option<&QueryContext>) -> Result<QueryContext> {
        let context = per_call
            .or(self.context.as_ref())
            .cloned()
            .ok_or_else(|| AppError::Context("no query context for tool permission".into()))?;
        context.validate()?;
        Ok(context)
    }

    /// Ask the registered handlers whether `request` may run.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Context` for incomplete context or a missing
    /// tool-use id, and `AppError::Cancelled` if `cancel` fired while the
    /// handlers were deciding.
    pub async fn request_permission(
        &self,
        request: ToolUseRequest,
        cancel: CancellationToken,
    ) -> Result<PermissionDirective> {
        let context = self.resolve_context(request.context.as_ref())?;
        if request.tool_use_id.trim().is_empty() {
            return Err(AppError::Context(format!(
                "missing tool use id for {}",
                request.tool_name
            )));
        }

        let event = AgentEvent::new(
            AgentEventType::PermissionRequest,
            &context,
            EventPayload::PermissionRequest {
                tool_name: request.tool_name.clone(),
                tool_input: request.input.clone(),
            },
        )
        .with_raw("toolUseId", Value::String(request.tool_use_id.clone()))
        .with_cancel(cancel.clone());

        let span = info_span!(
            "permission_request",
            session_id = %context.session_id,
            tool = %request.tool_name,
            tool_use_id = %request.tool_use_id,
        );

        async move {
            let results = self.registry.emit(&event).await;

            if cancel.is_cancelled() {
                return Err(AppError::Cancelled(format!(
                    "permission request {} aborted",
                    request.tool_use_id
                )));
            }

            let directive = match EventResult::resolve(results) {
                EventResult::Deny { message } => PermissionDirective::Deny {
                    message: message.unwrap_or_else(|| DEFAULT_DENY_MESSAGE.to_owned()),
                },
                EventResult::Modify { payload } => PermissionDirective::Allow { input: payload },
                EventResult::Allow | EventResult::Continue => PermissionDirective::Allow {
                    input: request.input,
                },
            };

            info!(
                allowed = matches!(directive, PermissionDirective::Allow { .. }),
                "tool permission decided"
            );
            Ok(directive)
        }
        .instrument(span)
        .await
    }
}

impl ToolPermissionGate for PermissionBridge {
    fn check(
        &self,
        request: ToolUseRequest,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<PermissionDirective>> + Send + '_>> {
        Box::pin(self.request_permission(request, cancel))
    }
}
