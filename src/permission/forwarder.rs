//! Registry handler that hands events to the dispatcher and waits for the
//! UI's answer to permission requests.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::action::{ActionKind, ActionResponse, ApprovalDecision};
use crate::models::event::{
    AgentEvent, AgentEventType, DeliveryReceipt, EventPayload, EventResult,
};
use crate::permission::pending::PendingActions;
use crate::permission::registry::EventHandler;

/// Forwards every event into the dispatcher's agent channel.
///
/// For `permission:request` events a pending action keyed by the tool-use id
/// is registered *before* the event is forwarded. The wait for the UI only
/// starts once the dispatcher confirms the action surfaced; a request it
/// drops (inactive, duplicate, stale or unbuildable) is denied at once.
pub struct ActionForwarder {
    events: mpsc::Sender<AgentEvent>,
    pending: PendingActions,
}

impl ActionForwarder {
    /// Create a forwarder publishing into `events`.
    #[must_use]
    pub fn new(events: mpsc::Sender<AgentEvent>, pending: PendingActions) -> Self {
        Self { events, pending }
    }

    async fn forward(&self, event: AgentEvent) -> bool {
        let event_id = event.id.clone();
        if self.events.send(event).await.is_err() {
            warn!(event_id, "dispatcher channel closed, event dropped");
            return false;
        }
        true
    }

    async fn await_decision(&self, event: &AgentEvent) -> EventResult {
        let Some(action_id) = event.tool_use_id().map(str::to_owned) else {
            warn!(event_id = %event.id, "permission request without tool use id");
            return EventResult::Continue;
        };

        let waiter = self
            .pending
            .await_agent_action_response(&action_id, None, event.cancel.clone());

        let (receipt, surfaced) = DeliveryReceipt::new();
        if !self.forward(event.clone().with_receipt(receipt)).await {
            self.pending.cancel(&action_id);
            return EventResult::Deny {
                message: Some("Permission request could not be delivered".into()),
            };
        }

        let surfaced = match event.cancel {
            Some(ref cancel) => tokio::select! {
                outcome = surfaced => outcome.unwrap_or(false),
                () = cancel.cancelled() => false,
            },
            None => surfaced.await.unwrap_or(false),
        };
        if !surfaced {
            self.pending.cancel(&action_id);
            warn!(action_id, "permission request not surfaced by dispatcher");
            return EventResult::Deny {
                message: Some("Permission request was not surfaced to the UI".into()),
            };
        }

        match waiter.recv().await {
            Ok(response) => decision_from_response(&response, event),
            Err(err) => {
                debug!(action_id, %err, "permission wait ended without response");
                EventResult::Deny {
                    message: Some("Permission request cancelled".into()),
                }
            }
        }
    }
}

impl EventHandler for ActionForwarder {
    fn handle<'a>(
        &'a self,
        event: &'a AgentEvent,
    ) -> Pin<Box<dyn Future<Output = EventResult> + Send + 'a>> {
        Box::pin(async move {
            if event.event_type == AgentEventType::PermissionRequest {
                self.await_decision(event).await
            } else {
                self.forward(event.clone()).await;
                EventResult::Continue
            }
        })
    }
}

/// Translate a UI response into a handler decision.
///
/// Clarifying-question answers are merged into the tool input under
/// `answers`; a response without a decision or answers is a denial.
#[must_use]
pub fn decision_from_response(response: &ActionResponse, event: &AgentEvent) -> EventResult {
    match response.kind {
        ActionKind::ToolApproval => match response.decision {
            Some(ApprovalDecision::Allow) => EventResult::Allow,
            Some(ApprovalDecision::Deny) => EventResult::Deny {
                message: response.message.clone(),
            },
            None => EventResult::Deny {
                message: Some("No decision provided".into()),
            },
        },
        ActionKind::ClarifyingQuestion => {
            let Some(ref answers) = response.answers else {
                return EventResult::Deny {
                    message: response
                        .message
                        .clone()
                        .or_else(|| Some("Question dismissed".into())),
                };
            };
            let mut input = match event.payload {
                EventPayload::PermissionRequest {
                    tool_input: Value::Object(ref map),
                    ..
                } => map.clone(),
                _ => serde_json::Map::new(),
            };
            input.insert("answers".into(), Value::Object(answers.clone()));
            EventResult::Modify {
                payload: Value::Object(input),
            }
        }
    }
}
