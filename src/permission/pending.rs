//! Registry of actions awaiting an externally supplied response.
//!
//! Each entry pairs a `oneshot` sender with an optional cleanup callback that
//! runs only when the wait is cancelled. An entry is removed exactly once:
//! either by a matching [`PendingActions::respond`] or by cancellation.
//! Registration is synchronous so an entry always exists before the request
//! that announces it is published.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::action::ActionResponse;
use crate::{AppError, Result};

/// Callback run when a pending wait is cancelled.
pub type CancelCleanup = Box<dyn FnOnce() + Send>;

struct PendingAction {
    tx: oneshot::Sender<ActionResponse>,
    cleanup: Option<CancelCleanup>,
}

/// Outcome of [`PendingActions::respond`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespondOutcome {
    /// The response reached the waiter.
    Delivered,
    /// No waiter exists for the id (unknown, already answered, or cancelled).
    NoPendingAction,
}

/// Shared map of pending actions keyed by action id.
#[derive(Clone, Default)]
pub struct PendingActions {
    inner: Arc<Mutex<HashMap<String, PendingAction>>>,
}

impl PendingActions {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `action_id` and return the handle to wait on.
    ///
    /// A previous waiter under the same id is dropped and observes
    /// cancellation.
    #[must_use]
    pub fn await_agent_action_response(
        &self,
        action_id: &str,
        cleanup: Option<CancelCleanup>,
        cancel: Option<CancellationToken>,
    ) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        let replaced = self
            .lock()
            .insert(action_id.to_owned(), PendingAction { tx, cleanup });
        if replaced.is_some() {
            warn!(action_id, "replacing existing pending action");
        }
        debug!(action_id, "pending action registered");

        PendingResponse {
            action_id: action_id.to_owned(),
            rx,
            cancel,
            registry: self.clone(),
        }
    }

    /// Deliver `response` to the waiter registered under its action id.
    ///
    /// A response for an unknown or already resolved id is a no-op.
    pub fn respond(&self, response: ActionResponse) -> RespondOutcome {
        let action_id = response.action_id.clone();
        let Some(pending) = self.lock().remove(&action_id) else {
            debug!(action_id, "no pending action for response");
            return RespondOutcome::NoPendingAction;
        };

        if pending.tx.send(response).is_err() {
            warn!(action_id, "pending action receiver already dropped");
            return RespondOutcome::NoPendingAction;
        }

        info!(action_id, "pending action resolved");
        RespondOutcome::Delivered
    }

    /// Cancel one pending action, running its cleanup callback.
    pub fn cancel(&self, action_id: &str) -> bool {
        let removed = self.lock().remove(action_id);
        match removed {
            Some(pending) => {
                run_cleanup(action_id, pending.cleanup);
                true
            }
            None => false,
        }
    }

    /// Cancel every pending action. Returns how many were removed.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, PendingAction)> = self.lock().drain().collect();
        let count = drained.len();
        for (action_id, pending) in drained {
            run_cleanup(&action_id, pending.cleanup);
        }
        if count > 0 {
            info!(count, "cancelled pending actions");
        }
        count
    }

    /// Whether `action_id` is awaiting a response.
    #[must_use]
    pub fn contains(&self, action_id: &str) -> bool {
        self.lock().contains_key(action_id)
    }

    /// Number of pending actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingAction>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_cleanup(action_id: &str, cleanup: Option<CancelCleanup>) {
    if let Some(cleanup) = cleanup {
        cleanup();
    }
    debug!(action_id, "pending action cancelled");
}

/// Handle returned by [`PendingActions::await_agent_action_response`].
pub struct PendingResponse {
    action_id: String,
    rx: oneshot::Receiver<ActionResponse>,
    cancel: Option<CancellationToken>,
    registry: PendingActions,
}

impl PendingResponse {
    /// Identifier being waited on.
    #[must_use]
    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    /// Wait for the response.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cancelled` if the cancellation token fires first
    /// (the entry is removed and its cleanup runs) or if the entry was
    /// cancelled through the registry.
    pub async fn recv(self) -> Result<ActionResponse> {
        let Self {
            action_id,
            mut rx,
            cancel,
            registry,
        } = self;

        let outcome = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    response = &mut rx => response,
                    () = token.cancelled() => {
                        registry.cancel(&action_id);
                        return Err(AppError::Cancelled(format!(
                            "wait for action {action_id} aborted"
                        )));
                    }
                }
            }
            None => rx.await,
        };

        outcome.map_err(|_| AppError::Cancelled(format!("action {action_id} was cancelled")))
    }
}
