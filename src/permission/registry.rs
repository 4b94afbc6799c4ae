//! Event handler registry.
//!
//! Every [`AgentEvent`] raised by the orchestrator is fanned out to all
//! registered [`EventHandler`]s concurrently; their [`EventResult`]s are
//! returned in registration order so the caller can apply
//! [`EventResult::resolve`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::join_all;
use tracing::debug;

use crate::models::event::{AgentEvent, EventResult};

/// Receives agent events and may express an opinion on permission requests.
pub trait EventHandler: Send + Sync {
    /// Handle `event`. Non-permission events should return
    /// [`EventResult::Continue`].
    fn handle<'a>(
        &'a self,
        event: &'a AgentEvent,
    ) -> Pin<Box<dyn Future<Output = EventResult> + Send + 'a>>;
}

/// Registration token returned by [`EventRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Ordered set of event handlers.
#[derive(Default)]
pub struct EventRegistry {
    handlers: RwLock<Vec<(HandlerId, Arc<dyn EventHandler>)>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handler`; it receives every event emitted afterwards.
    pub fn register(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every handler and collect their answers.
    pub async fn emit(&self, event: &AgentEvent) -> Vec<EventResult> {
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        debug!(
            event_id = %event.id,
            event_type = event.event_type.as_str(),
            handlers = handlers.len(),
            "emitting agent event"
        );

        join_all(handlers.iter().map(|handler| handler.handle(event))).await
    }
}
