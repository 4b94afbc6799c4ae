//! Fan-in of agent events, lifecycle events and session changes.
//!
//! [`SharedEventDispatcher`] is the single subscriber of the agent event
//! channel, the lifecycle side-channel and the session watcher. It drops
//! duplicate and stale events, turns permission requests into
//! [`ActionRequest`]s, and delivers everything to its listeners as
//! [`Dispatch`] values. It is constructed and disposed explicitly.

pub mod actions;
pub mod lifecycle;
pub mod timestamp;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DispatcherConfig;
use crate::dispatcher::actions::build_action_request;
use crate::dispatcher::lifecycle::LifecycleEvent;
use crate::dispatcher::timestamp::StalenessWindow;
use crate::models::action::ActionRequest;
use crate::models::event::{AgentEvent, AgentEventType};
use crate::models::session::SessionChangeEvent;
use crate::Result;

/// Item delivered to listeners.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Dispatch {
    /// A request the UI must answer.
    Action(ActionRequest),
    /// A de-duplicated, non-stale agent event.
    Event(AgentEvent),
    /// A session record changed on disk.
    SessionChanged(SessionChangeEvent),
}

/// Listener callback. Errors are logged and do not affect other listeners.
pub type Listener = Arc<dyn Fn(&Dispatch) -> Result<()> + Send + Sync>;

/// Handle returned by [`SharedEventDispatcher::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Bounded set of recently seen event ids.
///
/// Once more than `capacity` ids are held, the oldest are evicted until
/// `retain` remain.
#[derive(Debug)]
pub struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
    retain: usize,
}

impl SeenIds {
    /// Empty set with the given bounds.
    #[must_use]
    pub fn new(capacity: usize, retain: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity,
            retain: retain.min(capacity),
        }
    }

    /// Record `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_owned());
        self.order.push_back(id.to_owned());

        if self.order.len() > self.capacity {
            while self.order.len() > self.retain {
                if let Some(old) = self.order.pop_front() {
                    self.ids.remove(&old);
                }
            }
            debug!(retained = self.order.len(), "trimmed seen event ids");
        }
        true
    }

    /// Whether `id` is remembered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Number of remembered ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no id is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

struct DispatcherState {
    window: Option<StalenessWindow>,
    seen: SeenIds,
    pending: HashMap<String, ActionRequest>,
}

/// Explicitly constructed dispatcher service.
pub struct SharedEventDispatcher {
    config: DispatcherConfig,
    state: Mutex<DispatcherState>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl SharedEventDispatcher {
    /// Inactive dispatcher; call [`initialize`](Self::initialize) to start
    /// accepting events.
    #[must_use]
    pub fn new(config: DispatcherConfig) -> Self {
        let seen = SeenIds::new(config.seen_capacity, config.seen_retain);
        Self {
            config,
            state: Mutex::new(DispatcherState {
                window: None,
                seen,
                pending: HashMap::new(),
            }),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Start accepting events. Clears pending actions and opens the
    /// staleness window. Returns `false` if already active.
    pub fn initialize(&self) -> bool {
        let mut state = self.lock_state();
        if state.window.is_some() {
            debug!("dispatcher already initialised");
            return false;
        }
        let cleared = state.pending.len();
        state.pending.clear();
        state.window = Some(StalenessWindow::new(Utc::now(), self.config.stale_grace_ms));
        info!(cleared, "event dispatcher initialised");
        true
    }

    /// Stop accepting events and drop listeners and pending actions.
    pub fn dispose(&self) {
        {
            let mut state = self.lock_state();
            state.window = None;
            state.pending.clear();
        }
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("event dispatcher disposed");
    }

    /// Whether [`initialize`](Self::initialize) has run and
    /// [`dispose`](Self::dispose) has not.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock_state().window.is_some()
    }

    /// Register a listener.
    pub fn add_listener(
        &self,
        listener: impl Fn(&Dispatch) -> Result<()> + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Process one agent event. Returns whether it was delivered.
    ///
    /// A permission request's [`DeliveryReceipt`] is answered `true` only
    /// when its action is pending in the UI afterwards.
    ///
    /// [`DeliveryReceipt`]: crate::models::event::DeliveryReceipt
    pub fn handle_agent_event(&self, mut event: AgentEvent) -> bool {
        let receipt = event.receipt.take();
        let (delivered, surfaced) = self.accept_agent_event(event);
        if let Some(receipt) = receipt {
            receipt.report(surfaced);
        }
        delivered
    }

    fn accept_agent_event(&self, mut event: AgentEvent) -> (bool, bool) {
        let mut dispatches = Vec::with_capacity(2);
        let surfaced;
        {
            let mut state = self.lock_state();
            let Some(window) = state.window else {
                debug!(event_id = %event.id, "dispatcher inactive, event dropped");
                return (false, false);
            };

            if event.id.is_empty() {
                event.id = Uuid::new_v4().to_string();
            }
            if !state.seen.insert(&event.id) {
                debug!(event_id = %event.id, "duplicate event dropped");
                return (false, false);
            }
            if window.is_stale(event.timestamp.as_ref(), Utc::now()) {
                debug!(event_id = %event.id, "stale event dropped");
                return (false, false);
            }

            let action = if event.event_type == AgentEventType::PermissionRequest {
                match build_action_request(&event) {
                    Ok(action) if state.pending.contains_key(action.action_id()) => {
                        debug!(action_id = %action.action_id(), "action already pending");
                        surfaced = true;
                        None
                    }
                    Ok(action) => {
                        state
                            .pending
                            .insert(action.action_id().to_owned(), action.clone());
                        surfaced = true;
                        Some(action)
                    }
                    Err(err) => {
                        warn!(event_id = %event.id, %err, "cannot build action request");
                        surfaced = false;
                        None
                    }
                }
            } else {
                surfaced = false;
                None
            };

            dispatches.push(Dispatch::Event(event));
            if let Some(action) = action {
                dispatches.push(Dispatch::Action(action));
            }
        }

        for dispatch in &dispatches {
            self.deliver(dispatch);
        }
        (true, surfaced)
    }

    /// Process one lifecycle side-channel event.
    pub fn handle_lifecycle_event(&self, event: LifecycleEvent) -> bool {
        self.handle_agent_event(event.into_agent_event())
    }

    /// Forward a session change to listeners.
    pub fn handle_session_change(&self, change: SessionChangeEvent) -> bool {
        if !self.is_active() {
            debug!(session_id = %change.session_id, "dispatcher inactive, change dropped");
            return false;
        }
        self.deliver(&Dispatch::SessionChanged(change));
        true
    }

    /// Actions surfaced to the UI and not yet resolved, oldest first.
    #[must_use]
    pub fn pending_actions(&self) -> Vec<ActionRequest> {
        let mut actions: Vec<ActionRequest> = self.lock_state().pending.values().cloned().collect();
        actions.sort_by_key(|a| a.origin().created_at);
        actions
    }

    /// Mark an action as answered.
    pub fn resolve_action(&self, action_id: &str) -> Option<ActionRequest> {
        self.lock_state().pending.remove(action_id)
    }

    /// Consume the three input channels on a background task until all of
    /// them close.
    pub fn attach(
        self: &Arc<Self>,
        mut agent_rx: mpsc::Receiver<AgentEvent>,
        mut lifecycle_rx: mpsc::Receiver<LifecycleEvent>,
        mut change_rx: mpsc::Receiver<SessionChangeEvent>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut agent_open = true;
            let mut lifecycle_open = true;
            let mut change_open = true;

            loop {
                tokio::select! {
                    event = agent_rx.recv(), if agent_open => match event {
                        Some(event) => { this.handle_agent_event(event); }
                        None => agent_open = false,
                    },
                    event = lifecycle_rx.recv(), if lifecycle_open => match event {
                        Some(event) => { this.handle_lifecycle_event(event); }
                        None => lifecycle_open = false,
                    },
                    change = change_rx.recv(), if change_open => match change {
                        Some(change) => { this.handle_session_change(change); }
                        None => change_open = false,
                    },
                    else => break,
                }
            }
            debug!("dispatcher inputs closed");
        })
    }

    fn deliver(&self, dispatch: &Dispatch) {
        let listeners: Vec<(ListenerId, Listener)> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (id, listener) in listeners {
            if let Err(err) = listener(dispatch) {
                warn!(listener = id.0, %err, "dispatch listener failed");
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, DispatcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
