//! Facade coordinating the session services.
//!
//! [`SessionService`] owns one instance of each service and wires the
//! permission path: the [`EventRegistry`] carries an [`ActionForwarder`]
//! that publishes into the dispatcher's agent channel, and answers come back
//! through [`SessionService::respond_to_action`].

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::GlobalConfig;
use crate::dispatcher::SharedEventDispatcher;
use crate::errors::AgentResult;
use crate::executor::QueryExecutor;
use crate::models::action::ActionResponse;
use crate::models::event::AgentEvent;
use crate::models::query::{GenerateRequest, SessionDirective};
use crate::models::session::Session;
use crate::orchestrator::branch::BranchResolver;
use crate::orchestrator::context::{base_options, build_context, fork_directive};
use crate::orchestrator::query::{QueryOrchestrator, QueryOutput, StreamCallbacks};
use crate::permission::forwarder::ActionForwarder;
use crate::permission::pending::{PendingActions, RespondOutcome};
use crate::permission::registry::EventRegistry;
use crate::session::fork::{ClaudeForkAdapter, ForkOutcome, ForkRequest, SessionForker};
use crate::session::history::SessionHistory;
use crate::session::store::{RecordLine, SessionStore};
use crate::{AppError, Result};

/// Entry point for embedders.
pub struct SessionService {
    orchestrator: QueryOrchestrator,
    pending: PendingActions,
    forker: SessionForker,
    history: SessionHistory,
    dispatcher: Arc<SharedEventDispatcher>,
    branches: Arc<dyn BranchResolver>,
}

impl SessionService {
    /// Build the services from `config`.
    ///
    /// `agent_events` is the sending half of the channel the dispatcher
    /// consumes (see [`SharedEventDispatcher::attach`]).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the projects root cannot be resolved.
    pub fn new(
        config: &GlobalConfig,
        executor: Arc<dyn QueryExecutor>,
        branches: Arc<dyn BranchResolver>,
        dispatcher: Arc<SharedEventDispatcher>,
        agent_events: mpsc::Sender<AgentEvent>,
    ) -> Result<Self> {
        let store = SessionStore::new(config.projects_root()?);
        let pending = PendingActions::new();

        let registry = Arc::new(EventRegistry::new());
        registry.register(Arc::new(ActionForwarder::new(agent_events, pending.clone())));

        let mut forker = SessionForker::new();
        forker.register(Arc::new(ClaudeForkAdapter::new(
            store.clone(),
            config.fork.native,
        )));

        Ok(Self {
            orchestrator: QueryOrchestrator::new(executor, registry),
            pending,
            forker,
            history: SessionHistory::new(store),
            dispatcher,
            branches,
        })
    }

    /// Query orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &QueryOrchestrator {
        &self.orchestrator
    }

    /// Registry permission handlers are added to.
    #[must_use]
    pub fn registry(&self) -> &Arc<EventRegistry> {
        self.orchestrator.registry()
    }

    /// Pending permission waits.
    #[must_use]
    pub fn pending_actions(&self) -> &PendingActions {
        &self.pending
    }

    /// Dispatcher the service publishes to.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<SharedEventDispatcher> {
        &self.dispatcher
    }

    /// Run one turn, resuming the request's session or creating it under the
    /// same id.
    ///
    /// # Errors
    ///
    /// The outer error is `AppError::Context` when the agent, session,
    /// workspace or branch cannot be established.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<AgentResult<QueryOutput>> {
        self.run(request, false, &StreamCallbacks::none()).await
    }

    /// [`generate`](Self::generate) with text deltas passed to `on_chunk`.
    ///
    /// # Errors
    ///
    /// As for [`generate`](Self::generate).
    pub async fn generate_streaming(
        &self,
        request: &GenerateRequest,
        on_chunk: impl Fn(&str) + Send + Sync + 'static,
    ) -> Result<AgentResult<QueryOutput>> {
        self.run(request, true, &StreamCallbacks::text(on_chunk)).await
    }

    /// [`generate`](Self::generate) with structured chunks passed to
    /// `on_structured_chunk`.
    ///
    /// # Errors
    ///
    /// As for [`generate`](Self::generate).
    pub async fn generate_structured_streaming(
        &self,
        request: &GenerateRequest,
        on_structured_chunk: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Result<AgentResult<QueryOutput>> {
        self.run(request, true, &StreamCallbacks::structured(on_structured_chunk))
            .await
    }

    /// Continue the most recent session of the request's workspace.
    ///
    /// # Errors
    ///
    /// As for [`generate`](Self::generate).
    pub async fn continue_session(
        &self,
        request: &GenerateRequest,
    ) -> Result<AgentResult<QueryOutput>> {
        let context = build_context(request, self.branches.as_ref())?;
        let options = base_options(request, &context, false)
            .with_directive(SessionDirective::ContinueLatest);
        Ok(self
            .orchestrator
            .run_query(&request.prompt, options, &context, None, &StreamCallbacks::none())
            .await)
    }

    /// Fork a session.
    ///
    /// # Errors
    ///
    /// The outer error is `AppError::Context` for an incomplete request.
    pub async fn fork_session(&self, request: &ForkRequest) -> Result<AgentResult<ForkOutcome>> {
        self.forker.fork_session(request).await
    }

    /// Sessions of `workspace`, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the project directory cannot be listed.
    pub async fn list_sessions(&self, workspace: &Path) -> Result<Vec<Session>> {
        let history = self.history.clone();
        let workspace = workspace.to_path_buf();
        tokio::task::spawn_blocking(move || history.list_sessions(&workspace))
            .await
            .map_err(|err| AppError::Io(format!("session listing task failed: {err}")))?
    }

    /// Raw records of one session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session has no record.
    pub async fn read_history(&self, workspace: &Path, session_id: &str) -> Result<Vec<RecordLine>> {
        let history = self.history.clone();
        let workspace = workspace.to_path_buf();
        let session_id = session_id.to_owned();
        tokio::task::spawn_blocking(move || history.read_records(&workspace, &session_id))
            .await
            .map_err(|err| AppError::Io(format!("history read task failed: {err}")))?
    }

    /// Deliver the UI's answer to a pending action.
    pub fn respond_to_action(&self, response: ActionResponse) -> RespondOutcome {
        self.dispatcher.resolve_action(&response.action_id);
        self.pending.respond(response)
    }

    /// Abort every active query and pending wait. Returns the number of
    /// queries aborted.
    pub fn cancel_all(&self) -> usize {
        let aborted = self.orchestrator.cancel_all();
        self.pending.cancel_all();
        aborted
    }

    async fn run(
        &self,
        request: &GenerateRequest,
        streaming: bool,
        callbacks: &StreamCallbacks,
    ) -> Result<AgentResult<QueryOutput>> {
        let context = build_context(request, self.branches.as_ref())?;
        let options = base_options(request, &context, streaming);

        let outcome = match fork_directive(request) {
            Some(directive) => {
                self.orchestrator
                    .run_query(
                        &request.prompt,
                        options.with_directive(directive),
                        &context,
                        None,
                        callbacks,
                    )
                    .await
            }
            None => {
                self.orchestrator
                    .run_query(
                        &request.prompt,
                        options,
                        &context,
                        Some(&context.session_id),
                        callbacks,
                    )
                    .await
            }
        };
        Ok(outcome)
    }
}
