//! Fail-fast construction of query context and options.

use crate::models::query::{GenerateRequest, QueryContext, QueryOptions, SessionDirective};
use crate::orchestrator::branch::BranchResolver;
use crate::session::encoding::canonicalize_or_fallback;
use crate::{AppError, Result};

/// Build the acting context for `request`.
///
/// No identifier is ever defaulted: a missing agent, session or workspace,
/// a workspace that is not a directory, or an unresolvable branch is a
/// caller error. The workspace is resolved to its real path.
///
/// # Errors
///
/// Returns `AppError::Context` naming what could not be established.
pub fn build_context(
    request: &GenerateRequest,
    branches: &dyn BranchResolver,
) -> Result<QueryContext> {
    let agent_id = required(request.agent_id.as_deref(), "agent id")?;
    let session_id = required(request.session_id.as_deref(), "session id")?;
    let workspace_path = request
        .workspace_path
        .clone()
        .filter(|path| !path.as_os_str().is_empty())
        .ok_or_else(|| AppError::Context("missing workspace path".into()))?;

    if !workspace_path.is_dir() {
        return Err(AppError::Context(format!(
            "workspace {} is not a directory",
            workspace_path.display()
        )));
    }

    let workspace_path = canonicalize_or_fallback(&workspace_path);
    let git_branch = branches.current_branch(&workspace_path)?;

    let context = QueryContext {
        agent_id: agent_id.to_owned(),
        session_id: session_id.to_owned(),
        workspace_path,
        git_branch,
    };
    context.validate()?;
    Ok(context)
}

/// Base options for `request` running in `context`, without a directive.
#[must_use]
pub fn base_options(request: &GenerateRequest, context: &QueryContext, streaming: bool) -> QueryOptions {
    QueryOptions {
        cwd: context.workspace_path.clone(),
        system_prompt: request.system_prompt.clone(),
        directive: None,
        permission_mode: request.permission_mode,
        streaming,
    }
}

/// Directive for a fork-aware request, if it names a source session.
#[must_use]
pub fn fork_directive(request: &GenerateRequest) -> Option<SessionDirective> {
    request
        .fork_from
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .map(|source| SessionDirective::Resume {
            session_id: source.to_owned(),
            fork: true,
        })
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Context(format!("missing {field}")))
}
