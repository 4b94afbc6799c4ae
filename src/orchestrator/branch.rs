//! Branch resolution for query context.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::{AppError, Result};

/// Resolves the branch checked out in a workspace.
pub trait BranchResolver: Send + Sync {
    /// Current branch of `workspace`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Context` if no branch can be established.
    fn current_branch(&self, workspace: &Path) -> Result<String>;
}

/// Asks `git` synchronously.
#[derive(Debug, Clone, Default)]
pub struct GitBranchResolver;

impl BranchResolver for GitBranchResolver {
    fn current_branch(&self, workspace: &Path) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(workspace)
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .output()
            .map_err(|err| {
                AppError::Context(format!(
                    "cannot resolve git branch in {}: {err}",
                    workspace.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Context(format!(
                "cannot resolve git branch in {}: {}",
                workspace.display(),
                stderr.trim()
            )));
        }

        let branch = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if branch.is_empty() {
            return Err(AppError::Context(format!(
                "empty git branch in {}",
                workspace.display()
            )));
        }
        debug!(workspace = %workspace.display(), branch, "resolved git branch");
        Ok(branch)
    }
}

/// Always answers with a fixed branch. Used by embedders that track the
/// branch themselves.
#[derive(Debug, Clone)]
pub struct StaticBranchResolver {
    branch: String,
}

impl StaticBranchResolver {
    /// Resolver answering `branch` for every workspace.
    #[must_use]
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
        }
    }
}

impl BranchResolver for StaticBranchResolver {
    fn current_branch(&self, _workspace: &Path) -> Result<String> {
        if self.branch.trim().is_empty() {
            return Err(AppError::Context("missing git branch".into()));
        }
        Ok(self.branch.clone())
    }
}
