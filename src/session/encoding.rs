//! Workspace path ↔ project directory name mapping.
//!
//! Every path separator and space folds to [`PATH_DELIMITER`]. Decoding turns
//! every delimiter back into `/`, so a workspace whose name literally
//! contains the delimiter (or a space) does not round-trip. Callers match on
//! the encoded form where they can.

use std::path::{Path, PathBuf};

/// Character substituted for separators and spaces.
pub const PATH_DELIMITER: char = '-';

/// Directory name under the projects root for `workspace`.
#[must_use]
pub fn encode_workspace_path(workspace: &Path) -> String {
    workspace
        .to_string_lossy()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ' ' => PATH_DELIMITER,
            other => other,
        })
        .collect()
}

/// Best-effort inverse of [`encode_workspace_path`].
#[must_use]
pub fn decode_project_dir(name: &str) -> String {
    name.replace(PATH_DELIMITER, "/")
}

/// Real path of `path` with symlinks resolved, or `path` itself when it
/// cannot be resolved.
#[must_use]
pub fn canonicalize_or_fallback(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
