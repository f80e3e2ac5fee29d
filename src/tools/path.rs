//! Workspace path handling for file tools

use super::ToolError;
use crate::sandbox::{OUTPUT_DIR, PROJECT_FILES_DIR, WORKSPACE_ROOT};

/// Collapse `.`, `..` and repeated slashes in an absolute POSIX path
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Resolve a model-supplied path to an absolute path inside the workspace.
///
/// Relative paths are taken relative to the output directory.
pub fn resolve_workspace_path(path: &str) -> Result<String, ToolError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(ToolError::Invalid("path must not be empty".into()));
    }
    if path.contains('\0') {
        return Err(ToolError::Invalid("path must not contain NUL bytes".into()));
    }

    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", OUTPUT_DIR, path)
    };
    let resolved = normalize(&joined);

    if !is_within(&resolved, WORKSPACE_ROOT) {
        return Err(ToolError::Invalid(format!(
            "Access denied: {} is outside {}",
            path, WORKSPACE_ROOT
        )));
    }
    Ok(resolved)
}

/// Reject writes to the read-only project files
pub fn ensure_writable(resolved: &str) -> Result<(), ToolError> {
    if is_within(resolved, PROJECT_FILES_DIR) {
        return Err(ToolError::Invalid(format!(
            "{} is read-only; write your changes under {}",
            PROJECT_FILES_DIR, OUTPUT_DIR
        )));
    }
    Ok(())
}

fn is_within(path: &str, root: &str) -> bool {
    path == root || path.strip_prefix(root).is_some_and(|rest| rest.starts_with('/'))
}
