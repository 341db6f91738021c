//! Path validation for operations on the local filesystem.
//!
//! Every local PDF path coming from a user utterance passes through
//! [`validate_local_path`] before it is touched.

use crate::SourceError;
use std::path::{Component, Path, PathBuf};

/// Which directories local file operations may reach.
#[derive(Debug, Clone, Default)]
pub struct PathPolicy {
    /// Allowed base directories. Empty = allow all (dev mode).
    pub allowed_base_dirs: Vec<PathBuf>,
}

impl PathPolicy {
    pub fn new(allowed_base_dirs: Vec<PathBuf>) -> Self {
        Self { allowed_base_dirs }
    }
}

/// Validate and resolve a local path.
///
/// - Rejects empty input and `..` components
/// - Canonicalizes the path, or its parent for paths that do not exist yet
/// - Checks that the result is under an allowed base directory
pub fn validate_local_path(raw: &str, policy: &PathPolicy) -> Result<PathBuf, SourceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SourceError::invalid_input("Path must not be empty"));
    }

    let path = PathBuf::from(trimmed);
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(SourceError::invalid_input(format!(
            "Path '{trimmed}' contains '..' components which are not allowed"
        )));
    }

    let resolved = if path.exists() {
        path.canonicalize()?
    } else {
        match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) if !parent.as_os_str().is_empty() && parent.exists() => {
                parent.canonicalize()?.join(name)
            }
            (Some(parent), _) if !parent.as_os_str().is_empty() && parent != Path::new(".") => {
                return Err(SourceError::not_found(format!(
                    "Parent directory of '{trimmed}' does not exist"
                )));
            }
            _ => path.clone(),
        }
    };

    if !policy.allowed_base_dirs.is_empty() {
        let allowed = policy.allowed_base_dirs.iter().any(|base| {
            let base = base.canonicalize().unwrap_or_else(|_| base.clone());
            resolved.starts_with(&base)
        });
        if !allowed {
            return Err(SourceError::new(
                crate::ErrorKind::AuthFailure,
                format!(
                    "Path '{}' is outside the allowed directories: {:?}",
                    trimmed,
                    policy
                        .allowed_base_dirs
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                ),
            ));
        }
    }

    Ok(resolved)
}
