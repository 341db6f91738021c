//! The uniform contract every source collaborator exposes.

use async_trait::async_trait;
use docrelay_common::{SourceError, SourceSystem};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// A page, issue, or folder that files can be attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    /// Identifier assigned by the source (page id, issue key, folder path)
    pub id: String,
    /// Title, summary, or folder name the target was looked up by
    pub title: String,
    /// Space key, project key, or library name
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Confirmation of one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub target_id: String,
    pub file_name: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
}

/// Optional fields a source applies when creating a target.
///
/// Only Jira reads them today; other sources ignore the struct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFields {
    /// Issue type such as Task, Bug, or Story
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl CreateFields {
    /// Read `issue_type` and `priority` out of tool arguments. Blank values count as absent.
    pub fn from_args(args: &serde_json::Value) -> Self {
        let field = |key: &str| {
            args.get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            issue_type: field("issue_type"),
            priority: field("priority"),
        }
    }
}

/// Targets that can be looked up, created, and uploaded to.
///
/// Implemented by sources where the Create-or-Upload composite applies.
#[async_trait]
pub trait TargetStore: Send + Sync {
    fn system(&self) -> SourceSystem;

    /// Find a target by exact title/key within `scope`.
    ///
    /// Absence is reported as [`docrelay_common::ErrorKind::NotFound`]. When the
    /// source returns several matches the first one wins.
    async fn lookup(&self, scope: &str, name: &str) -> SourceResult<TargetRef>;

    /// Create a target. A title collision is reported as
    /// [`docrelay_common::ErrorKind::Conflict`].
    async fn create(&self, scope: &str, name: &str, body: &str, fields: &CreateFields) -> SourceResult<TargetRef>;

    /// Attach a local file to an existing target, optionally under another name.
    async fn upload(&self, target: &TargetRef, file: &Path, file_name: Option<&str>) -> SourceResult<UploadReceipt>;

    /// Default body or description for targets created on the caller's behalf.
    fn default_body(&self, name: &str) -> String {
        match self.system() {
            SourceSystem::Confluence => format!("<p>This page was created for {name}</p>"),
            SourceSystem::Jira => format!("Issue created for {name}"),
            _ => String::new(),
        }
    }

    /// Largest file this source accepts, checked before any transport call.
    fn upload_limit_bytes(&self) -> Option<u64> {
        self.system().upload_limit_bytes()
    }
}

/// One external collaborator, owned by exactly one specialist.
#[async_trait]
pub trait SourceClient: Send + Sync {
    fn system(&self) -> SourceSystem;

    /// Run a pass-through capability (list, search, info, download, ...).
    async fn invoke(
        &self,
        operation: &str,
        args: serde_json::Value,
    ) -> SourceResult<serde_json::Value>;

    /// The target-level operations, for sources that support them.
    fn targets(&self) -> Option<&dyn TargetStore> {
        None
    }

    /// Whether the collaborator is currently reachable.
    async fn probe(&self) -> bool {
        true
    }

    /// Release the underlying connection. Later calls fail.
    async fn shutdown(&self) {}
}

/// Pull a required string argument out of a JSON object.
pub fn required_str<'a>(args: &'a serde_json::Value, key: &str) -> SourceResult<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| SourceError::invalid_input(format!("missing required argument '{key}'")))
}

/// File name component of `path`, for receipts and reports.
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
