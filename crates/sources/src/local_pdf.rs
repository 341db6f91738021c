//! Local filesystem source for PDF files.

use crate::client::{SourceClient, SourceResult, file_name_of, required_str};
use async_trait::async_trait;
use docrelay_common::{ErrorKind, PathPolicy, SourceError, SourceSystem, validate_local_path};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tracing::info;

/// One PDF found on disk.
#[derive(Debug, Clone, Serialize)]
pub struct PdfEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
}

/// Whether `path` has a `.pdf` extension, ignoring case.
pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

pub struct LocalPdfSource {
    policy: PathPolicy,
}

impl LocalPdfSource {
    pub fn new(policy: PathPolicy) -> Self {
        Self { policy }
    }

    fn resolve(&self, raw: &str) -> SourceResult<PathBuf> {
        validate_local_path(raw, &self.policy)
    }

    fn resolve_pdf(&self, raw: &str) -> SourceResult<PathBuf> {
        let path = self.resolve(raw)?;
        if !is_pdf(&path) {
            return Err(SourceError::new(
                ErrorKind::UnsupportedFileType,
                format!("File is not a PDF: {raw}"),
            ));
        }
        Ok(path)
    }

    /// PDFs under `directory`, optionally descending into subdirectories.
    pub async fn list_pdfs(&self, directory: &str, recursive: bool) -> SourceResult<Vec<PdfEntry>> {
        let root = self.resolve(directory)?;
        if !tokio::fs::metadata(&root).await?.is_dir() {
            return Err(SourceError::invalid_input(format!("Path is not a directory: {directory}")));
        }

        let mut found = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if recursive {
                        pending.push(path);
                    }
                } else if file_type.is_file() && is_pdf(&path) {
                    let size = entry.metadata().await?.len();
                    found.push(PdfEntry {
                        name: file_name_of(&path),
                        relative_path: recursive
                            .then(|| path.strip_prefix(&root).ok().map(|p| p.display().to_string()))
                            .flatten(),
                        path: path.display().to_string(),
                        size,
                    });
                }
            }
        }
        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }

    async fn metadata(&self, raw: &str) -> SourceResult<Value> {
        let path = self.resolve_pdf(raw)?;
        let meta = tokio::fs::metadata(&path).await?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        Ok(json!({
            "name": file_name_of(&path),
            "path": path.display().to_string(),
            "size": meta.len(),
            "modified_unix": modified,
            "readonly": meta.permissions().readonly(),
        }))
    }

    async fn relocate(&self, args: &Value, keep_source: bool) -> SourceResult<Value> {
        let from = self.resolve_pdf(required_str(args, "source_path")?)?;
        let to = self.resolve(required_str(args, "destination_path")?)?;
        let to = if tokio::fs::metadata(&to).await.map(|m| m.is_dir()).unwrap_or(false) {
            to.join(file_name_of(&from))
        } else {
            to
        };
        if tokio::fs::try_exists(&to).await? {
            return Err(SourceError::conflict(format!("Destination already exists: {}", to.display())));
        }

        if keep_source {
            tokio::fs::copy(&from, &to).await?;
        } else {
            tokio::fs::rename(&from, &to).await?;
        }
        info!(from = %from.display(), to = %to.display(), copied = keep_source, "Relocated PDF");
        Ok(json!({ "source": from.display().to_string(), "destination": to.display().to_string() }))
    }
}

#[async_trait]
impl SourceClient for LocalPdfSource {
    fn system(&self) -> SourceSystem {
        SourceSystem::LocalPdf
    }

    async fn invoke(&self, operation: &str, args: Value) -> SourceResult<Value> {
        match operation {
            "list_pdfs" => {
                let directory = required_str(&args, "directory")?;
                let recursive = args.get("recursive").and_then(|v| v.as_bool()).unwrap_or(false);
                let pdfs = self.list_pdfs(directory, recursive).await?;
                Ok(json!({ "directory": directory, "count": pdfs.len(), "files": pdfs }))
            }
            "get_pdf_metadata" => self.metadata(required_str(&args, "file_path")?).await,
            "delete_pdf" => {
                let path = self.resolve_pdf(required_str(&args, "file_path")?)?;
                tokio::fs::remove_file(&path).await?;
                info!(path = %path.display(), "Deleted PDF");
                Ok(json!({ "deleted": path.display().to_string() }))
            }
            "move_pdf" => self.relocate(&args, false).await,
            "copy_pdf" => self.relocate(&args, true).await,
            other => Err(SourceError::invalid_input(format!(
                "Local PDF does not support operation '{other}'"
            ))),
        }
    }
}
