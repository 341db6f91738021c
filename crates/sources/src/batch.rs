//! Download files from a source and ingest them in one pass.

use crate::client::{SourceClient, SourceResult};
use crate::ingest::{IngestOptions, IngestionOutcome, Ingestor, ingest_file, remove_dir_if_empty};
use docrelay_common::{SourceError, SourceSystem};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Where downloads land unless the call names its own `dest_dir`
    pub download_dir: PathBuf,
    pub ingest: IngestOptions,
    pub deadline: Option<Instant>,
}

impl BatchOptions {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            ingest: IngestOptions {
                cleanup_after_ingest: true,
                ..Default::default()
            },
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchIngestResult {
    pub system: SourceSystem,
    pub processed: u32,
    pub skipped: u32,
    pub failed: u32,
    pub files: Vec<IngestionOutcome>,
}

impl BatchIngestResult {
    pub fn summary(&self) -> String {
        format!(
            "Downloaded {} file(s) from {}: {} ingested, {} skipped, {} failed.",
            self.files.len(),
            self.system.display_name(),
            self.processed,
            self.skipped,
            self.failed
        )
    }
}

/// Run the source's `operation` (a download) and ingest every file it produced.
///
/// The download directory is created when missing and removed afterwards if
/// cleanup left it empty.
pub async fn download_and_ingest(
    client: &dyn SourceClient,
    ingestor: &dyn Ingestor,
    operation: &str,
    mut args: Value,
    options: &BatchOptions,
) -> SourceResult<BatchIngestResult> {
    let obj = args
        .as_object_mut()
        .ok_or_else(|| SourceError::invalid_input("download arguments must be an object"))?;
    let dest = match obj.get("dest_dir").and_then(Value::as_str) {
        Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => {
            obj.insert(
                "dest_dir".to_string(),
                Value::String(options.download_dir.display().to_string()),
            );
            options.download_dir.clone()
        }
    };

    let managed = !tokio::fs::try_exists(&dest).await.unwrap_or(false);
    if managed {
        tokio::fs::create_dir_all(&dest).await?;
        debug!(dir = %dest.display(), "Created download directory");
    }

    let call = client.invoke(operation, args);
    let response = match options.deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, call)
            .await
            .unwrap_or_else(|_| Err(SourceError::timeout("download did not finish before the deadline"))),
        None => call.await,
    };
    let response = match response {
        Ok(v) => v,
        Err(e) => {
            if managed {
                remove_dir_if_empty(&dest).await;
            }
            return Err(e);
        }
    };

    let files: Vec<PathBuf> = response
        .get("files")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(PathBuf::from).collect())
        .unwrap_or_default();
    info!(system = %client.system(), count = files.len(), "Downloaded files for ingestion");

    let ingest_options = IngestOptions {
        managed_dir: managed.then(|| dest.clone()),
        ..options.ingest.clone()
    };

    let mut result = BatchIngestResult {
        system: client.system(),
        processed: 0,
        skipped: 0,
        failed: 0,
        files: Vec::with_capacity(files.len()),
    };
    for file in &files {
        let outcome = ingest_file(ingestor, file, &ingest_options, options.deadline).await;
        result.processed += outcome.processed();
        result.skipped += outcome.skipped();
        result.failed += outcome.is_failure() as u32;
        result.files.push(outcome);
    }

    if managed {
        remove_dir_if_empty(&dest).await;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ScriptedIngestor;
    use crate::memory::InMemorySource;
    use serde_json::json;

    #[tokio::test]
    async fn ingests_pdfs_and_skips_the_rest() {
        let root = tempfile::tempdir().unwrap();
        let downloads = root.path().join("downloads");
        let source = InMemorySource::new(SourceSystem::Confluence)
            .with_target("DOCS", "Handbook")
            .with_attachment("DOCS", "Handbook", "policy.pdf", b"%PDF")
            .with_attachment("DOCS", "Handbook", "logo.png", b"png");
        let ingestor = ScriptedIngestor::new();

        let result = download_and_ingest(
            &source,
            &ingestor,
            "download",
            json!({"target_id": "Handbook"}),
            &BatchOptions::new(&downloads),
        )
        .await
        .unwrap();

        assert_eq!(result.processed, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.failed, 0);
        assert_eq!(ingestor.calls().len(), 1);
        // The PNG is left behind, so the directory stays.
        assert!(downloads.join("logo.png").exists());
        assert!(!downloads.join("policy.pdf").exists());
    }

    #[tokio::test]
    async fn removes_managed_dir_when_everything_was_cleaned() {
        let root = tempfile::tempdir().unwrap();
        let downloads = root.path().join("downloads");
        let source = InMemorySource::new(SourceSystem::Jira)
            .with_target("OPS", "Outage")
            .with_attachment("OPS", "Outage", "timeline.pdf", b"%PDF");

        let result = download_and_ingest(
            &source,
            &ScriptedIngestor::new(),
            "download",
            json!({"target_id": "OPS-1"}),
            &BatchOptions::new(&downloads),
        )
        .await
        .unwrap();

        assert_eq!(result.processed, 1);
        assert!(!downloads.exists());
    }

    #[tokio::test]
    async fn download_error_propagates() {
        let root = tempfile::tempdir().unwrap();
        let source = InMemorySource::new(SourceSystem::Confluence).with_scope("DOCS");
        let err = download_and_ingest(
            &source,
            &ScriptedIngestor::new(),
            "download",
            json!({"target_id": "nope"}),
            &BatchOptions::new(root.path().join("d")),
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());
        assert!(!root.path().join("d").exists());
    }
}
