//! Executes catalog tools against one source client.

use crate::tools::{ToolCatalog, ToolKind, target_keys};
use docrelay_common::{ErrorKind, OperationError, SourceError, SourceSystem, ToolArguments, ToolInvocation};
use docrelay_sources::client::required_str;
use docrelay_sources::{
    BatchIngestResult, BatchOptions, CompositeOperation, CompositeRequest, CreateFields, IngestOptions,
    IngestionOutcome, Ingestor, SourceClient, SourceResult, Stage, TargetPolicy, download_and_ingest, ingest_file,
    is_pdf,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ToolkitSettings {
    /// Where download-and-ingest tools put files by default
    pub download_dir: PathBuf,
    /// Deadline for one composite or download-and-ingest call
    pub operation_timeout: Duration,
    pub ingest: IngestOptions,
}

impl Default for ToolkitSettings {
    fn default() -> Self {
        Self {
            download_dir: std::env::temp_dir().join("docrelay-downloads"),
            operation_timeout: Duration::from_secs(600),
            ingest: IngestOptions::default(),
        }
    }
}

/// One source client plus the tools that drive it.
pub struct SourceToolkit {
    client: Box<dyn SourceClient>,
    ingestor: Arc<dyn Ingestor>,
    catalog: ToolCatalog,
    settings: ToolkitSettings,
}

fn to_json<T: Serialize>(value: &T) -> SourceResult<Value> {
    serde_json::to_value(value).map_err(|e| SourceError::new(ErrorKind::Internal, e.to_string()))
}

fn with_summary(mut value: Value, summary: String) -> Value {
    if let Some(obj) = value.as_object_mut() {
        obj.insert("summary".into(), Value::String(summary));
    }
    value
}

impl SourceToolkit {
    pub fn new(client: Box<dyn SourceClient>, ingestor: Arc<dyn Ingestor>) -> Self {
        let catalog = ToolCatalog::for_system(client.system());
        Self {
            client,
            ingestor,
            catalog,
            settings: ToolkitSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ToolkitSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn system(&self) -> SourceSystem {
        self.catalog.system()
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn client(&self) -> &dyn SourceClient {
        self.client.as_ref()
    }

    /// Call `name` with `arguments`. Failures come back inside the invocation.
    pub async fn invoke(&self, name: &str, arguments: ToolArguments) -> ToolInvocation {
        let started = std::time::Instant::now();
        let result = self.dispatch(name, &arguments).await.map_err(OperationError::from);
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => debug!(system = %self.system(), tool = name, duration_ms, "Tool call succeeded"),
            Err(e) => warn!(system = %self.system(), tool = name, kind = %e.kind, error = %e.message, "Tool call failed"),
        }

        ToolInvocation {
            tool_name: name.to_string(),
            arguments,
            result,
            duration_ms,
        }
    }

    async fn dispatch(&self, name: &str, arguments: &ToolArguments) -> SourceResult<Value> {
        let spec = self.catalog.get(name).ok_or_else(|| {
            SourceError::invalid_input(format!(
                "Unknown tool '{name}' for {}. Available: {}",
                self.system().display_name(),
                self.catalog.names().join(", ")
            ))
        })?;
        let args = Value::Object(arguments.clone());
        for p in spec.required_params() {
            let present = match args.get(p.name) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(_) => true,
            };
            if !present {
                return Err(SourceError::invalid_input(format!(
                    "missing required argument '{}' for {name}",
                    p.name
                )));
            }
        }

        match spec.kind {
            ToolKind::Composite { policy, ingest } => self.run_composite(&args, policy, ingest).await,
            ToolKind::CreateTarget => self.create_target(&args).await,
            ToolKind::UploadMany => self.upload_many(&args).await,
            ToolKind::PassThrough { operation } => self.client.invoke(operation, args).await,
            ToolKind::DownloadAndIngest { operation } => {
                let cleanup = args.get("cleanup_after_ingest").and_then(Value::as_bool).unwrap_or(true);
                let mut options = BatchOptions::new(&self.settings.download_dir);
                options.ingest = IngestOptions {
                    cleanup_after_ingest: cleanup,
                    ..self.settings.ingest.clone()
                };
                options.deadline = Some(Instant::now() + self.settings.operation_timeout);
                let result =
                    download_and_ingest(self.client.as_ref(), self.ingestor.as_ref(), operation, args, &options).await?;
                Ok(with_summary(to_json(&result)?, result.summary()))
            }
            ToolKind::IngestLocalPdfs => self.ingest_local(&args).await,
        }
    }

    fn store_keys(&self) -> SourceResult<(&dyn docrelay_sources::TargetStore, crate::tools::TargetKeys)> {
        let unsupported = || {
            SourceError::invalid_input(format!(
                "{} does not support uploads",
                self.system().display_name()
            ))
        };
        let store = self.client.targets().ok_or_else(unsupported)?;
        let keys = target_keys(self.system()).ok_or_else(unsupported)?;
        Ok((store, keys))
    }

    async fn run_composite(&self, args: &Value, policy: TargetPolicy, ingest: bool) -> SourceResult<Value> {
        let (store, keys) = self.store_keys()?;
        let mut request = CompositeRequest::new(
            required_str(args, keys.scope)?,
            required_str(args, keys.name)?,
            required_str(args, "file_path")?,
        )
        .with_policy(policy)
        .with_fields(CreateFields::from_args(args));
        if let Some(body) = args.get(keys.body).and_then(Value::as_str) {
            request = request.with_body(body);
        }
        if let Some(file_name) = args.get("filename").and_then(Value::as_str).filter(|s| !s.trim().is_empty()) {
            request = request.with_file_name(file_name);
        }
        if ingest {
            let cleanup = args.get("cleanup_after_ingest").and_then(Value::as_bool).unwrap_or(true);
            request = request.with_ingestion(cleanup);
        }

        let result = CompositeOperation::new(request)
            .with_timeout(self.settings.operation_timeout)
            .with_ingest_options(self.settings.ingest.clone())
            .run(store, self.ingestor.as_ref())
            .await;
        let summary = result.summary();

        // An ingestion failure still leaves a successful upload behind.
        match &result.failure {
            Some(failure) if failure.stage != Stage::Ingest => Err(SourceError::new(failure.error.kind, summary)),
            _ => Ok(with_summary(to_json(&result)?, summary)),
        }
    }

    async fn create_target(&self, args: &Value) -> SourceResult<Value> {
        let (store, keys) = self.store_keys()?;
        let name = required_str(args, keys.name)?;
        let body = args
            .get(keys.body)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| store.default_body(name));
        let fields = CreateFields::from_args(args);
        let target = store.create(required_str(args, keys.scope)?, name, &body, &fields).await?;
        Ok(json!({ "target": target, "created": true }))
    }

    /// Upload each file to one existing target. Files fail independently;
    /// a missing target fails the whole call.
    async fn upload_many(&self, args: &Value) -> SourceResult<Value> {
        let (store, keys) = self.store_keys()?;
        let scope = required_str(args, keys.scope)?;
        let name = required_str(args, keys.name)?;
        let files: Vec<&str> = args
            .get("file_paths")
            .and_then(Value::as_array)
            .map(|paths| paths.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if files.is_empty() {
            return Err(SourceError::invalid_input("'file_paths' must list at least one file"));
        }

        let deadline = Instant::now() + self.settings.operation_timeout;
        let mut results = Vec::with_capacity(files.len());
        for file in files {
            let request = CompositeRequest::new(scope, name, file).with_policy(TargetPolicy::MustExist);
            let result = CompositeOperation::new(request)
                .with_deadline(deadline)
                .run(store, self.ingestor.as_ref())
                .await;
            if let Some(failure) = result.failure.as_ref().filter(|f| f.stage == Stage::Lookup) {
                return Err(SourceError::new(failure.error.kind, result.summary()));
            }
            results.push(result);
        }

        let uploaded = results.iter().filter(|r| r.uploaded()).count();
        let summary = format!(
            "Uploaded {uploaded} of {} file(s) to {} '{name}'.",
            results.len(),
            self.system().target_noun().unwrap_or("target")
        );
        let value = json!({
            "total_files": results.len(),
            "successful_uploads": uploaded,
            "failed_uploads": results.len() - uploaded,
            "files": to_json(&results)?,
        });
        Ok(with_summary(value, summary))
    }

    /// Ingest PDFs already on disk. User files are never deleted.
    async fn ingest_local(&self, args: &Value) -> SourceResult<Value> {
        let requested: Vec<String> = if let Some(paths) = args.get("file_paths").and_then(Value::as_array) {
            paths.iter().filter_map(Value::as_str).map(str::to_string).collect()
        } else if let Some(directory) = args.get("directory").and_then(Value::as_str) {
            let recursive = args.get("recursive").and_then(Value::as_bool).unwrap_or(false);
            let listing = self
                .client
                .invoke("list_pdfs", json!({ "directory": directory, "recursive": recursive }))
                .await?;
            listing
                .get("files")
                .and_then(Value::as_array)
                .map(|files| {
                    files
                        .iter()
                        .filter_map(|f| f.get("path").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        } else {
            return Err(SourceError::invalid_input("provide either 'file_paths' or 'directory'"));
        };

        let options = IngestOptions {
            cleanup_after_ingest: false,
            ..self.settings.ingest.clone()
        };
        let deadline = Instant::now() + self.settings.operation_timeout;

        let mut result = BatchIngestResult {
            system: self.system(),
            processed: 0,
            skipped: 0,
            failed: 0,
            files: Vec::with_capacity(requested.len()),
        };
        for raw in &requested {
            let outcome = if !is_pdf(Path::new(raw)) {
                IngestionOutcome::skipped_non_pdf(Path::new(raw))
            } else {
                // Resolves the path through the source's access policy.
                match self.client.invoke("get_pdf_metadata", json!({ "file_path": raw })).await {
                    Ok(meta) => {
                        let path = meta.get("path").and_then(Value::as_str).unwrap_or(raw);
                        ingest_file(self.ingestor.as_ref(), Path::new(path), &options, Some(deadline)).await
                    }
                    Err(e) => IngestionOutcome::Failed {
                        file: raw.clone(),
                        error: e.into(),
                        messages: Vec::new(),
                    },
                }
            };
            result.processed += outcome.processed();
            result.skipped += outcome.skipped();
            result.failed += outcome.is_failure() as u32;
            result.files.push(outcome);
        }

        let summary = format!(
            "Ingested {} of {} file(s): {} skipped, {} failed.",
            result.processed,
            requested.len(),
            result.skipped,
            result.failed
        );
        Ok(with_summary(to_json(&result)?, summary))
    }

    /// Release the client. Later tool calls fail with a network error.
    pub async fn shutdown(&self) {
        self.client.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrelay_common::PathPolicy;
    use docrelay_sources::{InMemorySource, LocalPdfSource, ScriptedIngestor};

    fn args(value: Value) -> ToolArguments {
        value.as_object().cloned().unwrap()
    }

    fn toolkit(source: InMemorySource) -> SourceToolkit {
        SourceToolkit::new(Box::new(source), Arc::new(ScriptedIngestor::new()))
    }

    #[tokio::test]
    async fn unknown_tool_is_invalid_input() {
        let kit = toolkit(InMemorySource::new(SourceSystem::Jira));
        let call = kit.invoke("delete_everything", ToolArguments::new()).await;
        assert_eq!(call.result.unwrap_err().kind, ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn missing_argument_is_reported_before_any_call() {
        let kit = toolkit(InMemorySource::new(SourceSystem::Confluence).with_scope("DOCS"));
        let call = kit
            .invoke("upload_file_to_page_or_create", args(json!({"space_key": "DOCS", "title": "X"})))
            .await;
        let err = call.result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert!(err.message.contains("file_path"));
    }

    #[tokio::test]
    async fn composite_tool_returns_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("invoice.pdf");
        std::fs::write(&file, b"%PDF").unwrap();
        let kit = toolkit(InMemorySource::new(SourceSystem::Jira).with_scope("FIN"));

        let call = kit
            .invoke(
                "create_issue_and_upload_and_ingest_file",
                args(json!({"project_key": "FIN", "summary": "Invoice", "file_path": file})),
            )
            .await;
        let value = call.result.unwrap();
        assert_eq!(value["created_new_target"], true);
        assert_eq!(value["transitions"].as_array().unwrap().last().unwrap(), "DONE");
        assert!(value["summary"].as_str().unwrap().contains("Created issue"));
    }

    #[tokio::test]
    async fn ingest_composite_removes_file_unless_told_to_keep_it() {
        let dir = tempfile::tempdir().unwrap();
        let removed = dir.path().join("removed.pdf");
        let kept = dir.path().join("kept.pdf");
        std::fs::write(&removed, b"%PDF").unwrap();
        std::fs::write(&kept, b"%PDF").unwrap();
        let kit = toolkit(InMemorySource::new(SourceSystem::Confluence).with_scope("DOCS"));

        let call = kit
            .invoke(
                "upload_and_ingest_file_to_page_or_create",
                args(json!({"space_key": "DOCS", "title": "Reports", "file_path": removed})),
            )
            .await;
        assert!(call.result.is_ok());
        assert!(!removed.exists());

        let call = kit
            .invoke(
                "upload_and_ingest_file_to_page_or_create",
                args(json!({
                    "space_key": "DOCS",
                    "title": "Reports",
                    "file_path": kept,
                    "cleanup_after_ingest": false,
                })),
            )
            .await;
        assert!(call.result.is_ok());
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn jira_create_applies_issue_type_priority_and_filename() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("trace.log");
        std::fs::write(&file, b"boom").unwrap();
        let kit = toolkit(InMemorySource::new(SourceSystem::Jira).with_scope("OPS"));

        let call = kit
            .invoke(
                "create_issue_and_upload_file",
                args(json!({
                    "project_key": "OPS",
                    "summary": "Crash on start",
                    "file_path": file,
                    "issue_type": "Bug",
                    "priority": "High",
                    "filename": "crash.log",
                })),
            )
            .await;
        let issue_key = call.result.unwrap()["target"]["id"].as_str().unwrap().to_string();

        let details = kit
            .invoke("get_issue_details", args(json!({"issue_key": issue_key})))
            .await
            .result
            .unwrap();
        assert_eq!(details["fields"]["issue_type"], "Bug");
        assert_eq!(details["fields"]["priority"], "High");
        assert_eq!(details["attachments"], json!(["crash.log"]));
    }

    #[tokio::test]
    async fn upload_many_reports_each_file() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.txt");
        std::fs::write(&present, b"x").unwrap();
        let missing = dir.path().join("gone.txt");
        let kit = toolkit(InMemorySource::new(SourceSystem::Confluence).with_target("DOCS", "Runbook"));

        let value = kit
            .invoke(
                "upload_multiple_files_to_content",
                args(json!({"space_key": "DOCS", "title": "Runbook", "file_paths": [present, missing]})),
            )
            .await
            .result
            .unwrap();
        assert_eq!(value["total_files"], 2);
        assert_eq!(value["successful_uploads"], 1);
        assert_eq!(value["failed_uploads"], 1);
        assert!(value["summary"].as_str().unwrap().starts_with("Uploaded 1 of 2"));

        let err = kit
            .invoke(
                "upload_multiple_files_to_content",
                args(json!({"space_key": "DOCS", "title": "Nope", "file_paths": [present]})),
            )
            .await
            .result
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn project_download_ingests_pdfs_from_every_issue() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        let source = InMemorySource::new(SourceSystem::Jira)
            .with_target("FIN", "Invoice 1")
            .with_target("FIN", "Invoice 2")
            .with_attachment("FIN", "Invoice 1", "one.pdf", b"%PDF")
            .with_attachment("FIN", "Invoice 2", "two.pdf", b"%PDF")
            .with_attachment("FIN", "Invoice 2", "logo.png", b"png");
        let kit = toolkit(source).with_settings(ToolkitSettings {
            download_dir: downloads.clone(),
            ..ToolkitSettings::default()
        });

        let value = kit
            .invoke("download_and_ingest_project_attachments", args(json!({"project_key": "FIN"})))
            .await
            .result
            .unwrap();
        assert_eq!(value["processed"], 2);
        assert_eq!(value["skipped"], 1);
        assert_eq!(value["failed"], 0);
    }

    #[tokio::test]
    async fn create_failure_surfaces_stage_and_kind() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();
        let kit = toolkit(InMemorySource::new(SourceSystem::Confluence));

        let call = kit
            .invoke(
                "upload_file_to_page_or_create",
                args(json!({"space_key": "NOPE", "title": "Page", "file_path": file})),
            )
            .await;
        let err = call.result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(err.message.contains("create stage"));
    }

    #[tokio::test]
    async fn ingest_pdfs_never_deletes_user_files() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("a.pdf");
        std::fs::write(&pdf, b"%PDF").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"x").unwrap();
        let kit = SourceToolkit::new(
            Box::new(LocalPdfSource::new(PathPolicy::default())),
            Arc::new(ScriptedIngestor::new()),
        );

        let call = kit
            .invoke(
                "ingest_pdfs",
                args(json!({"file_paths": [pdf, dir.path().join("b.txt")]})),
            )
            .await;
        let value = call.result.unwrap();
        assert_eq!(value["processed"], 1);
        assert_eq!(value["skipped"], 1);
        assert!(pdf.exists());
    }

    #[tokio::test]
    async fn shutdown_releases_client() {
        let kit = toolkit(InMemorySource::new(SourceSystem::Jira).with_scope("OPS"));
        kit.shutdown().await;
        let call = kit.invoke("list_projects", ToolArguments::new()).await;
        assert_eq!(call.result.unwrap_err().kind, ErrorKind::NetworkFailure);
    }
}
