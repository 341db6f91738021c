//! Process-local source used for offline mode and tests.
//!
//! Counts every transport-level call so callers can assert that a step never
//! reached the collaborator.

use crate::client::{CreateFields, SourceClient, SourceResult, TargetRef, TargetStore, UploadReceipt, file_name_of, required_str};
use async_trait::async_trait;
use docrelay_common::{ErrorKind, SourceError, SourceSystem};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::debug;

/// Which transport operation an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOp {
    Lookup,
    Create,
    Upload,
    Invoke,
}

/// Snapshot of transport-call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub lookups: usize,
    pub creates: usize,
    pub uploads: usize,
    pub invokes: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.lookups + self.creates + self.uploads + self.invokes
    }
}

#[derive(Debug, Clone)]
struct StoredAttachment {
    name: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
struct StoredTarget {
    target: TargetRef,
    fields: CreateFields,
    attachments: Vec<StoredAttachment>,
}

#[derive(Default)]
struct MemoryState {
    scopes: HashSet<String>,
    targets: Vec<StoredTarget>,
    next_id: u64,
    failures: VecDeque<(MemoryOp, SourceError)>,
    /// Targets that appear concurrently the next time someone creates them
    races: Vec<(String, String)>,
}

pub struct InMemorySource {
    system: SourceSystem,
    state: Mutex<MemoryState>,
    lookups: AtomicUsize,
    creates: AtomicUsize,
    uploads: AtomicUsize,
    invokes: AtomicUsize,
    closed: AtomicBool,
}

impl InMemorySource {
    pub fn new(system: SourceSystem) -> Self {
        Self {
            system,
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..Default::default()
            }),
            lookups: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            invokes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a space/project/library that targets may be created in.
    pub fn with_scope(self, scope: &str) -> Self {
        self.state.lock().scopes.insert(scope.to_string());
        self
    }

    /// Seed an existing target. Registers its scope too.
    pub fn with_target(self, scope: &str, title: &str) -> Self {
        {
            let mut state = self.state.lock();
            state.scopes.insert(scope.to_string());
            let target = self.mint(&mut state, scope, title);
            state.targets.push(StoredTarget {
                target,
                fields: CreateFields::default(),
                attachments: Vec::new(),
            });
        }
        self
    }

    /// Seed an attachment on an existing target.
    pub fn with_attachment(self, scope: &str, title: &str, name: &str, bytes: &[u8]) -> Self {
        {
            let mut state = self.state.lock();
            if let Some(stored) = state
                .targets
                .iter_mut()
                .find(|t| t.target.scope == scope && t.target.title == title)
            {
                stored.attachments.push(StoredAttachment {
                    name: name.to_string(),
                    bytes: bytes.to_vec(),
                });
            }
        }
        self
    }

    /// Fail the next call of `op` with `error`.
    pub fn fail_next(&self, op: MemoryOp, error: SourceError) {
        self.state.lock().failures.push_back((op, error));
    }

    /// Make `scope`/`name` appear concurrently on the next create: the target
    /// gets stored and the create reports a conflict.
    pub fn simulate_race(&self, scope: &str, name: &str) {
        self.state
            .lock()
            .races
            .push((scope.to_string(), name.to_string()));
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            lookups: self.lookups.load(Ordering::SeqCst),
            creates: self.creates.load(Ordering::SeqCst),
            uploads: self.uploads.load(Ordering::SeqCst),
            invokes: self.invokes.load(Ordering::SeqCst),
        }
    }

    /// Targets matching `scope`/`name` under this source's lookup rules.
    pub fn count_matching(&self, scope: &str, name: &str) -> usize {
        let state = self.state.lock();
        state
            .targets
            .iter()
            .filter(|t| self.matches(&t.target, scope, name))
            .count()
    }

    /// Names of files attached to the target with id `target_id`.
    pub fn attachments_of(&self, target_id: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .targets
            .iter()
            .find(|t| t.target.id == target_id)
            .map(|t| t.attachments.iter().map(|a| a.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn mint(&self, state: &mut MemoryState, scope: &str, title: &str) -> TargetRef {
        let n = state.next_id;
        state.next_id += 1;
        let id = match self.system {
            SourceSystem::Jira => format!("{}-{}", scope.to_uppercase(), n),
            SourceSystem::SharePoint => format!("{scope}/{title}"),
            _ => format!("{}", 10_000 + n),
        };
        TargetRef {
            url: Some(format!("memory://{}/{}", self.system, id)),
            id,
            title: title.to_string(),
            scope: scope.to_string(),
        }
    }

    fn matches(&self, target: &TargetRef, scope: &str, name: &str) -> bool {
        if target.scope != scope {
            return false;
        }
        match self.system {
            // Issue key, or summary compared case-insensitively.
            SourceSystem::Jira => {
                target.id.eq_ignore_ascii_case(name.trim())
                    || target.title.trim().eq_ignore_ascii_case(name.trim())
            }
            _ => target.title == name,
        }
    }

    fn enter(&self, op: MemoryOp) -> SourceResult<()> {
        let counter = match op {
            MemoryOp::Lookup => &self.lookups,
            MemoryOp::Create => &self.creates,
            MemoryOp::Upload => &self.uploads,
            MemoryOp::Invoke => &self.invokes,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        if self.is_closed() {
            return Err(SourceError::network(format!(
                "{} client has been shut down",
                self.system.display_name()
            )));
        }

        let mut state = self.state.lock();
        if let Some(pos) = state.failures.iter().position(|(o, _)| *o == op) {
            if let Some((_, err)) = state.failures.remove(pos) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn scope_noun(&self) -> &'static str {
        self.system.scope_noun().unwrap_or("scope")
    }

    fn find_by_id(&self, id: &str) -> SourceResult<StoredTarget> {
        let state = self.state.lock();
        state
            .targets
            .iter()
            .find(|t| t.target.id == id || t.target.title == id)
            .cloned()
            .ok_or_else(|| SourceError::not_found(format!("No {} with id '{id}'", self.noun())))
    }

    fn noun(&self) -> &'static str {
        self.system.target_noun().unwrap_or("item")
    }

    async fn download(&self, args: &Value) -> SourceResult<Value> {
        let id = args
            .get("target_id")
            .or_else(|| args.get("id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| SourceError::invalid_input("missing required argument 'target_id'"))?;
        let dest = PathBuf::from(required_str(args, "dest_dir")?);
        let file_types = file_types(args);

        let stored = self.find_by_id(id)?;
        tokio::fs::create_dir_all(&dest).await?;

        let mut files = Vec::new();
        for attachment in stored.attachments.iter().filter(|a| wanted(&a.name, &file_types)) {
            let path = dest.join(&attachment.name);
            tokio::fs::write(&path, &attachment.bytes).await?;
            files.push(path.display().to_string());
        }

        Ok(json!({ "target_id": stored.target.id, "files": files }))
    }

    /// Download the attachments of every target in a space or project.
    ///
    /// File names are prefixed with the target id so equal names do not collide.
    async fn download_scope(&self, args: &Value) -> SourceResult<Value> {
        let scope = scope_arg(args)?;
        let dest = PathBuf::from(required_str(args, "dest_dir")?);
        let file_types = file_types(args);

        let targets: Vec<StoredTarget> = {
            let state = self.state.lock();
            if !state.scopes.contains(scope) {
                return Err(self.missing_scope(scope));
            }
            state
                .targets
                .iter()
                .filter(|t| t.target.scope == scope)
                .cloned()
                .collect()
        };
        tokio::fs::create_dir_all(&dest).await?;

        let mut files = Vec::new();
        let mut per_target = Vec::with_capacity(targets.len());
        for stored in &targets {
            let mut downloaded = 0;
            for attachment in stored.attachments.iter().filter(|a| wanted(&a.name, &file_types)) {
                let path = dest.join(format!("{}_{}", stored.target.id, attachment.name));
                tokio::fs::write(&path, &attachment.bytes).await?;
                files.push(path.display().to_string());
                downloaded += 1;
            }
            per_target.push(json!({ "target_id": stored.target.id, "downloaded": downloaded }));
        }

        Ok(json!({ "scope": scope, "targets": per_target, "files": files }))
    }

    fn missing_scope(&self, scope: &str) -> SourceError {
        SourceError::not_found(format!(
            "{} '{}' not found or not accessible",
            self.scope_noun(),
            scope
        ))
    }
}

/// Lower-cased extensions from a `file_types` argument, leading dots dropped.
fn file_types(args: &Value) -> Vec<String> {
    args.get("file_types")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|t| t.as_str())
                .map(|t| t.trim_start_matches('.').to_lowercase())
                .collect()
        })
        .unwrap_or_default()
}

fn wanted(name: &str, file_types: &[String]) -> bool {
    if file_types.is_empty() {
        return true;
    }
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    file_types.contains(&ext)
}

/// The space, project, or library an operation is scoped to.
fn scope_arg(args: &Value) -> SourceResult<&str> {
    ["space_key", "project_key", "library", "scope"]
        .iter()
        .find_map(|key| args.get(*key).and_then(|v| v.as_str()))
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| SourceError::invalid_input("missing required argument 'space_key' or 'project_key'"))
}

#[async_trait]
impl TargetStore for InMemorySource {
    fn system(&self) -> SourceSystem {
        self.system
    }

    async fn lookup(&self, scope: &str, name: &str) -> SourceResult<TargetRef> {
        self.enter(MemoryOp::Lookup)?;
        let state = self.state.lock();
        state
            .targets
            .iter()
            .find(|t| self.matches(&t.target, scope, name))
            .map(|t| t.target.clone())
            .ok_or_else(|| {
                SourceError::not_found(format!(
                    "{} '{}' not found in {} {}",
                    self.noun(),
                    name,
                    self.scope_noun(),
                    scope
                ))
            })
    }

    async fn create(&self, scope: &str, name: &str, _body: &str, fields: &CreateFields) -> SourceResult<TargetRef> {
        self.enter(MemoryOp::Create)?;
        let mut state = self.state.lock();

        if !state.scopes.contains(scope) {
            return Err(self.missing_scope(scope));
        }

        if let Some(pos) = state
            .races
            .iter()
            .position(|(s, n)| s == scope && n == name)
        {
            state.races.remove(pos);
            let target = self.mint(&mut state, scope, name);
            state.targets.push(StoredTarget {
                target,
                fields: CreateFields::default(),
                attachments: Vec::new(),
            });
            return Err(SourceError::conflict(format!(
                "{} '{}' already exists in {} {}",
                self.noun(),
                name,
                self.scope_noun(),
                scope
            )));
        }

        if state.targets.iter().any(|t| self.matches(&t.target, scope, name)) {
            return Err(SourceError::conflict(format!(
                "{} '{}' already exists in {} {}",
                self.noun(),
                name,
                self.scope_noun(),
                scope
            )));
        }

        let target = self.mint(&mut state, scope, name);
        debug!(system = %self.system, id = %target.id, "Created in-memory target");
        state.targets.push(StoredTarget {
            target: target.clone(),
            fields: fields.clone(),
            attachments: Vec::new(),
        });
        Ok(target)
    }

    async fn upload(&self, target: &TargetRef, file: &Path, file_name: Option<&str>) -> SourceResult<UploadReceipt> {
        self.enter(MemoryOp::Upload)?;
        let bytes = tokio::fs::read(file).await?;
        let size_bytes = bytes.len() as u64;
        if let Some(limit) = self.upload_limit_bytes() {
            if size_bytes > limit {
                return Err(SourceError::new(
                    ErrorKind::SizeLimitExceeded,
                    format!("{size_bytes} bytes exceeds the {limit} byte limit"),
                ));
            }
        }

        let file_name = file_name.map_or_else(|| file_name_of(file), str::to_string);
        let mut state = self.state.lock();
        let stored = state
            .targets
            .iter_mut()
            .find(|t| t.target.id == target.id)
            .ok_or_else(|| SourceError::not_found(format!("{} '{}' not found", self.noun(), target.id)))?;
        stored.attachments.push(StoredAttachment {
            name: file_name.clone(),
            bytes,
        });

        Ok(UploadReceipt {
            target_id: target.id.clone(),
            attachment_id: Some(format!("att-{}-{}", target.id, stored.attachments.len())),
            file_name,
            size_bytes,
        })
    }
}

#[async_trait]
impl SourceClient for InMemorySource {
    fn system(&self) -> SourceSystem {
        self.system
    }

    async fn invoke(&self, operation: &str, args: Value) -> SourceResult<Value> {
        self.enter(MemoryOp::Invoke)?;

        if operation == "download" {
            return self.download(&args).await;
        }
        if operation.starts_with("download_") && operation.ends_with("_attachments") {
            return self.download_scope(&args).await;
        }
        if operation == "create_folder" {
            let name = required_str(&args, "name")?;
            let created = self.state.lock().scopes.insert(name.to_string());
            return Ok(json!({ "name": name, "created": created }));
        }

        let state = self.state.lock();
        match operation {
            op if op.starts_with("list_")
                && ["spaces", "projects", "libraries", "folders", "sites"]
                    .iter()
                    .any(|s| op.ends_with(s)) =>
            {
                let mut scopes: Vec<&String> = state.scopes.iter().collect();
                scopes.sort();
                Ok(json!({ "results": scopes }))
            }
            "list_attachments" => {
                let id = args
                    .get("target_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| SourceError::invalid_input("missing required argument 'target_id'"))?;
                let stored = state
                    .targets
                    .iter()
                    .find(|t| t.target.id == id || t.target.title == id)
                    .ok_or_else(|| SourceError::not_found(format!("No {} with id '{id}'", self.noun())))?;
                let names: Vec<&str> = stored.attachments.iter().map(|a| a.name.as_str()).collect();
                Ok(json!({ "target_id": stored.target.id, "attachments": names }))
            }
            op if op.starts_with("search") || op == "list_files" => {
                let query = args
                    .get("query")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_lowercase();
                let scope = args.get("scope").and_then(|v| v.as_str());
                let hits: Vec<&TargetRef> = state
                    .targets
                    .iter()
                    .map(|t| &t.target)
                    .filter(|t| scope.map_or(true, |s| t.scope == s))
                    .filter(|t| query.is_empty() || t.title.to_lowercase().contains(&query))
                    .collect();
                Ok(json!({ "results": hits }))
            }
            op if op.ends_with("_statistics") => {
                let scope = args.get("scope").and_then(|v| v.as_str());
                let scoped: Vec<&StoredTarget> = state
                    .targets
                    .iter()
                    .filter(|t| scope.map_or(true, |s| t.target.scope == s))
                    .collect();
                let attachments: usize = scoped.iter().map(|t| t.attachments.len()).sum();
                Ok(json!({ "targets": scoped.len(), "attachments": attachments }))
            }
            "get_space_info" | "get_project_info" => {
                let scope = scope_arg(&args)?;
                if !state.scopes.contains(scope) {
                    return Err(self.missing_scope(scope));
                }
                let scoped: Vec<&StoredTarget> = state.targets.iter().filter(|t| t.target.scope == scope).collect();
                let attachments: usize = scoped.iter().map(|t| t.attachments.len()).sum();
                Ok(json!({ "key": scope, "targets": scoped.len(), "attachments": attachments }))
            }
            op if op.ends_with("_details") => {
                let id = ["issue_key", "content_id", "id", "target_id"]
                    .iter()
                    .find_map(|key| args.get(*key).and_then(|v| v.as_str()))
                    .ok_or_else(|| SourceError::invalid_input(format!("missing {} id", self.noun())))?;
                let stored = state
                    .targets
                    .iter()
                    .find(|t| t.target.id == id || t.target.title == id)
                    .ok_or_else(|| SourceError::not_found(format!("No {} with id '{id}'", self.noun())))?;
                let names: Vec<&str> = stored.attachments.iter().map(|a| a.name.as_str()).collect();
                Ok(json!({ "target": stored.target, "fields": stored.fields, "attachments": names }))
            }
            op if op.ends_with("_info") => {
                let id = args
                    .get("id")
                    .or_else(|| args.get("target_id"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| SourceError::invalid_input("missing required argument 'id'"))?;
                let stored = state
                    .targets
                    .iter()
                    .find(|t| t.target.id == id || t.target.title == id)
                    .ok_or_else(|| SourceError::not_found(format!("No {} with id '{id}'", self.noun())))?;
                Ok(json!({ "target": stored.target, "attachments": stored.attachments.len() }))
            }
            other => Err(SourceError::invalid_input(format!(
                "{} does not support operation '{other}'",
                self.system.display_name()
            ))),
        }
    }

    fn targets(&self) -> Option<&dyn TargetStore> {
        if self.system.supports_targets() {
            Some(self)
        } else {
            None
        }
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_missing_is_not_found() {
        let source = InMemorySource::new(SourceSystem::Confluence).with_scope("DOCS");
        let err = source.lookup("DOCS", "Nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(source.calls().lookups, 1);
    }

    #[tokio::test]
    async fn create_in_unknown_scope_fails() {
        let source = InMemorySource::new(SourceSystem::Confluence);
        let err = source.create("NOPE", "Page", "", &CreateFields::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let source = InMemorySource::new(SourceSystem::Confluence).with_target("DOCS", "Page");
        let err = source.create("DOCS", "Page", "", &CreateFields::default()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn jira_lookup_matches_key_and_summary() {
        let source = InMemorySource::new(SourceSystem::Jira).with_target("PROJ", "Invoice review");
        let by_summary = source.lookup("PROJ", "  invoice REVIEW ").await.unwrap();
        let by_key = source.lookup("PROJ", &by_summary.id.to_lowercase()).await.unwrap();
        assert_eq!(by_summary, by_key);
        assert!(by_key.id.starts_with("PROJ-"));
    }

    #[tokio::test]
    async fn injected_failure_is_consumed_once() {
        let source = InMemorySource::new(SourceSystem::Jira).with_target("PROJ", "Task");
        source.fail_next(MemoryOp::Lookup, SourceError::network("connection reset"));
        assert_eq!(
            source.lookup("PROJ", "Task").await.unwrap_err().kind,
            ErrorKind::NetworkFailure
        );
        assert!(source.lookup("PROJ", "Task").await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_rejects_later_calls() {
        let source = InMemorySource::new(SourceSystem::SharePoint).with_scope("Documents");
        source.shutdown().await;
        let err = source.invoke("list_libraries", json!({})).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NetworkFailure);
    }

    #[tokio::test]
    async fn details_report_create_fields_and_attachment_names() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scan.pdf");
        std::fs::write(&file, b"%PDF").unwrap();
        let source = InMemorySource::new(SourceSystem::Jira).with_scope("OPS");
        let fields = CreateFields {
            issue_type: Some("Bug".into()),
            priority: Some("High".into()),
        };
        let issue = source.create("OPS", "Outage", "", &fields).await.unwrap();
        source.upload(&issue, &file, Some("outage-report.pdf")).await.unwrap();

        let details = source
            .invoke("get_issue_details", json!({"issue_key": issue.id}))
            .await
            .unwrap();
        assert_eq!(details["fields"]["issue_type"], "Bug");
        assert_eq!(details["attachments"], json!(["outage-report.pdf"]));

        let info = source.invoke("get_project_info", json!({"project_key": "OPS"})).await.unwrap();
        assert_eq!(info["targets"], 1);
        assert_eq!(info["attachments"], 1);
        let err = source
            .invoke("get_project_info", json!({"project_key": "NOPE"}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn scope_download_prefixes_files_with_target_id() {
        let dir = tempfile::tempdir().unwrap();
        let source = InMemorySource::new(SourceSystem::Confluence)
            .with_target("DOCS", "A")
            .with_target("DOCS", "B")
            .with_target("HR", "C")
            .with_attachment("DOCS", "A", "report.pdf", b"%PDF")
            .with_attachment("DOCS", "B", "report.pdf", b"%PDF")
            .with_attachment("DOCS", "B", "logo.png", b"png")
            .with_attachment("HR", "C", "other.pdf", b"%PDF");

        let value = source
            .invoke(
                "download_space_attachments",
                json!({"space_key": "DOCS", "dest_dir": dir.path(), "file_types": ["pdf"]}),
            )
            .await
            .unwrap();

        let files = value["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.as_str().unwrap().ends_with("_report.pdf")));
        assert_eq!(value["targets"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn gdrive_exposes_no_targets() {
        let source = InMemorySource::new(SourceSystem::GDrive);
        assert!(source.targets().is_none());
    }
}
