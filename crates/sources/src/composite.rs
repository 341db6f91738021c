//! The Create-or-Upload composite operation.
//!
//! One state machine serves every target-bearing source:
//!
//! ```text
//! START -> TARGET_LOOKUP -> {TARGET_FOUND, TARGET_MISSING}
//!       -> TARGET_CREATE -> {CREATE_OK, CREATE_CONFLICT, CREATE_FAILED}
//!       -> UPLOAD -> {UPLOAD_OK, UPLOAD_FAILED}
//!       -> INGEST -> {INGEST_OK, INGEST_FAILED} -> DONE
//! ```
//!
//! Steps run strictly in sequence. Nothing is rolled back: a target created
//! before a failed upload stays in place so the upload can be retried.

use crate::client::{CreateFields, SourceResult, TargetRef, TargetStore, UploadReceipt, file_name_of};
use crate::ingest::{IngestOptions, IngestionOutcome, Ingestor, ingest_file};
use crate::local_pdf::is_pdf;
use docrelay_common::{ErrorKind, MIB, OperationError, SourceError, SourceSystem};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompositeState {
    Start,
    TargetLookup,
    TargetFound,
    TargetMissing,
    TargetCreate,
    CreateOk,
    CreateConflict,
    CreateFailed,
    Upload,
    UploadOk,
    UploadFailed,
    Ingest,
    IngestOk,
    IngestFailed,
    Done,
}

impl CompositeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::TargetLookup => "TARGET_LOOKUP",
            Self::TargetFound => "TARGET_FOUND",
            Self::TargetMissing => "TARGET_MISSING",
            Self::TargetCreate => "TARGET_CREATE",
            Self::CreateOk => "CREATE_OK",
            Self::CreateConflict => "CREATE_CONFLICT",
            Self::CreateFailed => "CREATE_FAILED",
            Self::Upload => "UPLOAD",
            Self::UploadOk => "UPLOAD_OK",
            Self::UploadFailed => "UPLOAD_FAILED",
            Self::Ingest => "INGEST",
            Self::IngestOk => "INGEST_OK",
            Self::IngestFailed => "INGEST_FAILED",
            Self::Done => "DONE",
        }
    }
}

impl std::fmt::Display for CompositeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when the named target does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPolicy {
    /// Upload only to an existing target
    MustExist,
    #[default]
    CreateIfMissing,
    /// The caller asked for a new target; lookup is skipped
    CreateNew,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeRequest {
    /// Space key, project key, or library
    pub scope: String,
    /// Page title, issue summary/key, or folder path
    pub name: String,
    pub file: PathBuf,
    /// Body for a created target. Defaults per source.
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub policy: TargetPolicy,
    #[serde(default)]
    pub ingest: bool,
    #[serde(default)]
    pub cleanup_after_ingest: bool,
    /// Issue type and priority for a created target
    #[serde(default)]
    pub fields: CreateFields,
    /// Attachment name to use instead of the local file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl CompositeRequest {
    pub fn new(scope: impl Into<String>, name: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
            file: file.into(),
            body: None,
            policy: TargetPolicy::CreateIfMissing,
            ingest: false,
            cleanup_after_ingest: false,
            fields: CreateFields::default(),
            file_name: None,
        }
    }

    pub fn with_policy(mut self, policy: TargetPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_ingestion(mut self, cleanup_after_ingest: bool) -> Self {
        self.ingest = true;
        self.cleanup_after_ingest = cleanup_after_ingest;
        self
    }

    pub fn with_fields(mut self, fields: CreateFields) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Lookup,
    Create,
    Upload,
    Ingest,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Lookup => "lookup",
            Self::Create => "create",
            Self::Upload => "upload",
            Self::Ingest => "ingest",
        })
    }
}

/// The stage that stopped or degraded the operation, with the original error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: OperationError,
}

/// Result of one step, in the same shape the tool protocol uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome<T> {
    Ok(T),
    Error(OperationError),
}

impl<T> StepOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Ok(v) => Some(v),
            Self::Error(_) => None,
        }
    }
}

impl<T> From<&SourceResult<T>> for StepOutcome<T>
where
    T: Clone,
{
    fn from(result: &SourceResult<T>) -> Self {
        match result {
            Ok(v) => Self::Ok(v.clone()),
            Err(e) => Self::Error(e.into()),
        }
    }
}

/// Everything a Create-or-Upload run did, step by step.
///
/// `ingestion` is present only when the upload succeeded and the file is a
/// PDF with ingestion requested, or when the file is not a PDF (then it is
/// always `skipped`, whatever the upload did).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeOperationResult {
    pub system: SourceSystem,
    pub scope: String,
    pub name: String,
    pub file: String,
    pub created_new_target: bool,
    pub target: Option<TargetRef>,
    pub lookup: Option<StepOutcome<TargetRef>>,
    pub create: Option<StepOutcome<TargetRef>>,
    pub upload: Option<StepOutcome<UploadReceipt>>,
    pub ingestion: Option<IngestionOutcome>,
    pub failure: Option<StageFailure>,
    pub transitions: Vec<CompositeState>,
}

impl CompositeOperationResult {
    fn new(system: SourceSystem, request: &CompositeRequest) -> Self {
        Self {
            system,
            scope: request.scope.clone(),
            name: request.name.clone(),
            file: file_name_of(&request.file),
            created_new_target: false,
            target: None,
            lookup: None,
            create: None,
            upload: None,
            ingestion: None,
            failure: None,
            transitions: Vec::new(),
        }
    }

    fn enter(&mut self, state: CompositeState) {
        debug!(system = %self.system, state = %state, "Composite transition");
        self.transitions.push(state);
    }

    fn fail(&mut self, stage: Stage, error: &SourceError) {
        warn!(system = %self.system, stage = %stage, error = %error, "Composite operation stage failed");
        if self.failure.is_none() {
            self.failure = Some(StageFailure {
                stage,
                error: error.into(),
            });
        }
    }

    /// The file reached the target.
    pub fn uploaded(&self) -> bool {
        self.upload.as_ref().is_some_and(StepOutcome::is_ok)
    }

    /// Every attempted stage succeeded.
    pub fn success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn final_state(&self) -> Option<CompositeState> {
        self.transitions.last().copied()
    }

    /// One-paragraph account for the reasoning loop and the user.
    pub fn summary(&self) -> String {
        let noun = self.system.target_noun().unwrap_or("target");
        let mut parts = Vec::new();

        if let Some(target) = &self.target {
            if self.created_new_target {
                parts.push(format!("Created {noun} '{}' ({}) in {}.", target.title, target.id, self.scope));
            } else {
                parts.push(format!("Using existing {noun} '{}' ({}) in {}.", target.title, target.id, self.scope));
            }
        }

        if let Some(StepOutcome::Ok(receipt)) = &self.upload {
            parts.push(format!(
                "Uploaded {} ({:.2} MB).",
                receipt.file_name,
                receipt.size_bytes as f64 / MIB as f64
            ));
        }

        match &self.ingestion {
            Some(IngestionOutcome::Ingested { status, .. }) => {
                parts.push(format!("Ingestion: {}.", status.as_str()));
            }
            Some(IngestionOutcome::Skipped { reason, .. }) => parts.push(format!("Ingestion skipped: {reason}.")),
            _ => {}
        }

        if let Some(failure) = &self.failure {
            parts.push(format!(
                "Failed at {} stage ({}): {}",
                failure.stage, failure.error.kind, failure.error.message
            ));
        }

        parts.join(" ")
    }
}

/// One Create-or-Upload run with its deadline and ingestion settings.
pub struct CompositeOperation {
    request: CompositeRequest,
    deadline: Option<Instant>,
    ingest_options: IngestOptions,
}

impl CompositeOperation {
    pub fn new(request: CompositeRequest) -> Self {
        Self {
            request,
            deadline: None,
            ingest_options: IngestOptions::default(),
        }
    }

    /// Abort any step still running `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_ingest_options(mut self, options: IngestOptions) -> Self {
        self.ingest_options = options;
        self
    }

    pub fn request(&self) -> &CompositeRequest {
        &self.request
    }

    async fn step<T>(&self, stage: Stage, fut: impl Future<Output = SourceResult<T>>) -> SourceResult<T> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .unwrap_or_else(|_| Err(SourceError::timeout(format!("{stage} step did not finish before the deadline")))),
            None => fut.await,
        }
    }

    /// Local checks that must pass before any transport call.
    async fn preflight(&self, store: &dyn TargetStore) -> SourceResult<u64> {
        let path = &self.request.file;
        let meta = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SourceError::not_found(format!("File not found: {}", path.display())),
            _ => SourceError::from(e),
        })?;
        if !meta.is_file() {
            return Err(SourceError::invalid_input(format!("Not a file: {}", path.display())));
        }
        if let Some(limit) = store.upload_limit_bytes() {
            if meta.len() > limit {
                return Err(SourceError::new(
                    ErrorKind::SizeLimitExceeded,
                    format!(
                        "File size {:.1} MB exceeds the {} MB {} limit",
                        meta.len() as f64 / MIB as f64,
                        limit / MIB,
                        store.system().display_name()
                    ),
                ));
            }
        }
        Ok(meta.len())
    }

    pub async fn run(&self, store: &dyn TargetStore, ingestor: &dyn Ingestor) -> CompositeOperationResult {
        let req = &self.request;
        let mut out = CompositeOperationResult::new(store.system(), req);
        let pdf = is_pdf(&req.file);

        out.enter(CompositeState::Start);
        if let Err(e) = self.preflight(store).await {
            out.upload = Some(StepOutcome::Error((&e).into()));
            out.enter(CompositeState::UploadFailed);
            out.fail(Stage::Upload, &e);
            if !pdf {
                out.ingestion = Some(IngestionOutcome::skipped_non_pdf(&req.file));
            }
            return out;
        }

        let found = if req.policy == TargetPolicy::CreateNew {
            None
        } else {
            out.enter(CompositeState::TargetLookup);
            let result = self.step(Stage::Lookup, store.lookup(&req.scope, &req.name)).await;
            out.lookup = Some((&result).into());
            match result {
                Ok(target) => {
                    out.enter(CompositeState::TargetFound);
                    Some(target)
                }
                Err(e) if e.is_not_found() => {
                    out.enter(CompositeState::TargetMissing);
                    if req.policy == TargetPolicy::MustExist {
                        out.fail(Stage::Lookup, &e);
                        return out;
                    }
                    None
                }
                Err(e) => {
                    out.fail(Stage::Lookup, &e);
                    return out;
                }
            }
        };

        let target = match found {
            Some(target) => target,
            None => {
                out.enter(CompositeState::TargetCreate);
                let body = req.body.clone().unwrap_or_else(|| store.default_body(&req.name));
                let result = self.step(Stage::Create, store.create(&req.scope, &req.name, &body, &req.fields)).await;
                out.create = Some((&result).into());
                match result {
                    Ok(target) => {
                        info!(system = %store.system(), id = %target.id, "Created target");
                        out.enter(CompositeState::CreateOk);
                        out.created_new_target = true;
                        target
                    }
                    // The conflict error carries no target, so look it up again.
                    Err(e) if e.kind == ErrorKind::Conflict => {
                        out.enter(CompositeState::CreateConflict);
                        let result = self.step(Stage::Lookup, store.lookup(&req.scope, &req.name)).await;
                        out.lookup = Some((&result).into());
                        match result {
                            Ok(target) => {
                                out.enter(CompositeState::TargetFound);
                                target
                            }
                            Err(e) => {
                                out.fail(Stage::Lookup, &e);
                                return out;
                            }
                        }
                    }
                    Err(e) => {
                        out.enter(CompositeState::CreateFailed);
                        out.fail(Stage::Create, &e);
                        return out;
                    }
                }
            }
        };
        out.target = Some(target.clone());

        out.enter(CompositeState::Upload);
        let result = self.step(Stage::Upload, store.upload(&target, &req.file, req.file_name.as_deref())).await;
        out.upload = Some((&result).into());
        match result {
            Ok(receipt) => {
                info!(system = %store.system(), target = %target.id, file = %receipt.file_name, "Uploaded file");
                out.enter(CompositeState::UploadOk);
            }
            Err(e) => {
                out.enter(CompositeState::UploadFailed);
                out.fail(Stage::Upload, &e);
                if !pdf {
                    out.ingestion = Some(IngestionOutcome::skipped_non_pdf(&req.file));
                }
                return out;
            }
        }

        if !pdf {
            out.ingestion = Some(IngestionOutcome::skipped_non_pdf(&req.file));
            out.enter(CompositeState::Done);
            return out;
        }
        if !req.ingest {
            out.enter(CompositeState::Done);
            return out;
        }

        out.enter(CompositeState::Ingest);
        let options = IngestOptions {
            cleanup_after_ingest: req.cleanup_after_ingest,
            ..self.ingest_options.clone()
        };
        let outcome = ingest_file(ingestor, &req.file, &options, self.deadline).await;
        if let IngestionOutcome::Failed { error, .. } = &outcome {
            out.enter(CompositeState::IngestFailed);
            out.fail(Stage::Ingest, &SourceError::new(error.kind, error.message.clone()));
        } else {
            out.enter(CompositeState::IngestOk);
        }
        out.ingestion = Some(outcome);
        out.enter(CompositeState::Done);
        out
    }
}
