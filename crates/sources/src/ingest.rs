//! Vector-store ingestion collaborator.
//!
//! An [`Ingestor`] turns one local file into a stream of [`IngestEvent`]s that
//! ends with a structured [`IngestReport`]. [`ingest_file`] consumes that
//! stream under a deadline and applies the skip and cleanup rules.

use crate::client::{SourceResult, file_name_of};
use crate::local_pdf::is_pdf;
use async_trait::async_trait;
use docrelay_common::{ErrorKind, OperationError, SourceError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of ingesting one processed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    AlreadyIngested,
    Failed,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::AlreadyIngested => "already_ingested",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub status: IngestStatus,
    #[serde(default)]
    pub detail: String,
}

impl IngestReport {
    pub fn new(status: IngestStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status != IngestStatus::Failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    /// Progress output, kept for diagnostics
    Line(String),
    /// Terminal status. Nothing follows it.
    Finished(IngestReport),
}

#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Start ingesting `path`. Each call re-scans the file from scratch.
    async fn ingest(&self, path: &Path) -> SourceResult<mpsc::Receiver<IngestEvent>>;
}

/// Classify one line of ingestion output.
///
/// JSON lines of the form `{"status": "...", "detail": "..."}` are taken as
/// structured reports. Plain text falls back to the legacy markers.
pub fn classify_line(line: &str) -> Option<IngestReport> {
    let trimmed = line.trim();
    if trimmed.starts_with('{') {
        if let Ok(report) = serde_json::from_str::<IngestReport>(trimmed) {
            return Some(report);
        }
    }
    // Success markers take precedence over "Error".
    if trimmed.contains("Added") && trimmed.contains("chunks") {
        Some(IngestReport::new(IngestStatus::Success, trimmed))
    } else if trimmed.contains("already ingested") {
        Some(IngestReport::new(IngestStatus::AlreadyIngested, trimmed))
    } else if trimmed.contains("Error") {
        Some(IngestReport::new(IngestStatus::Failed, trimmed))
    } else {
        None
    }
}

/// Runs an external ingestion command with the file path appended.
pub struct CommandIngestor {
    program: String,
    args: Vec<String>,
}

impl CommandIngestor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Ingestor for CommandIngestor {
    async fn ingest(&self, path: &Path) -> SourceResult<mpsc::Receiver<IngestEvent>> {
        debug!(program = %self.program, file = %path.display(), "Starting ingestion command");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SourceError::new(
                    ErrorKind::IngestionFailure,
                    format!("Failed to start {}: {}", self.program, e),
                )
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            SourceError::new(ErrorKind::IngestionFailure, "ingestion command has no stdout")
        })?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut verdict: Option<IngestReport> = None;

            while let Ok(Some(line)) = lines.next_line().await {
                let report = classify_line(&line);
                if tx.send(IngestEvent::Line(line)).await.is_err() {
                    // Receiver gone (deadline or caller dropped); the child is killed on drop.
                    return;
                }
                match report {
                    Some(r) if r.status == IngestStatus::Failed => {
                        let _ = tx.send(IngestEvent::Finished(r)).await;
                        return;
                    }
                    Some(r) => verdict = Some(r),
                    None => {}
                }
            }

            let report = match (verdict, child.wait().await) {
                (Some(r), _) => r,
                (None, Ok(status)) if !status.success() => IngestReport::new(
                    IngestStatus::Failed,
                    format!("ingestion command exited with {status}"),
                ),
                (None, Ok(_)) => IngestReport::new(
                    IngestStatus::Failed,
                    "ingestion command finished without a status",
                ),
                (None, Err(e)) => IngestReport::new(IngestStatus::Failed, format!("wait failed: {e}")),
            };
            let _ = tx.send(IngestEvent::Finished(report)).await;
        });

        Ok(rx)
    }
}

enum Script {
    Events(Vec<IngestEvent>),
    Hang,
}

/// Replays prepared event sequences, one per call.
///
/// With nothing queued every call succeeds.
#[derive(Default)]
pub struct ScriptedIngestor {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<PathBuf>>,
    /// Senders of hung scripts, held so their channels stay open
    parked: Mutex<Vec<mpsc::Sender<IngestEvent>>>,
}

impl ScriptedIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_events(self, events: Vec<IngestEvent>) -> Self {
        self.scripts.lock().push_back(Script::Events(events));
        self
    }

    /// Queue a run that streams `lines` and ends in failure.
    pub fn then_failure(self, lines: &[&str]) -> Self {
        let mut events: Vec<IngestEvent> = lines.iter().map(|l| IngestEvent::Line(l.to_string())).collect();
        events.push(IngestEvent::Finished(IngestReport::new(
            IngestStatus::Failed,
            lines.last().copied().unwrap_or("ingestion failed"),
        )));
        self.then_events(events)
    }

    /// Queue a run that never finishes.
    pub fn then_hang(self) -> Self {
        self.scripts.lock().push_back(Script::Hang);
        self
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Ingestor for ScriptedIngestor {
    async fn ingest(&self, path: &Path) -> SourceResult<mpsc::Receiver<IngestEvent>> {
        self.calls.lock().push(path.to_path_buf());
        let script = self.scripts.lock().pop_front();
        let events = match script {
            Some(Script::Hang) => {
                let (tx, rx) = mpsc::channel(1);
                self.parked.lock().push(tx);
                return Ok(rx);
            }
            Some(Script::Events(events)) => events,
            None => vec![
                IngestEvent::Line(format!("Processing {}", file_name_of(path))),
                IngestEvent::Finished(IngestReport::new(IngestStatus::Success, "Added 1 chunks")),
            ],
        };

        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            // Capacity covers every event, so this never waits.
            let _ = tx.try_send(event);
        }
        Ok(rx)
    }
}

/// How [`ingest_file`] treats one file.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Delete the local file after a successful ingestion
    pub cleanup_after_ingest: bool,
    /// How many trailing status lines to keep in the outcome
    pub keep_messages: usize,
    /// Directory created on the caller's behalf. Removed when cleanup empties it.
    pub managed_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            cleanup_after_ingest: false,
            keep_messages: 3,
            managed_dir: None,
            timeout: Duration::from_secs(300),
        }
    }
}

/// What happened to one file handed to ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestionOutcome {
    Ingested {
        file: String,
        status: IngestStatus,
        detail: String,
        cleaned_up: bool,
        messages: Vec<String>,
    },
    Skipped {
        file: String,
        reason: String,
    },
    Failed {
        file: String,
        error: OperationError,
        messages: Vec<String>,
    },
}

impl IngestionOutcome {
    pub fn skipped_non_pdf(file: &Path) -> Self {
        Self::Skipped {
            file: file_name_of(file),
            reason: "File skipped for ingestion - only PDFs are supported".to_string(),
        }
    }

    pub fn processed(&self) -> u32 {
        matches!(self, Self::Ingested { .. }) as u32
    }

    pub fn skipped(&self) -> u32 {
        matches!(self, Self::Skipped { .. }) as u32
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

fn failed(path: &Path, kind: ErrorKind, message: impl Into<String>, messages: Vec<String>) -> IngestionOutcome {
    IngestionOutcome::Failed {
        file: file_name_of(path),
        error: OperationError {
            kind,
            message: message.into(),
        },
        messages,
    }
}

/// Ingest one file, honouring the skip, deadline, and cleanup rules.
///
/// Never returns an error: every failure is folded into the outcome.
pub async fn ingest_file(
    ingestor: &dyn Ingestor,
    path: &Path,
    options: &IngestOptions,
    deadline: Option<Instant>,
) -> IngestionOutcome {
    if !is_pdf(path) {
        debug!(file = %path.display(), "Skipping ingestion for non-PDF file");
        return IngestionOutcome::skipped_non_pdf(path);
    }
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return failed(path, ErrorKind::NotFound, "File not found", Vec::new());
    }

    let own_deadline = Instant::now() + options.timeout;
    let deadline = deadline.map_or(own_deadline, |d| d.min(own_deadline));
    let keep = options.keep_messages.max(1);
    let mut recent: VecDeque<String> = VecDeque::with_capacity(keep);

    let scan = async {
        let mut rx = ingestor.ingest(path).await?;
        while let Some(event) = rx.recv().await {
            match event {
                IngestEvent::Line(line) => {
                    if recent.len() == keep {
                        recent.pop_front();
                    }
                    recent.push_back(line);
                }
                IngestEvent::Finished(report) => return Ok(report),
            }
        }
        Ok::<IngestReport, SourceError>(IngestReport::new(
            IngestStatus::Failed,
            "ingestion stream ended without a status",
        ))
    };

    let result = tokio::time::timeout_at(deadline, scan).await;
    let messages: Vec<String> = recent.into_iter().collect();

    let report = match result {
        Err(_) => {
            warn!(file = %path.display(), "Ingestion deadline elapsed");
            return failed(path, ErrorKind::Timeout, "Ingestion did not finish before the deadline", messages);
        }
        Ok(Err(e)) => return failed(path, e.kind, e.message, messages),
        Ok(Ok(report)) => report,
    };

    if !report.succeeded() {
        warn!(file = %path.display(), detail = %report.detail, "PDF processing failed");
        return failed(
            path,
            ErrorKind::IngestionFailure,
            format!("PDF processing failed: {}", report.detail),
            messages,
        );
    }

    info!(file = %path.display(), status = ?report.status, "Ingested file");
    let cleaned_up = options.cleanup_after_ingest && cleanup(path, options.managed_dir.as_deref()).await;

    IngestionOutcome::Ingested {
        file: file_name_of(path),
        status: report.status,
        detail: report.detail,
        cleaned_up,
        messages,
    }
}

/// Delete an ingested file and, when it emptied the managed directory, the directory too.
async fn cleanup(path: &Path, managed_dir: Option<&Path>) -> bool {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(file = %path.display(), error = %e, "Failed to delete ingested file");
        return false;
    }
    debug!(file = %path.display(), "Deleted ingested file");

    if let (Some(parent), Some(managed)) = (path.parent(), managed_dir) {
        if parent == managed {
            remove_dir_if_empty(managed).await;
        }
    }
    true
}

/// Best-effort removal of an empty directory.
pub async fn remove_dir_if_empty(dir: &Path) {
    let empty = match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => return,
    };
    if empty {
        match tokio::fs::remove_dir(dir).await {
            Ok(()) => debug!(dir = %dir.display(), "Removed empty download directory"),
            Err(e) => debug!(dir = %dir.display(), error = %e, "Could not remove download directory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf_in(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        path
    }

    #[test]
    fn classifies_legacy_markers() {
        assert_eq!(
            classify_line("Added 12 chunks to collection").map(|r| r.status),
            Some(IngestStatus::Success)
        );
        assert_eq!(
            classify_line("report.pdf already ingested, skipping").map(|r| r.status),
            Some(IngestStatus::AlreadyIngested)
        );
        assert_eq!(
            classify_line("Error: could not parse page 3").map(|r| r.status),
            Some(IngestStatus::Failed)
        );
        assert_eq!(classify_line("Extracting page 1"), None);
    }

    #[test]
    fn success_marker_wins_over_error_text() {
        assert_eq!(
            classify_line("Added 12 chunks (Error pages: 0)").map(|r| r.status),
            Some(IngestStatus::Success)
        );
        assert_eq!(
            classify_line("already ingested (Error log empty)").map(|r| r.status),
            Some(IngestStatus::AlreadyIngested)
        );
    }

    #[test]
    fn classifies_structured_lines() {
        let report = classify_line(r#"{"status": "already_ingested", "detail": "hash match"}"#).unwrap();
        assert_eq!(report.status, IngestStatus::AlreadyIngested);
        assert_eq!(report.detail, "hash match");
    }

    #[tokio::test]
    async fn non_pdf_is_skipped_without_calling_ingestor() {
        let ingestor = ScriptedIngestor::new();
        let outcome = ingest_file(&ingestor, Path::new("diagram.png"), &IngestOptions::default(), None).await;
        assert_eq!(outcome.skipped(), 1);
        assert_eq!(outcome.processed(), 0);
        assert!(ingestor.calls().is_empty());
    }

    #[tokio::test]
    async fn failure_keeps_last_three_lines_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = pdf_in(dir.path(), "a.pdf");
        let ingestor = ScriptedIngestor::new().then_failure(&["one", "two", "three", "Error: boom"]);
        let options = IngestOptions {
            cleanup_after_ingest: true,
            ..Default::default()
        };

        let outcome = ingest_file(&ingestor, &file, &options, None).await;
        match outcome {
            IngestionOutcome::Failed { error, messages, .. } => {
                assert_eq!(error.kind, ErrorKind::IngestionFailure);
                assert_eq!(messages, vec!["two", "three", "Error: boom"]);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(file.exists());
    }

    #[tokio::test]
    async fn success_with_cleanup_removes_file_and_empty_managed_dir() {
        let root = tempfile::tempdir().unwrap();
        let managed = root.path().join("downloads");
        std::fs::create_dir(&managed).unwrap();
        let file = pdf_in(&managed, "a.pdf");
        let options = IngestOptions {
            cleanup_after_ingest: true,
            managed_dir: Some(managed.clone()),
            ..Default::default()
        };

        let outcome = ingest_file(&ScriptedIngestor::new(), &file, &options, None).await;
        assert_eq!(outcome.processed(), 1);
        assert!(!file.exists());
        assert!(!managed.exists());
    }

    #[tokio::test]
    async fn cleanup_leaves_non_empty_managed_dir() {
        let root = tempfile::tempdir().unwrap();
        let managed = root.path().join("downloads");
        std::fs::create_dir(&managed).unwrap();
        let file = pdf_in(&managed, "a.pdf");
        pdf_in(&managed, "b.pdf");
        let options = IngestOptions {
            cleanup_after_ingest: true,
            managed_dir: Some(managed.clone()),
            ..Default::default()
        };

        ingest_file(&ScriptedIngestor::new(), &file, &options, None).await;
        assert!(!file.exists());
        assert!(managed.exists());
    }

    #[tokio::test]
    async fn deadline_aborts_a_stuck_scan() {
        let dir = tempfile::tempdir().unwrap();
        let file = pdf_in(dir.path(), "a.pdf");
        let ingestor = ScriptedIngestor::new().then_hang();
        let deadline = Instant::now() + Duration::from_millis(50);

        let outcome = ingest_file(&ingestor, &file, &IngestOptions::default(), Some(deadline)).await;
        match outcome {
            IngestionOutcome::Failed { error, .. } => assert_eq!(error.kind, ErrorKind::Timeout),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_without_status_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = pdf_in(dir.path(), "a.pdf");
        let ingestor = ScriptedIngestor::new().then_events(vec![IngestEvent::Line("partial".into())]);
        let outcome = ingest_file(&ingestor, &file, &IngestOptions::default(), None).await;
        assert!(outcome.is_failure());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_ingestor_reads_legacy_output() {
        let dir = tempfile::tempdir().unwrap();
        let file = pdf_in(dir.path(), "a.pdf");
        let ingestor = CommandIngestor::new(
            "sh",
            vec!["-c".into(), "echo 'Reading'; echo 'Added 4 chunks'".into(), "ingest".into()],
        );
        let outcome = ingest_file(&ingestor, &file, &IngestOptions::default(), None).await;
        match outcome {
            IngestionOutcome::Ingested { status, messages, .. } => {
                assert_eq!(status, IngestStatus::Success);
                assert_eq!(messages, vec!["Reading", "Added 4 chunks"]);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_ingestor_stops_at_first_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = pdf_in(dir.path(), "a.pdf");
        let ingestor = CommandIngestor::new(
            "sh",
            vec![
                "-c".into(),
                "echo 'Error: bad xref'; echo 'Added 4 chunks'".into(),
                "ingest".into(),
            ],
        );
        let outcome = ingest_file(&ingestor, &file, &IngestOptions::default(), None).await;
        assert!(outcome.is_failure());
    }
}
