//! Source collaborators and the workflows built on them.
//!
//! Every external system is reached through [`SourceClient`]; systems that
//! hold pages, issues, or folders also expose [`TargetStore`], which the
//! Create-or-Upload [`CompositeOperation`] drives.

pub mod batch;
pub mod client;
pub mod composite;
pub mod ingest;
pub mod local_pdf;
pub mod memory;
pub mod remote;

pub use batch::{BatchIngestResult, BatchOptions, download_and_ingest};
pub use client::{CreateFields, SourceClient, SourceResult, TargetRef, TargetStore, UploadReceipt};
pub use composite::{
    CompositeOperation, CompositeOperationResult, CompositeRequest, CompositeState, Stage,
    StageFailure, StepOutcome, TargetPolicy,
};
pub use ingest::{
    CommandIngestor, IngestEvent, IngestOptions, IngestReport, IngestStatus, IngestionOutcome,
    Ingestor, ScriptedIngestor, ingest_file,
};
pub use local_pdf::{LocalPdfSource, PdfEntry, is_pdf};
pub use memory::{CallCounts, InMemorySource, MemoryOp};
pub use remote::RemoteSource;
