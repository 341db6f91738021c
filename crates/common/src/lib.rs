//! Common types and traits shared across docrelay crates.
//!
//! This crate provides the error taxonomy, the source-system catalog, and
//! the value types the supervisor and specialists exchange.

pub mod error;
pub mod message;
pub mod request;
pub mod security;
pub mod source;
pub mod tool;
pub mod traits;

pub use error::{DocrelayError, ErrorKind, OperationError, Result, SourceError};
pub use message::{MessageRole, TranscriptMessage};
pub use request::{Request, Session, Turn};
pub use security::{PathPolicy, validate_local_path};
pub use source::{MIB, SourceSystem};
pub use tool::{ToolArguments, ToolInvocation};
pub use traits::{Agent, DelegatedTask, SpecialistReport};
