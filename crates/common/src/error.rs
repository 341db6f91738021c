//! Error types for docrelay.
//!
//! Two layers exist. [`SourceError`] is the typed failure every source
//! operation returns; callers branch on its [`ErrorKind`]. [`DocrelayError`]
//! is the crate-level error for everything above the source layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories shared by every source and tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Target entity absent. Triggers the create fallback.
    NotFound,
    /// Target exists unexpectedly.
    Conflict,
    /// Local precondition, never sent over the network.
    SizeLimitExceeded,
    /// Credentials rejected. Never retried.
    AuthFailure,
    /// Transport-level failure.
    NetworkFailure,
    /// Reported as `skipped`, not as a failure.
    UnsupportedFileType,
    IngestionFailure,
    /// Bad arguments or an unknown operation.
    InvalidInput,
    /// A deadline elapsed before the step finished.
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::SizeLimitExceeded => "size_limit_exceeded",
            Self::AuthFailure => "auth_failure",
            Self::NetworkFailure => "network_failure",
            Self::UnsupportedFileType => "unsupported_file_type",
            Self::IngestionFailure => "ingestion_failure",
            Self::InvalidInput => "invalid_input",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }

    /// Whether a caller may reasonably try the same call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkFailure | Self::Timeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure raised by a source client, ingestor, or composite step.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct SourceError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SourceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkFailure, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::AuthFailure,
            std::io::ErrorKind::AlreadyExists => ErrorKind::Conflict,
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            _ => ErrorKind::Internal,
        };
        Self::new(kind, e.to_string())
    }
}

/// Serializable mirror of [`SourceError`] carried inside results and transcripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<SourceError> for OperationError {
    fn from(e: SourceError) -> Self {
        Self {
            kind: e.kind,
            message: e.message,
        }
    }
}

impl From<&SourceError> for OperationError {
    fn from(e: &SourceError) -> Self {
        Self {
            kind: e.kind,
            message: e.message.clone(),
        }
    }
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Error, Debug)]
pub enum DocrelayError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("LLM error: {0}")]
    Llm(String),

    /// Non-success HTTP status from an LLM provider.
    #[error("LLM provider returned {status}: {message}")]
    Provider {
        status: u16,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DocrelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(ErrorKind::NetworkFailure.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::AuthFailure.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::SizeLimitExceeded.is_retryable());
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = SourceError::from(io);
        assert!(err.is_not_found());
    }

    #[test]
    fn operation_error_serializes_kind_snake_case() {
        let err: OperationError = SourceError::new(ErrorKind::SizeLimitExceeded, "too big").into();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "size_limit_exceeded");
        assert_eq!(json["message"], "too big");
    }

    #[test]
    fn source_error_display_includes_kind() {
        let err = SourceError::conflict("page exists");
        assert_eq!(err.to_string(), "conflict: page exists");
    }
}
