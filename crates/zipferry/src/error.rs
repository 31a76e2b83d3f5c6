//! Error types and failure classification for the pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zipferry_store::{RetryClass, RetryError, StoreError};

use crate::pipeline::InvocationReport;

/// How a failure affects processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Archive or entry data cannot be decoded. Not retried.
    CorruptInput,
    /// Entry count, size, ratio or memory limit breached. Aborts the archive.
    ResourceLimitExceeded,
    /// Storage failure that outlived its retries.
    TransientIo,
    /// Bad reference or oversized archive. Never retried.
    ValidationFailure,
    /// Anything else isolated to one entry.
    PerEntryFailure,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("archive {key} is {size} bytes, above the {limit} byte limit")]
    ArchiveTooLarge { key: String, size: u64, limit: u64 },

    #[error("invalid storage event: {0}")]
    InvalidEvent(String),

    #[error("memory circuit breaker open at {checkpoint}")]
    MemoryPressure { checkpoint: String },

    #[error("{operation} timed out after {attempts} attempt(s)")]
    Timeout { operation: String, attempts: u32 },

    #[error(transparent)]
    Archive(#[from] zipferry_archive::Error),

    #[error(transparent)]
    Transform(#[from] zipferry_transform::Error),

    #[error(transparent)]
    Storage(#[from] RetryError<StoreError>),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        use zipferry_archive::Error as ArchiveError;

        match self {
            Self::ArchiveTooLarge { .. } | Self::InvalidEvent(_) => FailureKind::ValidationFailure,
            Self::MemoryPressure { .. } => FailureKind::ResourceLimitExceeded,
            Self::Archive(ArchiveError::Limit(_) | ArchiveError::SizeMismatch { .. }) => {
                FailureKind::ResourceLimitExceeded
            }
            Self::Archive(ArchiveError::UnsupportedFormat | ArchiveError::Corrupted { .. }) => {
                FailureKind::CorruptInput
            }
            Self::Archive(ArchiveError::ReadFailed { .. }) => FailureKind::PerEntryFailure,
            Self::Transform(_) => FailureKind::CorruptInput,
            Self::Timeout { .. } => FailureKind::TransientIo,
            Self::Storage(e) if e.is_exhausted() => FailureKind::TransientIo,
            Self::Storage(RetryError::Aborted {
                source: StoreError::TooLarge { .. } | StoreError::InvalidKey { .. },
                ..
            }) => FailureKind::ValidationFailure,
            Self::Storage(_) => FailureKind::PerEntryFailure,
        }
    }

    /// Whether this error ends processing of the whole archive rather than
    /// one entry.
    pub fn aborts_archive(&self) -> bool {
        match self {
            Self::ArchiveTooLarge { .. } | Self::InvalidEvent(_) | Self::MemoryPressure { .. } => true,
            Self::Archive(e) => !matches!(e, zipferry_archive::Error::ReadFailed { .. }),
            Self::Transform(_) | Self::Storage(_) | Self::Timeout { .. } => false,
        }
    }
}

impl RetryClass for PipelineError {
    fn retry_class(&self) -> String {
        use zipferry_archive::Error as ArchiveError;
        use zipferry_transform::{Error as TransformError, ParseError};

        match self {
            Self::ArchiveTooLarge { .. } => "ArchiveTooLarge".to_string(),
            Self::InvalidEvent(_) => "InvalidEvent".to_string(),
            Self::MemoryPressure { .. } => "MemoryPressure".to_string(),
            Self::Timeout { .. } => "Timeout".to_string(),
            Self::Archive(ArchiveError::ReadFailed { source, .. }) => {
                format!("ReadFailed {}", source.retry_class())
            }
            Self::Archive(_) => "Archive".to_string(),
            Self::Transform(TransformError::Malformed {
                source: ParseError::Read(e),
                ..
            }) => format!("Read {}", e.retry_class()),
            Self::Transform(_) => "Malformed".to_string(),
            Self::Storage(RetryError::Exhausted { source, .. } | RetryError::Aborted { source, .. }) => {
                source.retry_class()
            }
            Self::Storage(RetryError::TimedOut { .. }) => "Timeout".to_string(),
        }
    }
}

/// Failure of a whole invocation.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("all {attempted} archive(s) in the invocation failed")]
    AllFailed {
        attempted: usize,
        report: Box<InvocationReport>,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
