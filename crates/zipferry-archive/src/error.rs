use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not a zip archive")]
    UnsupportedFormat,

    #[error("archive is corrupted: {reason}")]
    Corrupted { reason: String },

    #[error("entry '{name}' produced more than its declared {declared} bytes")]
    SizeMismatch { name: String, declared: u64 },

    #[error("failed to read entry '{name}': {source}")]
    ReadFailed { name: String, source: io::Error },

    #[error(transparent)]
    Limit(#[from] LimitViolation),
}

impl Error {
    pub(crate) fn corrupted(err: impl std::fmt::Display) -> Self {
        Self::Corrupted {
            reason: err.to_string(),
        }
    }
}

/// A hard limit that rejects the remainder of an archive.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum LimitViolation {
    #[error("archive exceeds maximum entry count of {max} (at entry '{entry}')")]
    EntryCount { entry: String, max: usize },

    #[error("central directory declares {declared} records, above the {max} record limit")]
    DirectoryRecords { declared: u64, max: u64 },

    #[error(
        "entry '{entry}' has compression ratio {ratio:.1}:1 above the {max:.1}:1 limit (suspected decompression bomb)"
    )]
    CompressionRatio { entry: String, ratio: f64, max: f64 },

    #[error(
        "entry '{entry}' would raise total uncompressed size to {would_be} bytes, above the {max} byte limit"
    )]
    TotalSize { entry: String, would_be: u64, max: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
