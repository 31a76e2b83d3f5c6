//! Cumulative admission limits applied before any entry is decompressed.

use tracing::trace;

use crate::entry::ArchiveEntry;
use crate::error::LimitViolation;

pub const DEFAULT_MAX_ENTRY_COUNT: usize = 10_000;
pub const DEFAULT_MAX_TOTAL_UNCOMPRESSED_BYTES: u64 = 200 * 1024 * 1024;
pub const DEFAULT_MAX_COMPRESSION_RATIO: f64 = 100.0;

/// Central-directory records allowed per admissible entry. Directories and
/// zero-byte entries are records that never count toward the entry limit.
pub const DIRECTORY_RECORD_SLACK: u64 = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResourceLimits {
    pub max_entry_count: usize,
    pub max_total_uncompressed_bytes: u64,
    pub max_compression_ratio: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_entry_count: DEFAULT_MAX_ENTRY_COUNT,
            max_total_uncompressed_bytes: DEFAULT_MAX_TOTAL_UNCOMPRESSED_BYTES,
            max_compression_ratio: DEFAULT_MAX_COMPRESSION_RATIO,
        }
    }
}

impl ResourceLimits {
    pub fn max_entry_count(mut self, n: usize) -> Self {
        self.max_entry_count = n;
        self
    }

    pub fn max_total_uncompressed_bytes(mut self, bytes: u64) -> Self {
        self.max_total_uncompressed_bytes = bytes;
        self
    }

    pub fn max_compression_ratio(mut self, ratio: f64) -> Self {
        self.max_compression_ratio = ratio;
        self
    }

    /// Most central-directory records an archive may declare before its
    /// directory is read at all.
    pub fn max_directory_records(&self) -> u64 {
        (self.max_entry_count as u64).saturating_mul(DIRECTORY_RECORD_SLACK)
    }
}

/// Outcome of presenting one entry to the guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Directory or zero-byte entry; neither processed nor an error.
    Skipped,
}

/// Tracks admitted entries against [`ResourceLimits`] for one archive.
///
/// Checks run in a fixed order (count, ratio, cumulative size) and the byte
/// total is only raised after every check passed, so the configured total is
/// a hard ceiling.
#[derive(Debug)]
pub struct ResourceGuard {
    limits: ResourceLimits,
    entries_admitted: usize,
    total_uncompressed_bytes: u64,
}

impl ResourceGuard {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            entries_admitted: 0,
            total_uncompressed_bytes: 0,
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn entries_admitted(&self) -> usize {
        self.entries_admitted
    }

    pub fn total_uncompressed_bytes(&self) -> u64 {
        self.total_uncompressed_bytes
    }

    pub fn admit(&mut self, entry: &ArchiveEntry) -> Result<Admission, LimitViolation> {
        if entry.is_skippable() {
            trace!(entry = %entry.name, directory = entry.is_directory, "entry skipped");
            return Ok(Admission::Skipped);
        }

        if self.entries_admitted >= self.limits.max_entry_count {
            return Err(LimitViolation::EntryCount {
                entry: entry.name.clone(),
                max: self.limits.max_entry_count,
            });
        }

        let ratio = entry.compression_ratio();
        if ratio > self.limits.max_compression_ratio {
            return Err(LimitViolation::CompressionRatio {
                entry: entry.name.clone(),
                ratio,
                max: self.limits.max_compression_ratio,
            });
        }

        let would_be = self
            .total_uncompressed_bytes
            .saturating_add(entry.uncompressed_size);
        if would_be > self.limits.max_total_uncompressed_bytes {
            return Err(LimitViolation::TotalSize {
                entry: entry.name.clone(),
                would_be,
                max: self.limits.max_total_uncompressed_bytes,
            });
        }

        self.entries_admitted += 1;
        self.total_uncompressed_bytes = would_be;
        Ok(Admission::Admitted)
    }
}
