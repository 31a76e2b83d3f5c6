//! Zip reading under adversarial-size assumptions.
//!
//! # Architecture
//!
//! - `reader.rs` - Lazy, pull-based zip entry reader with single-use entry streams
//! - `limits.rs` - Entry-count, compression-ratio and cumulative-size guard
//! - `sanitize.rs` - Entry name sanitization for output keys
//! - `stem.rs` - Filename stem (grouping key) extraction
//! - `entry.rs` - Central-directory entry view

pub use entry::ArchiveEntry;
pub use error::{Error, LimitViolation, Result};
pub use limits::{Admission, ResourceGuard, ResourceLimits};
pub use reader::{looks_like_zip, EntryStream, ZipReader};
pub use sanitize::{is_path_safe, sanitize_filename};
pub use stem::{extract_stem, parse_filename, FilenameComponents, UNKNOWN_STEM};

pub mod entry;
mod error;
pub mod limits;
mod reader;
pub mod sanitize;
pub mod stem;
