//! Streaming CSV transform that appends a processing timestamp column.
//!
//! Input is parsed strictly one record at a time; the header heuristic looks
//! only at the first record. Output is re-serialized with minimal quoting.

mod error;
pub mod header;
pub mod reader;
mod transform;
pub mod writer;

pub use error::{Error, ParseError, Result};
pub use header::looks_like_header;
pub use reader::RecordReader;
pub use transform::{CsvOptions, CsvOutcome, CsvTransformer, DEFAULT_TIMESTAMP_COLUMN, TIMESTAMP_FORMAT};
