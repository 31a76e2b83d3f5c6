use std::io::BufRead;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{Error, ParseError, Result};
use crate::header::looks_like_header;
use crate::reader::RecordReader;
use crate::writer::write_record;

pub const DEFAULT_TIMESTAMP_COLUMN: &str = "_processed";

/// UTC, millisecond precision, e.g. `2026-10-19T08:15:30.123Z`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsvOptions {
    pub timestamp_column: String,
    /// Return no output instead of an error on malformed input.
    pub skip_malformed: bool,
    /// Data rows allowed per file; exceeding it counts as malformed.
    pub max_rows: Option<usize>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            timestamp_column: DEFAULT_TIMESTAMP_COLUMN.to_string(),
            skip_malformed: true,
            max_rows: None,
        }
    }
}

impl CsvOptions {
    pub fn timestamp_column(mut self, name: impl Into<String>) -> Self {
        self.timestamp_column = name.into();
        self
    }

    pub fn skip_malformed(mut self, skip: bool) -> Self {
        self.skip_malformed = skip;
        self
    }

    pub fn max_rows(mut self, max: Option<usize>) -> Self {
        self.max_rows = max;
        self
    }
}

/// Result of transforming one file.
///
/// `output: None` means the caller should publish the original bytes.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CsvOutcome {
    pub processed: bool,
    pub rows_processed: usize,
    pub output: Option<Vec<u8>>,
}

impl CsvOutcome {
    fn fallback() -> Self {
        Self::default()
    }
}

/// Appends a processing timestamp column to every row of a CSV file.
#[derive(Clone, Debug, Default)]
pub struct CsvTransformer {
    options: CsvOptions,
}

impl CsvTransformer {
    pub fn new(options: CsvOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CsvOptions {
        &self.options
    }

    pub fn transform<R: BufRead>(&self, reader: R, filename: &str) -> Result<CsvOutcome> {
        self.transform_at(reader, filename, Utc::now())
    }

    /// [`transform`](Self::transform) with the timestamp fixed to `now`.
    pub fn transform_at<R: BufRead>(
        &self,
        reader: R,
        filename: &str,
        now: DateTime<Utc>,
    ) -> Result<CsvOutcome> {
        let stamp = now.format(TIMESTAMP_FORMAT).to_string();
        let mut records = RecordReader::new(reader);
        let mut out = Vec::new();

        match self.rewrite(&mut records, &stamp, &mut out) {
            Ok(None) => {
                debug!(file = filename, "empty CSV, nothing to transform");
                Ok(CsvOutcome::fallback())
            }
            Ok(Some(rows)) => {
                debug!(file = filename, rows, bytes = out.len(), "CSV transformed");
                Ok(CsvOutcome {
                    processed: true,
                    rows_processed: rows,
                    output: Some(out),
                })
            }
            Err(e) if self.options.skip_malformed => {
                warn!(file = filename, line = records.line(), error = %e, "malformed CSV, keeping original");
                Ok(CsvOutcome::fallback())
            }
            Err(e) => Err(Error::Malformed {
                filename: filename.to_string(),
                source: e,
            }),
        }
    }

    /// Returns the number of data rows written, or `None` for empty input.
    fn rewrite<R: BufRead>(
        &self,
        records: &mut RecordReader<R>,
        stamp: &str,
        out: &mut Vec<u8>,
    ) -> std::result::Result<Option<usize>, ParseError> {
        let Some(first) = records.next_record()? else {
            return Ok(None);
        };

        let mut rows = 0;
        if looks_like_header(&first) {
            let column = self.options.timestamp_column.as_str();
            write_record(out, first.iter().map(String::as_str).chain([column]));
        } else {
            rows = self.count_row(rows)?;
            write_record(out, first.iter().map(String::as_str).chain([stamp]));
        }

        while let Some(record) = records.next_record()? {
            rows = self.count_row(rows)?;
            write_record(out, record.iter().map(String::as_str).chain([stamp]));
        }

        Ok(Some(rows))
    }

    fn count_row(&self, rows: usize) -> std::result::Result<usize, ParseError> {
        let rows = rows + 1;
        match self.options.max_rows {
            Some(max) if rows > max => Err(ParseError::TooManyRows { max }),
            _ => Ok(rows),
        }
    }
}
