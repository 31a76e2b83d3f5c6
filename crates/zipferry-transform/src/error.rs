//! Error types for zipferry-transform.

use std::io;
use thiserror::Error;

/// Why a CSV stream could not be parsed.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unterminated quoted field starting on line {line}")]
    UnterminatedQuote { line: u64 },

    #[error("unexpected character after closing quote on line {line}")]
    StrayQuote { line: u64 },

    #[error("invalid UTF-8 on line {line}")]
    InvalidUtf8 { line: u64 },

    #[error("row limit of {max} exceeded")]
    TooManyRows { max: usize },

    #[error("read failed: {0}")]
    Read(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed CSV in {filename}: {source}")]
    Malformed {
        filename: String,
        #[source]
        source: ParseError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
