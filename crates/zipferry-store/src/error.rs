//! Error types for zipferry-store.

use std::io;
use thiserror::Error;

use crate::retry::RetryClass;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {container}/{key}")]
    NotFound { container: String, key: String },

    #[error("invalid object key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("object {key} is {size} bytes, limit is {limit}")]
    TooLarge { key: String, size: u64, limit: u64 },

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("metadata encoding failed: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RetryClass for StoreError {
    fn retry_class(&self) -> String {
        match self {
            Self::NotFound { .. } => "NotFound".to_string(),
            Self::InvalidKey { .. } => "InvalidKey".to_string(),
            Self::TooLarge { .. } => "TooLarge".to_string(),
            Self::Throttled(code) => format!("Throttled {code}"),
            Self::ConnectionReset(_) => "ConnectionReset".to_string(),
            Self::Unavailable(_) => "Unavailable".to_string(),
            Self::Timeout(_) => "Timeout".to_string(),
            Self::Metadata(_) => "Metadata".to_string(),
            Self::Io(e) => format!("Io {}", e.retry_class()),
        }
    }
}

impl StoreError {
    pub fn not_found(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            container: container.into(),
            key: key.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
