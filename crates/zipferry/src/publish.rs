//! Classifies one entry, transforms it if it is a CSV file and uploads it.

use std::future;
use std::io::BufReader;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use zipferry_archive::{ArchiveEntry, ZipReader};
use zipferry_platform::MemoryCircuitBreaker;
use zipferry_store::{with_retry, Metadata, ObjectLocation, ObjectStore, RetryPolicy};
use zipferry_transform::{CsvOptions, CsvOutcome, CsvTransformer};

use crate::error::{PipelineError, Result};

pub const CSV_CONTENT_TYPE: &str = "text/csv";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub const META_SOURCE_ARCHIVE: &str = "source-archive";
pub const META_SOURCE_ENTRY: &str = "source-entry";
pub const META_REQUEST_ID: &str = "request-id";
pub const META_PROCESSED_AT: &str = "processed-at";
pub const META_CONTENT_SHA256: &str = "content-sha256";
pub const META_TRANSFORMED: &str = "transformed";

/// Best-effort content type from a file extension.
pub fn guess_content_type(name: &str) -> &'static str {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return DEFAULT_CONTENT_TYPE;
    };
    match ext.to_ascii_lowercase().as_str() {
        "csv" => CSV_CONTENT_TYPE,
        "tsv" => "text/tab-separated-values",
        "txt" | "log" => "text/plain",
        "json" => "application/json",
        "ndjson" | "jsonl" => "application/x-ndjson",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "gz" => "application/gzip",
        "zip" => "application/zip",
        "parquet" => "application/vnd.apache.parquet",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Where an entry goes and where it came from.
#[derive(Clone, Debug)]
pub struct Destination {
    pub location: ObjectLocation,
    pub source_archive: String,
    pub request_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishOutcome {
    pub location: ObjectLocation,
    pub bytes: usize,
    pub content_type: &'static str,
    pub transformed: bool,
    pub rows_processed: usize,
}

struct Body {
    bytes: Bytes,
    content_type: &'static str,
    transformed: bool,
    rows_processed: usize,
}

pub struct Publisher<S> {
    store: Arc<S>,
    breaker: Arc<MemoryCircuitBreaker>,
    transformer: CsvTransformer,
    csv_enabled: bool,
    storage_retry: RetryPolicy,
    transform_retry: RetryPolicy,
}

impl<S: ObjectStore> Publisher<S> {
    pub fn new(store: Arc<S>, breaker: Arc<MemoryCircuitBreaker>, csv: CsvOptions) -> Self {
        Self {
            store,
            breaker,
            transformer: CsvTransformer::new(csv),
            csv_enabled: true,
            storage_retry: RetryPolicy::storage(),
            transform_retry: RetryPolicy::transform(),
        }
    }

    pub fn csv_enabled(mut self, enabled: bool) -> Self {
        self.csv_enabled = enabled;
        self
    }

    pub fn storage_retry(mut self, policy: RetryPolicy) -> Self {
        self.storage_retry = policy;
        self
    }

    pub fn transform_retry(mut self, policy: RetryPolicy) -> Self {
        self.transform_retry = policy;
        self
    }

    /// Publish one admitted entry to `destination`.
    ///
    /// CSV candidates are transformed when CSV processing is enabled; an empty
    /// or malformed file, or a transform error, falls back to the original
    /// bytes read through a fresh entry stream. No entry stream is held while
    /// uploading.
    pub async fn publish<B: AsRef<[u8]>>(
        &self,
        reader: &mut ZipReader<B>,
        entry: &ArchiveEntry,
        destination: &Destination,
        is_csv_candidate: bool,
    ) -> Result<PublishOutcome> {
        let body = if is_csv_candidate && self.csv_enabled {
            match self.transform(reader, entry).await {
                Ok(CsvOutcome {
                    output: Some(output),
                    rows_processed,
                    ..
                }) => Body {
                    bytes: Bytes::from(output),
                    content_type: CSV_CONTENT_TYPE,
                    transformed: true,
                    rows_processed,
                },
                Ok(_) => {
                    debug!(entry = %entry.name, "no CSV output, publishing original");
                    self.original(reader, entry)?
                }
                Err(e) if e.aborts_archive() => return Err(e),
                Err(e) => {
                    warn!(entry = %entry.name, error = %e, "CSV transform failed, publishing original");
                    self.original(reader, entry)?
                }
            }
        } else {
            self.original(reader, entry)?
        };

        self.upload(body, destination, entry).await
    }

    async fn transform<B: AsRef<[u8]>>(
        &self,
        reader: &mut ZipReader<B>,
        entry: &ArchiveEntry,
    ) -> Result<CsvOutcome> {
        // Transforms run synchronously inside each attempt; only the backoff awaits.
        with_retry(
            || future::ready(self.transform_once(reader, entry)),
            &self.transform_retry,
            "csv transform",
        )
        .await
        .map_err(|e| {
            let operation = e.operation().to_string();
            let attempts = e.attempts();
            e.into_source()
                .unwrap_or(PipelineError::Timeout { operation, attempts })
        })
    }

    fn transform_once<B: AsRef<[u8]>>(
        &self,
        reader: &mut ZipReader<B>,
        entry: &ArchiveEntry,
    ) -> Result<CsvOutcome> {
        let stream = reader.open_entry(entry)?;
        let mut input = BufReader::new(stream);
        let outcome = self.transformer.transform(&mut input, &entry.name);
        let stream = input.into_inner();
        if stream.exceeded_declared_size() {
            return Err(PipelineError::Archive(zipferry_archive::Error::SizeMismatch {
                name: entry.name.clone(),
                declared: entry.uncompressed_size,
            }));
        }
        Ok(outcome?)
    }

    fn original<B: AsRef<[u8]>>(&self, reader: &mut ZipReader<B>, entry: &ArchiveEntry) -> Result<Body> {
        let content = reader.read_entry(entry)?;
        Ok(Body {
            bytes: Bytes::from(content),
            content_type: guess_content_type(&entry.name),
            transformed: false,
            rows_processed: 0,
        })
    }

    async fn upload(&self, body: Body, destination: &Destination, entry: &ArchiveEntry) -> Result<PublishOutcome> {
        let checkpoint = format!("upload:{}", entry.name);
        if !self.breaker.checkpoint(&checkpoint) {
            return Err(PipelineError::MemoryPressure { checkpoint });
        }

        let metadata = object_metadata(&body, destination, entry);
        let location = &destination.location;
        with_retry(
            || self.store.put(location, body.bytes.clone(), body.content_type, &metadata),
            &self.storage_retry,
            "upload entry",
        )
        .await?;

        debug!(
            entry = %entry.name,
            bytes = body.bytes.len(),
            content_type = body.content_type,
            transformed = body.transformed,
            "entry published"
        );
        Ok(PublishOutcome {
            location: location.clone(),
            bytes: body.bytes.len(),
            content_type: body.content_type,
            transformed: body.transformed,
            rows_processed: body.rows_processed,
        })
    }
}

fn object_metadata(body: &Body, destination: &Destination, entry: &ArchiveEntry) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(META_SOURCE_ARCHIVE.to_string(), destination.source_archive.clone());
    metadata.insert(META_SOURCE_ENTRY.to_string(), entry.name.clone());
    metadata.insert(META_REQUEST_ID.to_string(), destination.request_id.clone());
    metadata.insert(
        META_PROCESSED_AT.to_string(),
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    );
    metadata.insert(META_CONTENT_SHA256.to_string(), hex::encode(Sha256::digest(&body.bytes)));
    metadata.insert(META_TRANSFORMED.to_string(), body.transformed.to_string());
    metadata
}
