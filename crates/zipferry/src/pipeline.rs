//! Per-archive and per-invocation orchestration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};
use zipferry_archive::{
    extract_stem, sanitize_filename, Admission, ResourceGuard, ResourceLimits, ZipReader,
};
use zipferry_platform::MemoryCircuitBreaker;
use zipferry_store::{fetch_bounded, with_retry, ObjectLocation, ObjectStore, RetryPolicy};
use zipferry_transform::CsvOptions;

use crate::error::{FailureKind, InvocationError, PipelineError, Result};
use crate::logging::redact_key;
use crate::publish::{Destination, Publisher};

/// One archive to process. `size` is the size reported by the notification,
/// if any; the store is asked either way.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRef {
    pub location: ObjectLocation,
    pub size: Option<u64>,
}

impl ArchiveRef {
    pub fn new(location: ObjectLocation) -> Self {
        Self { location, size: None }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub output_container: String,
    pub output_prefix: String,
    pub max_archive_bytes: u64,
    pub limits: ResourceLimits,
    pub csv: CsvOptions,
    pub csv_enabled: bool,
    pub storage_retry: RetryPolicy,
    pub transform_retry: RetryPolicy,
    pub download_retry: RetryPolicy,
    pub time_safety_margin: Duration,
}

/// Counters for one archive, owned by the call processing it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunState {
    pub entries_admitted: usize,
    pub total_uncompressed_bytes: u64,
    pub files_processed: usize,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub archive: String,
    pub success: bool,
    pub files_processed: usize,
    pub errors: Vec<String>,
    /// Class of the failure that stopped the archive early, if any.
    pub failure: Option<FailureKind>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationReport {
    pub request_id: String,
    pub results: Vec<ProcessingResult>,
    /// Archives left unattempted because the time budget ran out.
    pub skipped: Vec<String>,
}

impl InvocationReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn files_processed(&self) -> usize {
        self.results.iter().map(|r| r.files_processed).sum()
    }
}

pub struct Pipeline<S> {
    store: Arc<S>,
    breaker: Arc<MemoryCircuitBreaker>,
    publisher: Publisher<S>,
    config: PipelineConfig,
}

impl<S: ObjectStore> Pipeline<S> {
    pub fn new(store: Arc<S>, breaker: Arc<MemoryCircuitBreaker>, config: PipelineConfig) -> Self {
        let publisher = Publisher::new(Arc::clone(&store), Arc::clone(&breaker), config.csv.clone())
            .csv_enabled(config.csv_enabled)
            .storage_retry(config.storage_retry.clone())
            .transform_retry(config.transform_retry.clone());
        Self {
            store,
            breaker,
            publisher,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn breaker(&self) -> &MemoryCircuitBreaker {
        &self.breaker
    }

    /// Output key for an entry: `<prefix>/<stem>/<sanitized file name>`.
    pub fn output_key(&self, entry_name: &str) -> String {
        let stem = extract_stem(entry_name);
        let file = sanitize_filename(entry_name);
        if self.config.output_prefix.is_empty() {
            format!("{stem}/{file}")
        } else {
            format!("{}/{stem}/{file}", self.config.output_prefix)
        }
    }

    /// Process one archive end to end. Never fails; problems are reported in
    /// the result.
    pub async fn process_archive(&self, archive: &ArchiveRef, request_id: &str) -> ProcessingResult {
        let key = archive.location.key.clone();
        let span = info_span!("archive", archive = %redact_key(&key), request_id);

        async move {
            let started = Instant::now();
            let mut state = RunState::default();
            let failure = match self.run_archive(archive, request_id, &mut state).await {
                Ok(()) => None,
                Err(e) => {
                    error!(kind = ?e.kind(), error = %e, "archive processing stopped");
                    state.errors.push(e.to_string());
                    Some(e.kind())
                }
            };

            let success = failure.is_none() && !(state.files_processed == 0 && !state.errors.is_empty());
            info!(
                success,
                files_processed = state.files_processed,
                entries_admitted = state.entries_admitted,
                total_uncompressed_bytes = state.total_uncompressed_bytes,
                errors = state.errors.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "archive finished"
            );

            ProcessingResult {
                archive: key,
                success,
                files_processed: state.files_processed,
                errors: state.errors,
                failure,
            }
        }
        .instrument(span)
        .await
    }

    async fn run_archive(&self, archive: &ArchiveRef, request_id: &str, state: &mut RunState) -> Result<()> {
        let location = &archive.location;
        let limit = self.config.max_archive_bytes;

        if let Some(size) = archive.size.filter(|size| *size > limit) {
            return Err(too_large(location, size, limit));
        }
        let meta = with_retry(|| self.store.head(location), &self.config.storage_retry, "head archive").await?;
        if meta.size > limit {
            return Err(too_large(location, meta.size, limit));
        }

        if !self.breaker.checkpoint("download") {
            return Err(PipelineError::MemoryPressure {
                checkpoint: "download".to_string(),
            });
        }
        let buffer = with_retry(
            || fetch_bounded(self.store.as_ref(), location, limit, Some(meta.size)),
            &self.config.download_retry,
            "download archive",
        )
        .await?;
        info!(bytes = buffer.len(), "archive downloaded");

        let mut reader = ZipReader::open_with_limits(buffer, &self.config.limits)?;
        let mut guard = ResourceGuard::new(self.config.limits);
        let mut entries_seen = 0;

        while let Some(entry) = reader.next_entry() {
            let entry = entry?;
            entries_seen += 1;

            let admission = guard.admit(&entry).map_err(zipferry_archive::Error::from);
            state.entries_admitted = guard.entries_admitted();
            state.total_uncompressed_bytes = guard.total_uncompressed_bytes();
            if admission? == Admission::Skipped {
                continue;
            }

            let checkpoint = format!("entry:{}", entry.name);
            if !self.breaker.checkpoint(&checkpoint) {
                return Err(PipelineError::MemoryPressure { checkpoint });
            }

            let destination = Destination {
                location: ObjectLocation::new(&self.config.output_container, self.output_key(&entry.name)),
                source_archive: location.key.clone(),
                request_id: request_id.to_string(),
            };
            let is_csv = entry.extension().as_deref() == Some("csv");

            match self.publisher.publish(&mut reader, &entry, &destination, is_csv).await {
                Ok(outcome) => {
                    state.files_processed += 1;
                    info!(
                        entry = %redact_key(&entry.name),
                        output = %redact_key(&outcome.location.key),
                        bytes = outcome.bytes,
                        transformed = outcome.transformed,
                        rows = outcome.rows_processed,
                        "entry published"
                    );
                }
                Err(e) if e.aborts_archive() => return Err(e),
                Err(e) => {
                    warn!(entry = %redact_key(&entry.name), kind = ?e.kind(), error = %e, "entry failed");
                    state.errors.push(format!("{}: {e}", entry.name));
                }
            }

            self.breaker.hint_reclaim(entries_seen);
        }

        Ok(())
    }

    /// Process archives one after another until done or until less than the
    /// configured safety margin of `budget` remains.
    ///
    /// Fails only if at least one archive was attempted and none succeeded.
    pub async fn process_invocation(
        &self,
        archives: &[ArchiveRef],
        request_id: &str,
        budget: Duration,
    ) -> std::result::Result<InvocationReport, InvocationError> {
        let deadline = Instant::now() + budget;
        let mut report = InvocationReport {
            request_id: request_id.to_string(),
            ..Default::default()
        };

        for (i, archive) in archives.iter().enumerate() {
            if i > 0 {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining < self.config.time_safety_margin {
                    report.skipped = archives[i..].iter().map(|a| a.location.key.clone()).collect();
                    warn!(
                        request_id,
                        remaining_ms = remaining.as_millis() as u64,
                        skipped = report.skipped.len(),
                        "time budget exhausted, leaving remaining archives"
                    );
                    break;
                }
            }
            report.results.push(self.process_archive(archive, request_id).await);
        }

        let attempted = report.results.len();
        if attempted > 0 && report.succeeded() == 0 {
            return Err(InvocationError::AllFailed {
                attempted,
                report: Box::new(report),
            });
        }
        Ok(report)
    }
}

fn too_large(location: &ObjectLocation, size: u64, limit: u64) -> PipelineError {
    PipelineError::ArchiveTooLarge {
        key: location.key.clone(),
        size,
        limit,
    }
}
