//! Safe zip ingestion pipeline.
//!
//! An invocation names one or more zip archives in object storage. Each
//! archive is downloaded into a bounded buffer, its entries are admitted
//! against [`ResourceLimits`](zipferry_archive::ResourceLimits), CSV entries
//! get a processing timestamp column, and every entry is republished under
//! `<prefix>/<stem>/<file name>`. A shared
//! [`MemoryCircuitBreaker`](zipferry_platform::MemoryCircuitBreaker) gates
//! every download, entry and upload.
//!
//! # Modules
//!
//! - [`config`] - `ZIPFERRY_*` settings
//! - [`event`] - Storage notification parsing
//! - [`pipeline`] - Archive and invocation orchestration
//! - [`publish`] - Per-entry transform and upload
//! - [`logging`] - Subscriber setup and key redaction

pub mod config;
mod error;
pub mod event;
pub mod logging;
pub mod pipeline;
pub mod publish;

pub use config::{ConfigError, LogFormat, Settings};
pub use error::{FailureKind, InvocationError, PipelineError, Result};
pub use event::parse_event;
pub use pipeline::{ArchiveRef, InvocationReport, Pipeline, PipelineConfig, ProcessingResult, RunState};
pub use publish::{Destination, PublishOutcome, Publisher};
