//! Object storage for zipferry.
//!
//! # Architecture
//!
//! - [`store`] - The [`ObjectStore`] trait and its value types
//! - [`MemoryStore`] / [`LocalStore`] - Adapters
//! - [`retry`] - Backoff executor shared by every storage and transform call
//!
//! Errors from every adapter are [`StoreError`]; the retry executor classifies
//! them by variant through [`RetryClass`], so adapters map transport failures
//! onto the closest variant.

mod download;
mod error;
mod local;
mod memory;
pub mod retry;
pub mod store;

pub use download::{fetch_bounded, read_bounded};
pub use error::{Result, StoreError};
pub use local::LocalStore;
pub use memory::{MemoryStore, StoredObject};
pub use retry::{backoff_delay, with_retry, RetryClass, RetryError, RetryPolicy};
pub use store::{BoxStream, ByteRange, Metadata, ObjectLocation, ObjectMeta, ObjectStore};
