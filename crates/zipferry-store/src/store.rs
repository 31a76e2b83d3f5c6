use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A boxed stream type for object bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// User metadata attached to an object.
pub type Metadata = BTreeMap<String, String>;

/// Container (bucket) and key naming one object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub container: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

/// Half-open byte range `[start, end)`; `end: None` reads to the end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// Clamp the range to an object of `len` bytes.
    pub fn clamp(&self, len: u64) -> (u64, u64) {
        let start = self.start.min(len);
        let end = self.end.unwrap_or(len).clamp(start, len);
        (start, end)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ObjectMeta {
    pub size: u64,
    pub content_type: Option<String>,
    pub metadata: Metadata,
}

/// Asynchronous object storage abstraction.
///
/// Implementations map their own failures onto [`StoreError`](crate::StoreError)
/// so the retry executor can classify them by name and message.
///
/// # Implementations
///
/// - [`MemoryStore`](crate::MemoryStore): in-process map with failure injection
/// - [`LocalStore`](crate::LocalStore): directory tree on the local filesystem
pub trait ObjectStore: Send + Sync {
    /// Size and attributes of an object without reading its body.
    fn head(&self, location: &ObjectLocation) -> impl Future<Output = Result<ObjectMeta>> + Send;

    /// Open the object body, or a byte range of it, as a stream.
    fn get(
        &self,
        location: &ObjectLocation,
        range: Option<ByteRange>,
    ) -> impl Future<Output = Result<BoxStream<'static, Result<Bytes>>>> + Send;

    /// Store `body` under `location`, replacing any existing object.
    fn put(
        &self,
        location: &ObjectLocation,
        body: Bytes,
        content_type: &str,
        metadata: &Metadata,
    ) -> impl Future<Output = Result<()>> + Send;
}
