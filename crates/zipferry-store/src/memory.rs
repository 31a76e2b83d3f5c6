//! In-process object store.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures_util::stream;

use crate::error::{Result, StoreError};
use crate::store::{BoxStream, ByteRange, Metadata, ObjectLocation, ObjectMeta, ObjectStore};

const CHUNK_SIZE: usize = 64 * 1024;

type FailureFn = Box<dyn Fn() -> StoreError + Send>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
    pub metadata: Metadata,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<(String, String), StoredObject>,
    put_failures: VecDeque<FailureFn>,
    get_failures: VecDeque<FailureFn>,
    put_calls: usize,
    get_calls: usize,
}

/// Object store backed by a map, shared between clones.
///
/// Failures can be queued with [`fail_puts`](Self::fail_puts) and
/// [`fail_gets`](Self::fail_gets); each queued failure is consumed by exactly
/// one call.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, location: &ObjectLocation, body: impl Into<Bytes>) {
        self.lock().objects.insert(
            key_of(location),
            StoredObject {
                body: body.into(),
                content_type: "application/octet-stream".to_string(),
                metadata: Metadata::new(),
            },
        );
    }

    pub fn object(&self, location: &ObjectLocation) -> Option<StoredObject> {
        self.lock().objects.get(&key_of(location)).cloned()
    }

    /// Keys stored in `container`, in order.
    pub fn keys(&self, container: &str) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn fail_puts(&self, count: usize, error: impl Fn() -> StoreError + Send + Clone + 'static) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner.put_failures.push_back(Box::new(error.clone()));
        }
    }

    pub fn fail_gets(&self, count: usize, error: impl Fn() -> StoreError + Send + Clone + 'static) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner.get_failures.push_back(Box::new(error.clone()));
        }
    }

    pub fn put_calls(&self) -> usize {
        self.lock().put_calls
    }

    pub fn get_calls(&self) -> usize {
        self.lock().get_calls
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn key_of(location: &ObjectLocation) -> (String, String) {
    (location.container.clone(), location.key.clone())
}

impl ObjectStore for MemoryStore {
    async fn head(&self, location: &ObjectLocation) -> Result<ObjectMeta> {
        let inner = self.lock();
        let object = inner
            .objects
            .get(&key_of(location))
            .ok_or_else(|| StoreError::not_found(&location.container, &location.key))?;
        Ok(ObjectMeta {
            size: object.body.len() as u64,
            content_type: Some(object.content_type.clone()),
            metadata: object.metadata.clone(),
        })
    }

    async fn get(
        &self,
        location: &ObjectLocation,
        range: Option<ByteRange>,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let body = {
            let mut inner = self.lock();
            inner.get_calls += 1;
            if let Some(failure) = inner.get_failures.pop_front() {
                return Err(failure());
            }
            inner
                .objects
                .get(&key_of(location))
                .map(|object| object.body.clone())
                .ok_or_else(|| StoreError::not_found(&location.container, &location.key))?
        };

        let body = match range {
            Some(range) => {
                let (start, end) = range.clamp(body.len() as u64);
                body.slice(start as usize..end as usize)
            }
            None => body,
        };

        let chunks: Vec<Result<Bytes>> = (0..body.len())
            .step_by(CHUNK_SIZE)
            .map(|offset| Ok(body.slice(offset..(offset + CHUNK_SIZE).min(body.len()))))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn put(
        &self,
        location: &ObjectLocation,
        body: Bytes,
        content_type: &str,
        metadata: &Metadata,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.put_calls += 1;
        if let Some(failure) = inner.put_failures.pop_front() {
            return Err(failure());
        }
        inner.objects.insert(
            key_of(location),
            StoredObject {
                body,
                content_type: content_type.to_string(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }
}
