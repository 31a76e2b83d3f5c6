use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;

use crate::error::{Result, StoreError};
use crate::store::{BoxStream, ObjectLocation, ObjectStore};

/// Collect a body stream into one buffer, failing once it grows past `limit`.
///
/// `size_hint` only preallocates; the limit is enforced on bytes actually
/// received.
pub async fn read_bounded(
    mut body: BoxStream<'_, Result<Bytes>>,
    key: &str,
    limit: u64,
    size_hint: Option<u64>,
) -> Result<Bytes> {
    let capacity = size_hint.unwrap_or(0).min(limit) as usize;
    let mut buf = BytesMut::with_capacity(capacity);

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        let size = buf.len() as u64 + chunk.len() as u64;
        if size > limit {
            return Err(StoreError::TooLarge {
                key: key.to_string(),
                size,
                limit,
            });
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf.freeze())
}

/// Fetch a whole object into memory, bounded by `limit` bytes.
pub async fn fetch_bounded<S: ObjectStore>(
    store: &S,
    location: &ObjectLocation,
    limit: u64,
    size_hint: Option<u64>,
) -> Result<Bytes> {
    let body = store.get(location, None).await?;
    read_bounded(body, &location.key, limit, size_hint).await
}
