//! Object store over a local directory tree.
//!
//! `container/key` maps to `<root>/<container>/<key>`. Content type and user
//! metadata live in a sidecar file next to each object.

use std::io::{self, SeekFrom};
use std::path::{Component, Path, PathBuf};

use bytes::{Bytes, BytesMut};
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::{BoxStream, ByteRange, Metadata, ObjectLocation, ObjectMeta, ObjectStore};

const CHUNK_SIZE: usize = 64 * 1024;
const SIDECAR_SUFFIX: &str = ".zfmeta.json";
const PART_SUFFIX: &str = ".zfpart";

#[derive(Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    metadata: Metadata,
}

#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `location` below the root, rejecting anything that could name a
    /// path outside it.
    pub fn path_for(&self, location: &ObjectLocation) -> Result<PathBuf> {
        check_segment(&location.container, &location.container)?;
        if location.key.is_empty() {
            return Err(invalid(&location.key, "empty key"));
        }
        if location.key.contains('\\') || location.key.contains('\0') {
            return Err(invalid(&location.key, "backslash or NUL in key"));
        }
        if location.key.ends_with(SIDECAR_SUFFIX) || location.key.ends_with(PART_SUFFIX) {
            return Err(invalid(&location.key, "reserved suffix"));
        }

        let mut path = self.root.join(&location.container);
        for component in Path::new(&location.key).components() {
            match component {
                Component::Normal(segment) => path.push(segment),
                _ => return Err(invalid(&location.key, "key escapes the store root")),
            }
        }
        Ok(path)
    }

    async fn read_sidecar(path: &Path) -> Option<Sidecar> {
        let raw = fs::read(sidecar_path(path)).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }
}

fn check_segment(segment: &str, whole: &str) -> Result<()> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(invalid(whole, "empty or relative container"));
    }
    if segment.contains(['/', '\\', '\0']) {
        return Err(invalid(whole, "separator in container"));
    }
    Ok(())
}

fn invalid(key: &str, reason: &'static str) -> StoreError {
    StoreError::InvalidKey {
        key: key.to_string(),
        reason,
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn sidecar_path(path: &Path) -> PathBuf {
    with_suffix(path, SIDECAR_SUFFIX)
}

fn map_not_found(err: io::Error, location: &ObjectLocation) -> StoreError {
    if err.kind() == io::ErrorKind::NotFound {
        StoreError::not_found(&location.container, &location.key)
    } else {
        StoreError::Io(err)
    }
}

impl ObjectStore for LocalStore {
    async fn head(&self, location: &ObjectLocation) -> Result<ObjectMeta> {
        let path = self.path_for(location)?;
        let stat = fs::metadata(&path)
            .await
            .map_err(|e| map_not_found(e, location))?;
        if !stat.is_file() {
            return Err(StoreError::not_found(&location.container, &location.key));
        }
        let sidecar = Self::read_sidecar(&path).await;
        Ok(ObjectMeta {
            size: stat.len(),
            content_type: sidecar.as_ref().map(|s| s.content_type.clone()),
            metadata: sidecar.map(|s| s.metadata).unwrap_or_default(),
        })
    }

    async fn get(
        &self,
        location: &ObjectLocation,
        range: Option<ByteRange>,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let path = self.path_for(location)?;
        let mut file = File::open(&path)
            .await
            .map_err(|e| map_not_found(e, location))?;
        let len = file.metadata().await?.len();
        let (start, end) = range.map_or((0, len), |r| r.clamp(len));
        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }

        let body = stream::unfold((file, end - start), |(mut file, remaining)| async move {
            if remaining == 0 {
                return None;
            }
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            let mut buf = BytesMut::zeroed(want);
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf.freeze()), (file, remaining - n as u64)))
                }
                Err(e) => Some((Err(StoreError::Io(e)), (file, 0))),
            }
        });
        Ok(Box::pin(body))
    }

    async fn put(
        &self,
        location: &ObjectLocation,
        body: Bytes,
        content_type: &str,
        metadata: &Metadata,
    ) -> Result<()> {
        let path = self.path_for(location)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write beside the target then rename so readers never see a partial object.
        let part = with_suffix(&path, PART_SUFFIX);
        let mut file = File::create(&part).await?;
        file.write_all(&body).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&part, &path).await?;

        let sidecar = Sidecar {
            content_type: content_type.to_string(),
            metadata: metadata.clone(),
        };
        fs::write(sidecar_path(&path), serde_json::to_vec(&sidecar)?).await?;

        debug!(path = %path.display(), bytes = body.len(), "object written");
        Ok(())
    }
}
