//! Object-created notifications.
//!
//! Accepts the `Records[].s3` document shape emitted by S3-compatible stores.
//! Keys arrive form-encoded (`+` for space, `%XX` escapes).

use percent_encoding::percent_decode_str;
use serde::Deserialize;
use tracing::info;
use zipferry_store::ObjectLocation;

use crate::error::{PipelineError, Result};
use crate::logging::redact_key;
use crate::pipeline::ArchiveRef;

#[derive(Deserialize)]
struct Event {
    #[serde(rename = "Records")]
    records: Vec<Record>,
}

#[derive(Deserialize)]
struct Record {
    s3: Entity,
}

#[derive(Deserialize)]
struct Entity {
    bucket: Bucket,
    object: Object,
}

#[derive(Deserialize)]
struct Bucket {
    name: String,
}

#[derive(Deserialize)]
struct Object {
    key: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Archive references named by a notification document.
///
/// Records whose key does not end in `.zip` are dropped.
pub fn parse_event(json: &str) -> Result<Vec<ArchiveRef>> {
    let event: Event =
        serde_json::from_str(json).map_err(|e| PipelineError::InvalidEvent(e.to_string()))?;

    let mut refs = Vec::with_capacity(event.records.len());
    for record in event.records {
        let Entity { bucket, object } = record.s3;
        if bucket.name.is_empty() {
            return Err(PipelineError::InvalidEvent("empty bucket name".to_string()));
        }
        let key = decode_key(&object.key)?;
        if key.is_empty() {
            return Err(PipelineError::InvalidEvent("empty object key".to_string()));
        }
        if !key.to_ascii_lowercase().ends_with(".zip") {
            info!(key = %redact_key(&key), "ignoring non-zip object");
            continue;
        }
        refs.push(ArchiveRef {
            location: ObjectLocation::new(bucket.name, key),
            size: object.size,
        });
    }
    Ok(refs)
}

/// Decode a form-encoded object key.
///
/// Every `%` must start a two-digit hex escape, the result must be UTF-8,
/// and control characters are refused.
pub fn decode_key(raw: &str) -> Result<String> {
    for (at, _) in raw.match_indices('%') {
        let escape = raw.as_bytes().get(at + 1..at + 3);
        if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
            return Err(PipelineError::InvalidEvent(format!("bad escape in key at byte {at}")));
        }
    }

    let spaced = raw.replace('+', " ");
    let key = percent_decode_str(&spaced)
        .decode_utf8()
        .map_err(|_| PipelineError::InvalidEvent("key is not valid UTF-8".to_string()))?;
    if key.chars().any(char::is_control) {
        return Err(PipelineError::InvalidEvent("key contains control characters".to_string()));
    }
    Ok(key.into_owned())
}
