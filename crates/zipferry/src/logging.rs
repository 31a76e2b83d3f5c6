use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

const MASK: &str = "***";

static REDACT_KEYS: AtomicBool = AtomicBool::new(false);

/// Initialize structured logging with tracing-subscriber.
///
/// Uses the `RUST_LOG` env var if set, otherwise falls back to `log_level`.
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init(log_level: &str, format: LogFormat, redact_keys: bool) {
    set_redaction(redact_keys);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
}

pub fn set_redaction(enabled: bool) {
    REDACT_KEYS.store(enabled, Ordering::Relaxed);
}

/// Object key as it may appear in logs.
pub fn redact_key(key: &str) -> Cow<'_, str> {
    if REDACT_KEYS.load(Ordering::Relaxed) {
        Cow::Owned(mask_key(key))
    } else {
        Cow::Borrowed(key)
    }
}

/// Mask everything but the extension of the last path segment.
pub fn mask_key(key: &str) -> String {
    let last = key.rsplit('/').next().unwrap_or(key);
    match last.rfind('.') {
        Some(dot) if dot > 0 && dot + 1 < last.len() => format!("{MASK}{}", &last[dot..]),
        _ => MASK.to_string(),
    }
}
