//! Retry with exponential backoff and jitter for any asynchronous operation.

use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound of the uniform jitter, as a fraction of the computed delay.
pub const JITTER_FRACTION: f64 = 0.1;

const STORAGE_RETRYABLE: &[&str] = &[
    "timeout",
    "timed out",
    "timedout",
    "throttl",
    "slowdown",
    "slow down",
    "toomanyrequests",
    "connectionreset",
    "connection reset",
    "connectionaborted",
    "brokenpipe",
    "unavailable",
    "internalerror",
    "notfound",
    "nosuchkey",
];

const TRANSFORM_RETRYABLE: &[&str] = &["timeout", "timed out", "timedout", "wouldblock", "interrupted"];

/// The part of an error that retry classification looks at.
///
/// A class names the failure (variant, I/O kind, service code) and never
/// carries object keys, file names or OS messages, which are caller data.
pub trait RetryClass {
    fn retry_class(&self) -> String;
}

impl RetryClass for io::Error {
    fn retry_class(&self) -> String {
        format!("{:?}", self.kind())
    }
}

/// How an operation class is retried.
///
/// An error is retryable when its [`RetryClass`] contains one of `retryable`
/// (case-insensitive).
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub timeout: Option<Duration>,
    pub retryable: Vec<String>,
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::storage()
    }
}

impl RetryPolicy {
    /// Object storage calls: broad retryable set including eventual-consistency
    /// misses right after a write.
    pub fn storage() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            timeout: Some(Duration::from_secs(30)),
            retryable: STORAGE_RETRYABLE.iter().map(|s| s.to_string()).collect(),
            retry_on_timeout: true,
        }
    }

    /// Transform steps rarely fail transiently.
    pub fn transform() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            timeout: None,
            retryable: TRANSFORM_RETRYABLE.iter().map(|s| s.to_string()).collect(),
            retry_on_timeout: false,
        }
    }

    /// Archive downloads: the storage policy with a longer per-attempt timeout.
    pub fn download() -> Self {
        Self::storage().timeout(Some(Duration::from_secs(60)))
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retryable<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn retry_on_timeout(mut self, retry: bool) -> Self {
        self.retry_on_timeout = retry;
        self
    }

    pub fn is_retryable<E: RetryClass + ?Sized>(&self, error: &E) -> bool {
        let class = error.retry_class().to_lowercase();
        self.retryable.iter().any(|pattern| {
            let pattern = pattern.to_lowercase();
            !pattern.is_empty() && class.contains(&pattern)
        })
    }

    /// Delay before retry `attempt` (0-indexed), without jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.base_delay, self.backoff_multiplier, self.max_delay)
    }

    /// [`backoff_delay`](Self::backoff_delay) plus up to [`JITTER_FRACTION`]
    /// of it at random.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        let fraction = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);
        delay.saturating_add(delay.mul_f64(fraction))
    }
}

/// `min(base * multiplier^attempt, max)`.
///
/// Saturates at `max` instead of overflowing for large attempts or
/// multipliers.
pub fn backoff_delay(attempt: u32, base: Duration, multiplier: f64, max: Duration) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = base.as_secs_f64() * multiplier.max(1.0).powi(exponent);
    Duration::try_from_secs_f64(secs).unwrap_or(max).min(max)
}

/// Failure of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error.
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        source: E,
    },

    /// The last error was not retryable.
    #[error("{operation} aborted after {attempts} attempt(s): {source}")]
    Aborted {
        operation: String,
        attempts: u32,
        source: E,
    },

    #[error("{operation} timed out after {attempts} attempt(s) ({timeout:?} per attempt)")]
    TimedOut {
        operation: String,
        attempts: u32,
        timeout: Duration,
    },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::Aborted { attempts, .. }
            | Self::TimedOut { attempts, .. } => *attempts,
        }
    }

    pub fn operation(&self) -> &str {
        match self {
            Self::Exhausted { operation, .. }
            | Self::Aborted { operation, .. }
            | Self::TimedOut { operation, .. } => operation,
        }
    }

    /// The last error returned by the operation, if it did not time out.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Exhausted { source, .. } | Self::Aborted { source, .. } => Some(source),
            Self::TimedOut { .. } => None,
        }
    }

    /// Whether the operation failed on transient grounds after using up its
    /// attempts.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. } | Self::TimedOut { .. })
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// runs out of attempts.
///
/// `operation` is called afresh for every attempt. With a policy timeout each
/// attempt races a timer; a timeout is retried only if
/// `policy.retry_on_timeout` is set.
pub async fn with_retry<T, E, F, Fut>(
    mut operation: F,
    policy: &RetryPolicy,
    context: &str,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryClass + fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = match policy.timeout {
            Some(limit) => tokio::time::timeout(limit, operation()).await.ok(),
            None => Some(operation().await),
        };

        match outcome {
            Some(Ok(value)) => {
                if attempt > 1 {
                    debug!(operation = context, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Some(Err(error)) => {
                if !policy.is_retryable(&error) {
                    return Err(RetryError::Aborted {
                        operation: context.to_string(),
                        attempts: attempt,
                        source: error,
                    });
                }
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted {
                        operation: context.to_string(),
                        attempts: attempt,
                        source: error,
                    });
                }
                warn!(operation = context, attempt, max_attempts, error = %error, "retryable failure");
            }
            None => {
                let timeout = policy.timeout.unwrap_or_default();
                if !policy.retry_on_timeout || attempt >= max_attempts {
                    return Err(RetryError::TimedOut {
                        operation: context.to_string(),
                        attempts: attempt,
                        timeout,
                    });
                }
                warn!(operation = context, attempt, max_attempts, ?timeout, "attempt timed out");
            }
        }

        tokio::time::sleep(policy.jittered_delay(attempt - 1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_basic() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(60);

        assert_eq!(backoff_delay(0, base, 2.0, max), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, base, 2.0, max), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, base, 2.0, max), Duration::from_millis(400));
        assert_eq!(backoff_delay(3, base, 2.0, max), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_delay_capped() {
        let base = Duration::from_millis(200);
        let max = Duration::from_secs(1);

        assert_eq!(backoff_delay(2, base, 2.0, max), Duration::from_millis(800));
        assert_eq!(backoff_delay(3, base, 2.0, max), max);
        assert_eq!(backoff_delay(30, base, 2.0, max), max);
    }

    #[test]
    fn test_backoff_delay_zero_base() {
        let max = Duration::from_secs(1);
        assert_eq!(backoff_delay(0, Duration::ZERO, 2.0, max), Duration::ZERO);
        assert_eq!(backoff_delay(10, Duration::ZERO, 2.0, max), Duration::ZERO);
    }

    #[test]
    fn test_backoff_delay_overflow_protection() {
        let base = Duration::from_secs(u64::MAX / 2);
        let max = Duration::from_secs(10);
        assert_eq!(backoff_delay(u32::MAX, base, 1000.0, max), max);
    }

    #[test]
    fn test_backoff_monotone_and_bounded() {
        let policy = RetryPolicy::storage();
        let delays: Vec<Duration> = (0..12).map(|i| policy.backoff_delay(i)).collect();

        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert!(delays.iter().all(|d| *d <= policy.max_delay));
    }

    #[test]
    fn test_jitter_within_ten_percent() {
        let policy = RetryPolicy::storage();
        for attempt in 0..8 {
            let plain = policy.backoff_delay(attempt);
            let jittered = policy.jittered_delay(attempt);
            assert!(jittered >= plain);
            assert!(jittered <= plain.mul_f64(1.0 + JITTER_FRACTION) + Duration::from_nanos(1));
        }
    }

    #[test]
    fn test_presets() {
        let storage = RetryPolicy::storage();
        assert_eq!(storage.max_attempts, 5);
        assert_eq!(storage.base_delay, Duration::from_millis(200));
        assert_eq!(storage.max_delay, Duration::from_secs(10));
        assert_eq!(storage.timeout, Some(Duration::from_secs(30)));

        let transform = RetryPolicy::transform();
        assert_eq!(transform.max_attempts, 2);
        assert_eq!(transform.max_delay, Duration::from_secs(1));

        let download = RetryPolicy::download();
        assert_eq!(download.timeout, Some(Duration::from_secs(60)));
        assert_eq!(download.retryable, storage.retryable);
    }

    #[test]
    fn test_classification() {
        let storage = RetryPolicy::storage();
        let transform = RetryPolicy::transform();

        let missing = crate::StoreError::not_found("out", "a.csv");
        assert!(storage.is_retryable(&missing));
        assert!(!transform.is_retryable(&missing));

        let throttled = crate::StoreError::Throttled("SlowDown".into());
        assert!(storage.is_retryable(&throttled));

        let invalid = crate::StoreError::InvalidKey {
            key: "../x".into(),
            reason: "escapes root",
        };
        assert!(!storage.is_retryable(&invalid));
    }

    #[test]
    fn test_classification_ignores_keys_and_messages() {
        let storage = RetryPolicy::storage();

        let invalid = crate::StoreError::InvalidKey {
            key: "x/notfound.zip".into(),
            reason: "reserved suffix",
        };
        assert!(!storage.is_retryable(&invalid));

        let too_large = crate::StoreError::TooLarge {
            key: "throttled/timeout.zip".into(),
            size: 10,
            limit: 1,
        };
        assert!(!storage.is_retryable(&too_large));

        let denied = crate::StoreError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "connection reset while opening /data/unavailable",
        ));
        assert!(!storage.is_retryable(&denied));

        let reset = crate::StoreError::Io(io::ErrorKind::ConnectionReset.into());
        assert!(storage.is_retryable(&reset));
        let timed_out = crate::StoreError::Io(io::ErrorKind::TimedOut.into());
        assert!(storage.is_retryable(&timed_out));
    }

    #[test]
    fn test_io_classes() {
        let transform = RetryPolicy::transform();
        assert!(transform.is_retryable(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!transform.is_retryable(&io::Error::other("timeout in payload")));
    }
}
