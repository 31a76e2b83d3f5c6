//! Settings read from `ZIPFERRY_*` environment variables.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use zipferry_archive::ResourceLimits;
use zipferry_platform::BreakerThresholds;
use zipferry_store::RetryPolicy;
use zipferry_transform::CsvOptions;

use crate::pipeline::PipelineConfig;

pub const ENV_PREFIX: &str = "ZIPFERRY_";

pub const DEFAULT_OUTPUT_PREFIX: &str = "processed";
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_TIME_SAFETY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {key}")]
    Missing { key: String },

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}', expected text or json")),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub output_container: String,
    pub output_prefix: String,
    pub max_archive_bytes: u64,
    pub limits: ResourceLimits,
    pub memory: BreakerThresholds,
    /// Memory the process may use; usage is a share of total system memory
    /// when unset.
    pub memory_budget_bytes: Option<u64>,
    pub storage_retry: RetryPolicy,
    pub transform_retry: RetryPolicy,
    pub download_retry: RetryPolicy,
    pub csv: CsvOptions,
    pub csv_enabled: bool,
    pub time_safety_margin: Duration,
    pub log_level: String,
    pub log_format: LogFormat,
    pub redact_keys: bool,
}

impl Settings {
    /// Defaults for everything but the required output container.
    pub fn new(output_container: impl Into<String>) -> Self {
        Self {
            output_container: output_container.into(),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            limits: ResourceLimits::default(),
            memory: BreakerThresholds::default(),
            memory_budget_bytes: None,
            storage_retry: RetryPolicy::storage(),
            transform_retry: RetryPolicy::transform(),
            download_retry: RetryPolicy::download(),
            csv: CsvOptions::default(),
            csv_enabled: true,
            time_safety_margin: DEFAULT_TIME_SAFETY_MARGIN,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            redact_keys: false,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any `ZIPFERRY_*` lookup. Unset or empty values
    /// fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let output_container = vars.string("OUTPUT_CONTAINER").ok_or_else(|| ConfigError::Missing {
            key: full_key("OUTPUT_CONTAINER"),
        })?;
        let mut settings = Self::new(output_container);

        if let Some(prefix) = vars.string("OUTPUT_PREFIX") {
            settings.output_prefix = prefix.trim_matches('/').to_string();
        }
        if let Some(bytes) = vars.positive::<u64>("MAX_ARCHIVE_BYTES")? {
            settings.max_archive_bytes = bytes;
        }

        if let Some(count) = vars.positive::<usize>("MAX_ENTRY_COUNT")? {
            settings.limits = settings.limits.max_entry_count(count);
        }
        if let Some(bytes) = vars.positive::<u64>("MAX_TOTAL_UNCOMPRESSED_BYTES")? {
            settings.limits = settings.limits.max_total_uncompressed_bytes(bytes);
        }
        if let Some(ratio) = vars.parse::<f64>("MAX_COMPRESSION_RATIO")? {
            if !ratio.is_finite() || ratio < 1.0 {
                return Err(vars.invalid("MAX_COMPRESSION_RATIO", "must be a finite number >= 1"));
            }
            settings.limits = settings.limits.max_compression_ratio(ratio);
        }

        if let Some(percent) = vars.percent("MEMORY_WARNING_PERCENT")? {
            settings.memory = settings.memory.warning_percent(percent);
        }
        if let Some(percent) = vars.percent("MEMORY_TRIP_PERCENT")? {
            settings.memory = settings.memory.trip_percent(percent);
        }
        if settings.memory.warning_percent >= settings.memory.trip_percent {
            return Err(ConfigError::Invalid {
                key: full_key("MEMORY_WARNING_PERCENT"),
                value: settings.memory.warning_percent.to_string(),
                reason: format!("must be below the trip threshold {}", settings.memory.trip_percent),
            });
        }
        if let Some(ms) = vars.parse::<u64>("MEMORY_SAMPLE_INTERVAL_MS")? {
            settings.memory = settings.memory.sample_interval(Duration::from_millis(ms));
        }
        if let Some(every) = vars.parse::<usize>("MEMORY_RECLAIM_EVERY")? {
            settings.memory = settings.memory.reclaim_every(every);
        }
        settings.memory_budget_bytes = vars.positive::<u64>("MEMORY_BUDGET_BYTES")?;

        if let Some(attempts) = vars.positive::<u32>("RETRY_MAX_ATTEMPTS")? {
            settings.storage_retry = settings.storage_retry.max_attempts(attempts);
            settings.download_retry = settings.download_retry.max_attempts(attempts);
        }
        if let Some(ms) = vars.parse::<u64>("RETRY_BASE_DELAY_MS")? {
            let delay = Duration::from_millis(ms);
            settings.storage_retry = settings.storage_retry.base_delay(delay);
            settings.download_retry = settings.download_retry.base_delay(delay);
        }
        if let Some(ms) = vars.parse::<u64>("RETRY_MAX_DELAY_MS")? {
            let delay = Duration::from_millis(ms);
            settings.storage_retry = settings.storage_retry.max_delay(delay);
            settings.download_retry = settings.download_retry.max_delay(delay);
        }
        if settings.storage_retry.base_delay > settings.storage_retry.max_delay {
            return Err(ConfigError::Invalid {
                key: full_key("RETRY_BASE_DELAY_MS"),
                value: settings.storage_retry.base_delay.as_millis().to_string(),
                reason: "must not exceed the maximum delay".to_string(),
            });
        }

        if let Some(column) = vars.string("CSV_TIMESTAMP_COLUMN") {
            settings.csv = settings.csv.timestamp_column(column);
        }
        if let Some(skip) = vars.flag("CSV_SKIP_MALFORMED")? {
            settings.csv = settings.csv.skip_malformed(skip);
        }
        if let Some(max) = vars.positive::<usize>("CSV_MAX_ROWS")? {
            settings.csv = settings.csv.max_rows(Some(max));
        }
        if let Some(enabled) = vars.flag("CSV_ENABLED")? {
            settings.csv_enabled = enabled;
        }

        if let Some(ms) = vars.parse::<u64>("TIME_SAFETY_MARGIN_MS")? {
            settings.time_safety_margin = Duration::from_millis(ms);
        }
        if let Some(level) = vars.string("LOG_LEVEL") {
            settings.log_level = level;
        }
        if let Some(format) = vars.parse::<LogFormat>("LOG_FORMAT")? {
            settings.log_format = format;
        }
        if let Some(redact) = vars.flag("REDACT_KEYS")? {
            settings.redact_keys = redact;
        }

        Ok(settings)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            output_container: self.output_container.clone(),
            output_prefix: self.output_prefix.clone(),
            max_archive_bytes: self.max_archive_bytes,
            limits: self.limits,
            csv: self.csv.clone(),
            csv_enabled: self.csv_enabled,
            storage_retry: self.storage_retry.clone(),
            transform_retry: self.transform_retry.clone(),
            download_retry: self.download_retry.clone(),
            time_safety_margin: self.time_safety_margin,
        }
    }
}

fn full_key(name: &str) -> String {
    format!("{ENV_PREFIX}{name}")
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(&full_key(name))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn invalid(&self, name: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::Invalid {
            key: full_key(name),
            value: self.string(name).unwrap_or_default(),
            reason: reason.into(),
        }
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.string(name)
            .map(|raw| raw.parse::<T>().map_err(|e| self.invalid(name, e.to_string())))
            .transpose()
    }

    fn positive<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr + PartialEq + Default,
        T::Err: Display,
    {
        match self.parse::<T>(name)? {
            Some(value) if value == T::default() => Err(self.invalid(name, "must be greater than zero")),
            other => Ok(other),
        }
    }

    fn percent(&self, name: &str) -> Result<Option<f64>, ConfigError> {
        match self.parse::<f64>(name)? {
            Some(p) if !(p > 0.0 && p <= 100.0) => Err(self.invalid(name, "must be in (0, 100]")),
            other => Ok(other),
        }
    }

    fn flag(&self, name: &str) -> Result<Option<bool>, ConfigError> {
        let Some(raw) = self.string(name) else {
            return Ok(None);
        };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(self.invalid(name, "expected true/false")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (full_key(k), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn output_container_is_required() {
        let err = settings(&[]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing {
                key: "ZIPFERRY_OUTPUT_CONTAINER".into()
            }
        );
        assert!(settings(&[("OUTPUT_CONTAINER", "   ")]).is_err());
    }

    #[test]
    fn defaults() {
        let s = settings(&[("OUTPUT_CONTAINER", "out")]).unwrap();
        assert_eq!(s, Settings::new("out"));
        assert_eq!(s.limits, ResourceLimits::default());
        assert_eq!(s.csv.timestamp_column, "_processed");
        assert_eq!(s.output_prefix, "processed");
        assert!(s.csv_enabled);
        assert_eq!(s.log_format, LogFormat::Text);
    }

    #[test]
    fn overrides() {
        let s = settings(&[
            ("OUTPUT_CONTAINER", "out"),
            ("OUTPUT_PREFIX", "/derived/"),
            ("MAX_ENTRY_COUNT", "50"),
            ("MAX_TOTAL_UNCOMPRESSED_BYTES", "1048576"),
            ("MAX_COMPRESSION_RATIO", "20.5"),
            ("MEMORY_WARNING_PERCENT", "60"),
            ("MEMORY_TRIP_PERCENT", "75"),
            ("MEMORY_SAMPLE_INTERVAL_MS", "250"),
            ("MEMORY_BUDGET_BYTES", "536870912"),
            ("RETRY_MAX_ATTEMPTS", "3"),
            ("RETRY_BASE_DELAY_MS", "50"),
            ("CSV_TIMESTAMP_COLUMN", "loaded_at"),
            ("CSV_SKIP_MALFORMED", "off"),
            ("CSV_ENABLED", "no"),
            ("TIME_SAFETY_MARGIN_MS", "5000"),
            ("LOG_FORMAT", "JSON"),
            ("REDACT_KEYS", "1"),
        ])
        .unwrap();

        assert_eq!(s.output_prefix, "derived");
        assert_eq!(s.limits.max_entry_count, 50);
        assert_eq!(s.limits.max_total_uncompressed_bytes, 1_048_576);
        assert_eq!(s.limits.max_compression_ratio, 20.5);
        assert_eq!(s.memory.warning_percent, 60.0);
        assert_eq!(s.memory.trip_percent, 75.0);
        assert_eq!(s.memory.sample_interval, Duration::from_millis(250));
        assert_eq!(s.memory_budget_bytes, Some(536_870_912));
        assert_eq!(s.storage_retry.max_attempts, 3);
        assert_eq!(s.download_retry.base_delay, Duration::from_millis(50));
        assert_eq!(s.transform_retry, RetryPolicy::transform());
        assert_eq!(s.csv.timestamp_column, "loaded_at");
        assert!(!s.csv.skip_malformed);
        assert!(!s.csv_enabled);
        assert_eq!(s.time_safety_margin, Duration::from_secs(5));
        assert_eq!(s.log_format, LogFormat::Json);
        assert!(s.redact_keys);
    }

    #[test]
    fn invalid_values_name_the_key() {
        let err = settings(&[("OUTPUT_CONTAINER", "out"), ("MAX_ENTRY_COUNT", "lots")]).unwrap_err();
        match err {
            ConfigError::Invalid { key, value, .. } => {
                assert_eq!(key, "ZIPFERRY_MAX_ENTRY_COUNT");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(settings(&[("OUTPUT_CONTAINER", "out"), ("MAX_ENTRY_COUNT", "0")]).is_err());
        assert!(settings(&[("OUTPUT_CONTAINER", "out"), ("MEMORY_TRIP_PERCENT", "120")]).is_err());
        assert!(settings(&[("OUTPUT_CONTAINER", "out"), ("MAX_COMPRESSION_RATIO", "NaN")]).is_err());
        assert!(settings(&[("OUTPUT_CONTAINER", "out"), ("CSV_ENABLED", "maybe")]).is_err());
        assert!(settings(&[("OUTPUT_CONTAINER", "out"), ("LOG_FORMAT", "xml")]).is_err());
    }

    #[test]
    fn warning_must_be_below_trip() {
        let err = settings(&[
            ("OUTPUT_CONTAINER", "out"),
            ("MEMORY_WARNING_PERCENT", "85"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn base_delay_must_not_exceed_max() {
        let err = settings(&[
            ("OUTPUT_CONTAINER", "out"),
            ("RETRY_BASE_DELAY_MS", "5000"),
            ("RETRY_MAX_DELAY_MS", "1000"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
