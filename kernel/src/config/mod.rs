// Ingest Configuration
//
// Thresholds and timings for buffering and flushing, loadable from
// JSON. Connection targets for the bus, storage and alerting live with
// whoever wires those collaborators up.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::FlushPolicy;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Buffering configuration.
///
/// ```json
/// { "batch_size": 100, "flush_interval": "1m", "max_buffer_mb": 5 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Records per size-triggered flush, and the largest single write.
    pub batch_size: usize,

    /// Longest time buffered data may wait before a full flush.
    /// Default: 1m
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Estimated buffer size (MiB) that forces a full flush and an alert.
    pub max_buffer_mb: f64,

    /// How often the flush timer evaluates the policy.
    /// Default: 5s
    #[serde(with = "humantime_serde")]
    pub timer_tick: Duration,

    /// Give up on a write after this long and requeue its batch.
    /// Unset by default: writes may take as long as they take.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Option<Duration>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(60),
            max_buffer_mb: 5.0,
            timer_tick: Duration::from_secs(5),
            write_timeout: None,
        }
    }
}

impl IngestConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        if self.flush_interval.is_zero() {
            return Err(invalid("flush_interval", "must be positive"));
        }
        if !self.max_buffer_mb.is_finite() || self.max_buffer_mb <= 0.0 {
            return Err(invalid("max_buffer_mb", "must be a positive number"));
        }
        if self.timer_tick.is_zero() {
            return Err(invalid("timer_tick", "must be positive"));
        }
        if self.write_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("write_timeout", "must be positive when set"));
        }
        Ok(())
    }

    pub fn max_buffer_bytes(&self) -> usize {
        (self.max_buffer_mb * BYTES_PER_MB) as usize
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            batch_size: self.batch_size,
            flush_interval: self.flush_interval,
            max_buffer_bytes: self.max_buffer_bytes(),
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = IngestConfig::default();

        assert_eq!(config.batch_size, 100);
        assert_eq!(config.flush_interval, Duration::from_secs(60));
        assert_eq!(config.max_buffer_bytes(), 5 * 1024 * 1024);
        assert!(config.write_timeout.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn parses_partial_json_with_humantime_durations() {
        let config = IngestConfig::from_json(
            r#"{ "batch_size": 250, "flush_interval": "5m", "write_timeout": "30s" }"#,
        )
        .unwrap();

        assert_eq!(config.batch_size, 250);
        assert_eq!(config.flush_interval, Duration::from_secs(300));
        assert_eq!(config.write_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.timer_tick, Duration::from_secs(5));
    }

    #[test]
    fn fractional_megabytes_convert_to_bytes() {
        let config = IngestConfig {
            max_buffer_mb: 0.5,
            ..IngestConfig::default()
        };
        assert_eq!(config.flush_policy().max_buffer_bytes, 512 * 1024);
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = IngestConfig::from_json(r#"{ "batchSize": 10 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation_catches_nonsense() {
        let zero_batch = IngestConfig {
            batch_size: 0,
            ..IngestConfig::default()
        };
        let err = zero_batch.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));

        let negative = IngestConfig {
            max_buffer_mb: -1.0,
            ..IngestConfig::default()
        };
        assert!(negative.validate().is_err());
    }
}
