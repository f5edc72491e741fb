//! Engine configuration.
//!
//! [`Config`] deserializes from TOML with every field defaulted, so an empty
//! document is valid. [`Config::validate`] fails closed: the processor refuses
//! to start with a configuration it would only trip over mid-run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::media::Format;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Concurrent workers; 0 uses the available parallelism.
    pub worker_count: usize,
    /// Bounded job queue length.
    pub queue_capacity: usize,
    /// Per-job deadline in milliseconds; 0 disables it.
    pub job_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub default_quality: u8,
    pub default_format: Format,
    /// Ingestion ceiling in bytes; 0 is unlimited.
    pub max_image_bytes: u64,
    /// Size of each pooled staging chunk used during ingestion.
    pub chunk_size: usize,
    /// How long queued jobs may still be drained after `stop`.
    pub shutdown_grace_ms: u64,
    /// Maximum wait when delivering a job result to its channel.
    pub result_delivery_timeout_ms: u64,
    pub adaptive: AdaptiveConfig,
    pub storage: StorageConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: 0,
            queue_capacity: 256,
            job_timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 200,
            default_quality: 85,
            default_format: Format::Jpeg,
            max_image_bytes: 0,
            chunk_size: 32 * 1024,
            shutdown_grace_ms: 5_000,
            result_delivery_timeout_ms: 1_000,
            adaptive: AdaptiveConfig::default(),
            storage: StorageConfig::default(),
            log_level: "info".into(),
        }
    }
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    ///
    /// String-based so the caller decides how the file is read.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::config(format!("config parse error: {e}")))
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.default_quality) {
            return Err(Error::config(format!(
                "default_quality must be within 1..=100, got {}",
                self.default_quality
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::config("chunk_size must be positive"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::config("queue_capacity must be positive"));
        }
        if self.default_format == Format::Unknown {
            return Err(Error::config("default_format must be jpeg, png or webp"));
        }
        self.adaptive.validate()
    }

    /// Resolved worker count.
    pub fn workers(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_count
        }
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_ms > 0).then(|| Duration::from_millis(self.job_timeout_ms))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn result_delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.result_delivery_timeout_ms)
    }

    /// Ingestion ceiling, `None` when unlimited.
    pub fn max_image_bytes(&self) -> Option<u64> {
        (self.max_image_bytes > 0).then_some(self.max_image_bytes)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Defaults for the adaptive compression step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    /// Target encoded size; 0 leaves the target to each step.
    pub target_size_bytes: u64,
    pub min_quality: u8,
    pub max_quality: u8,
    pub step_size: u8,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_size_bytes: 0,
            min_quality: 30,
            max_quality: 95,
            step_size: 5,
        }
    }
}

impl AdaptiveConfig {
    fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.min_quality >= self.max_quality {
            return Err(Error::config(format!(
                "adaptive.min_quality ({}) must be below adaptive.max_quality ({})",
                self.min_quality, self.max_quality
            )));
        }
        if self.max_quality > 100 {
            return Err(Error::config("adaptive.max_quality must not exceed 100"));
        }
        if self.step_size == 0 {
            return Err(Error::config("adaptive.step_size must be positive"));
        }
        Ok(())
    }
}

/// Local storage settings, used by the command-line front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./pixelforge-data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Category;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.chunk_size, 32 * 1024);
        assert_eq!(config.job_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.max_image_bytes(), None);
    }

    #[test]
    fn empty_toml_is_default() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.default_quality, 85);
        assert_eq!(config.adaptive.max_quality, 95);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn partial_toml_overrides() {
        let config = Config::from_toml(
            r#"
            worker_count = 2
            default_format = "webp"
            job_timeout_ms = 0

            [adaptive]
            enabled = true
            min_quality = 40
            "#,
        )
        .unwrap();
        assert_eq!(config.workers(), 2);
        assert_eq!(config.default_format, Format::Webp);
        assert_eq!(config.job_timeout(), None);
        assert!(config.adaptive.enabled);
        assert_eq!(config.adaptive.min_quality, 40);
        assert_eq!(config.adaptive.step_size, 5);
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = Config::from_toml("worker_count = \"many\"").unwrap_err();
        assert_eq!(err.category(), Category::Config);
    }

    #[test]
    fn rejects_out_of_range_quality() {
        for quality in [0, 101] {
            let config = Config {
                default_quality: quality,
                ..Config::default()
            };
            let err = config.validate().unwrap_err();
            assert_eq!(err.category(), Category::Config);
        }
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let config = Config {
            chunk_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_queue_capacity() {
        let config = Config {
            queue_capacity: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn adaptive_bounds_checked_only_when_enabled() {
        let mut config = Config::default();
        config.adaptive.min_quality = 90;
        config.adaptive.max_quality = 50;
        assert!(config.validate().is_ok());

        config.adaptive.enabled = true;
        assert!(config.validate().is_err());

        config.adaptive.min_quality = 30;
        config.adaptive.step_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_workers_resolves_to_parallelism() {
        assert!(Config::default().workers() >= 1);
    }
}
