//! Configuration for Hafiz transfers

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{MAX_PART_SIZE, MIN_PART_SIZE};

/// Default part size for uploads and downloads (5 MiB)
pub const DEFAULT_PART_SIZE: u64 = MIN_PART_SIZE;

/// Default worker count for uploads and downloads
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default size above which copies go multipart (10 MiB)
pub const DEFAULT_COPY_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Default worker count for multipart copies
pub const DEFAULT_COPY_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub copy: CopyConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TransferConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::InternalError(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::InternalError(format!("Failed to parse config: {}", e)))
    }

    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Overlay `HAFIZ_*` environment variables on top of this config.
    pub fn apply_env(mut self) -> Self {
        if let Some(size) = env_parse::<u64>("HAFIZ_PART_SIZE") {
            self.upload.part_size = size;
            self.download.part_size = size;
        }
        if let Some(n) = env_parse::<usize>("HAFIZ_CONCURRENCY") {
            self.upload.concurrency = n;
            self.download.concurrency = n;
        }
        if let Some(n) = env_parse::<usize>("HAFIZ_COPY_CONCURRENCY") {
            self.copy.concurrency = n;
        }
        if let Some(threshold) = env_parse::<u64>("HAFIZ_MULTIPART_THRESHOLD") {
            self.upload.multipart_threshold = threshold;
        }
        if let Some(threshold) = env_parse::<u64>("HAFIZ_COPY_THRESHOLD") {
            self.copy.multipart_threshold = threshold;
        }
        if let Some(leave) = env_parse::<bool>("HAFIZ_LEAVE_PARTS_ON_ERROR") {
            self.upload.leave_parts_on_error = leave;
            self.copy.leave_parts_on_error = leave;
        }
        if let Some(discover) = env_parse::<bool>("HAFIZ_DISCOVER_SOURCE_REGION") {
            self.copy.discover_source_bucket_region = discover;
        }
        if let Some(n) = env_parse::<u32>("HAFIZ_MAX_RETRIES") {
            self.retry.max_retries = n;
        }
        if let Ok(level) = std::env::var("HAFIZ_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("HAFIZ_LOG_FORMAT") {
            self.logging.format = format;
        }
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.upload.validate()?;
        self.download.validate()?;
        self.copy.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn check_part_size(name: &str, size: u64) -> crate::Result<()> {
    if !(MIN_PART_SIZE..=MAX_PART_SIZE).contains(&size) {
        return Err(crate::Error::InvalidArgument(format!(
            "{} must be between {} and {} bytes, got {}",
            name, MIN_PART_SIZE, MAX_PART_SIZE, size
        )));
    }
    Ok(())
}

fn check_concurrency(concurrency: usize) -> crate::Result<()> {
    if concurrency == 0 {
        return Err(crate::Error::InvalidArgument(
            "concurrency must be greater than zero".into(),
        ));
    }
    Ok(())
}

/// Upload settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Size of each uploaded part
    pub part_size: u64,
    /// Parts uploaded in parallel
    pub concurrency: usize,
    /// Sources at or below this size go up in a single PUT
    pub multipart_threshold: u64,
    /// Skip the abort call when a multipart upload fails
    pub leave_parts_on_error: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            multipart_threshold: DEFAULT_PART_SIZE,
            leave_parts_on_error: false,
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> crate::Result<()> {
        check_part_size("upload.part_size", self.part_size)?;
        check_concurrency(self.concurrency)
    }
}

/// Download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Size of each ranged GET
    pub part_size: u64,
    /// Ranged GETs in flight at once
    pub concurrency: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl DownloadConfig {
    pub fn validate(&self) -> crate::Result<()> {
        check_part_size("download.part_size", self.part_size)?;
        check_concurrency(self.concurrency)
    }
}

/// Server-side copy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyConfig {
    /// Upper bound for each copied part
    pub max_part_size: u64,
    /// Parts copied in parallel
    pub concurrency: usize,
    /// Sources at or below this size use a single CopyObject
    pub multipart_threshold: u64,
    pub leave_parts_on_error: bool,
    /// Look up the source bucket's region when the caller did not give one
    pub discover_source_bucket_region: bool,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            max_part_size: MAX_PART_SIZE,
            concurrency: DEFAULT_COPY_CONCURRENCY,
            multipart_threshold: DEFAULT_COPY_THRESHOLD,
            leave_parts_on_error: false,
            discover_source_bucket_region: true,
        }
    }
}

impl CopyConfig {
    pub fn validate(&self) -> crate::Result<()> {
        check_part_size("copy.max_part_size", self.max_part_size)?;
        check_part_size("copy.multipart_threshold", self.multipart_threshold)?;
        check_concurrency(self.concurrency)
    }
}

/// Per-request retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub min_retry_delay_ms: u64,
    pub min_throttle_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub max_throttle_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_retry_delay_ms: 30,
            min_throttle_delay_ms: 500,
            max_retry_delay_ms: 300_000,
            max_throttle_delay_ms: 300_000,
        }
    }
}

impl RetryConfig {
    pub fn min_retry_delay(&self) -> Duration {
        Duration::from_millis(self.min_retry_delay_ms)
    }

    pub fn min_throttle_delay(&self) -> Duration {
        Duration::from_millis(self.min_throttle_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn max_throttle_delay(&self) -> Duration {
        Duration::from_millis(self.max_throttle_delay_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.min_retry_delay_ms > self.max_retry_delay_ms
            || self.min_throttle_delay_ms > self.max_throttle_delay_ms
        {
            return Err(crate::Error::InvalidArgument(
                "retry minimum delay exceeds maximum delay".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TransferConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.upload.part_size, 5 * 1024 * 1024);
        assert_eq!(config.upload.concurrency, 5);
        assert_eq!(config.download.concurrency, 5);
        assert_eq!(config.copy.concurrency, 10);
        assert_eq!(config.copy.multipart_threshold, 10 * 1024 * 1024);
        assert!(config.copy.discover_source_bucket_region);
        assert!(!config.upload.leave_parts_on_error);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_from_toml_partial_sections() {
        let config = TransferConfig::from_toml(
            r#"
            [upload]
            part_size = 8388608
            leave_parts_on_error = true

            [copy]
            concurrency = 4

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.upload.part_size, 8 * 1024 * 1024);
        assert_eq!(config.upload.concurrency, 5);
        assert!(config.upload.leave_parts_on_error);
        assert_eq!(config.copy.concurrency, 4);
        assert_eq!(config.copy.max_part_size, MAX_PART_SIZE);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = TransferConfig::default();
        config.upload.part_size = 1024;
        assert!(config.validate().is_err());

        let mut config = TransferConfig::default();
        config.download.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = TransferConfig::default();
        config.copy.max_part_size = MAX_PART_SIZE + 1;
        assert!(config.validate().is_err());

        let mut config = TransferConfig::default();
        config.retry.min_retry_delay_ms = 10_000_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(TransferConfig::from_toml("[upload\npart_size = ").is_err());
    }
}
