//! Configuration management for Hafiz CLI
//!
//! Config file location: ~/.hafiz/config.toml
//!
//! Example config:
//! ```toml
//! [default]
//! endpoint = "http://localhost:9000"
//! access_key = "minioadmin"
//! secret_key = "minioadmin"
//! region = "us-east-1"
//! multipart_chunksize = 16777216
//!
//! [production]
//! endpoint = "https://s3.example.com"
//! access_key = "prod-access-key"
//! secret_key = "prod-secret-key"
//! max_concurrent_requests = 20
//! ```

use anyhow::{Context, Result};
use hafiz_core::config::{TransferConfig, DEFAULT_CONCURRENCY, DEFAULT_PART_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One profile of the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// S3 endpoint URL
    pub endpoint: Option<String>,

    /// Access key ID
    pub access_key: Option<String>,

    /// Secret access key
    pub secret_key: Option<String>,

    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,

    /// Path style access (use path instead of virtual hosted style)
    #[serde(default = "default_true")]
    pub path_style: bool,

    /// Multipart upload threshold (bytes)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,

    /// Multipart chunk size (bytes)
    #[serde(default = "default_multipart_chunksize")]
    pub multipart_chunksize: u64,

    /// Parts in flight per transfer
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Keep uploaded parts when a multipart transfer fails
    #[serde(default)]
    pub leave_parts_on_error: bool,

    /// Transfer settings file layered under the profile values
    pub transfer_config: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_key: None,
            secret_key: None,
            region: default_region(),
            path_style: true,
            multipart_threshold: default_multipart_threshold(),
            multipart_chunksize: default_multipart_chunksize(),
            max_concurrent_requests: default_max_concurrent(),
            leave_parts_on_error: false,
            transfer_config: None,
        }
    }
}

fn default_region() -> String {
    hafiz_core::DEFAULT_REGION.to_string()
}

fn default_true() -> bool {
    true
}

fn default_multipart_threshold() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_multipart_chunksize() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_max_concurrent() -> usize {
    DEFAULT_CONCURRENCY
}

/// Configuration file with multiple profiles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(flatten)]
    pub profiles: HashMap<String, Config>,
}

impl Config {
    /// Get config directory path
    pub fn config_dir() -> Result<PathBuf> {
        let home = directories::BaseDirs::new()
            .context("Could not determine home directory")?
            .home_dir()
            .to_path_buf();

        Ok(home.join(".hafiz"))
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file and environment
    pub fn load(profile: Option<&str>) -> Result<Self> {
        let config_path = Self::config_path()?;
        let mut config = if config_path.exists() {
            Self::load_profile(&config_path, profile)?
        } else {
            Config::default()
        };

        if let Some(endpoint) = env_first(&["AWS_ENDPOINT_URL", "HAFIZ_ENDPOINT"]) {
            config.endpoint = Some(endpoint);
        }
        if let Some(access_key) = env_first(&["AWS_ACCESS_KEY_ID", "HAFIZ_ACCESS_KEY"]) {
            config.access_key = Some(access_key);
        }
        if let Some(secret_key) = env_first(&["AWS_SECRET_ACCESS_KEY", "HAFIZ_SECRET_KEY"]) {
            config.secret_key = Some(secret_key);
        }
        if let Some(region) = env_first(&["AWS_REGION", "HAFIZ_REGION"]) {
            config.region = region;
        }

        Ok(config)
    }

    /// Read one profile from a config file
    pub fn load_profile(path: &Path, profile: Option<&str>) -> Result<Self> {
        let profile_name = profile.unwrap_or("default");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config_file: ConfigFile =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;

        Ok(config_file
            .profiles
            .get(profile_name)
            .cloned()
            .unwrap_or_default())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.access_key.is_some() != self.secret_key.is_some() {
            anyhow::bail!(
                "Set both HAFIZ_ACCESS_KEY and HAFIZ_SECRET_KEY, or neither to use the default credential chain"
            );
        }
        Ok(())
    }

    /// Transfer settings for this profile.
    ///
    /// The optional transfer config file is read first, the profile's
    /// multipart keys are applied on top, then `HAFIZ_*` variables.
    pub fn transfer(&self) -> Result<TransferConfig> {
        let mut transfer = match &self.transfer_config {
            Some(path) => TransferConfig::from_file(&path.to_string_lossy())
                .with_context(|| format!("Failed to load transfer config {:?}", path))?,
            None => TransferConfig::default(),
        };

        transfer.upload.part_size = self.multipart_chunksize;
        transfer.upload.multipart_threshold = self.multipart_threshold;
        transfer.upload.concurrency = self.max_concurrent_requests;
        transfer.upload.leave_parts_on_error = self.leave_parts_on_error;
        transfer.download.part_size = self.multipart_chunksize;
        transfer.download.concurrency = self.max_concurrent_requests;
        transfer.copy.leave_parts_on_error = self.leave_parts_on_error;

        let transfer = transfer.apply_env();
        transfer.validate().context("Invalid transfer settings")?;
        Ok(transfer)
    }
}

/// Value of the first variable in `names` that is set
fn env_first(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| std::env::var(name).ok())
}
