//! S3 client wrapper for Hafiz CLI

use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::Client;
use hafiz_core::config::RetryConfig;
use hafiz_storage::{RetryingClient, S3StorageClient, StorageClient};

/// Create a retrying storage client from configuration.
///
/// Static keys from the profile win; otherwise the default AWS credential
/// chain is used.
pub async fn create_client(config: &Config, retry: RetryConfig) -> Result<Arc<dyn StorageClient>> {
    config.validate()?;

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .load()
        .await;

    let mut builder = S3ConfigBuilder::from(&sdk_config).force_path_style(config.path_style);

    if let Some(endpoint) = &config.endpoint {
        builder = builder.endpoint_url(endpoint);
    }

    if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
        let credentials = Credentials::new(access_key, secret_key, None, None, "hafiz-cli");
        builder = builder.credentials_provider(credentials);
    }

    let client = Client::from_conf(builder.build());
    Ok(Arc::new(RetryingClient::with_config(
        S3StorageClient::new(client),
        retry,
    )))
}

/// `s3://bucket[/key]` location named on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Uri {
    pub bucket: String,
    /// `None` for the bucket root
    pub key: Option<String>,
}

impl S3Uri {
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix(S3_SCHEME)
            .with_context(|| format!("Invalid S3 URI: {}. Must start with s3://", uri))?;

        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            anyhow::bail!("Invalid S3 URI {}: bucket name cannot be empty", uri);
        }

        Ok(Self {
            bucket: bucket.to_string(),
            key: (!key.is_empty()).then(|| key.to_string()),
        })
    }

    /// Bucket root or a key ending in `/`
    pub fn is_prefix(&self) -> bool {
        self.key.as_deref().map_or(true, |k| k.ends_with('/'))
    }
}

impl fmt::Display for S3Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", S3_SCHEME, self.bucket)?;
        match &self.key {
            Some(key) => write!(f, "/{}", key),
            None => Ok(()),
        }
    }
}

const S3_SCHEME: &str = "s3://";

pub fn is_s3_uri(path: &str) -> bool {
    path.starts_with(S3_SCHEME)
}

/// Which transfer manager a `cp` maps onto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
    /// Server-side copy
    S3ToS3,
    LocalToLocal,
}

impl TransferDirection {
    pub fn determine(source: &str, dest: &str) -> Self {
        match (is_s3_uri(source), is_s3_uri(dest)) {
            (false, true) => TransferDirection::Upload,
            (true, false) => TransferDirection::Download,
            (true, true) => TransferDirection::S3ToS3,
            (false, false) => TransferDirection::LocalToLocal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_locations() {
        let root = S3Uri::parse("s3://media").unwrap();
        assert_eq!(root.bucket, "media");
        assert_eq!(root.key, None);
        assert!(root.is_prefix());
        assert_eq!(S3Uri::parse("s3://media/").unwrap(), root);

        let object = S3Uri::parse("s3://media/2024/clip.mov").unwrap();
        assert_eq!(object.key.as_deref(), Some("2024/clip.mov"));
        assert!(!object.is_prefix());

        let prefix = S3Uri::parse("s3://media/2024/").unwrap();
        assert!(prefix.is_prefix());
        assert_eq!(prefix.to_string(), "s3://media/2024/");
        assert_eq!(root.to_string(), "s3://media");
    }

    #[test]
    fn test_rejects_bad_locations() {
        assert!(S3Uri::parse("media/clip.mov").is_err());
        assert!(S3Uri::parse("https://media/clip.mov").is_err());
        assert!(S3Uri::parse("s3://").is_err());
        assert!(S3Uri::parse("s3:///clip.mov").is_err());
    }

    #[test]
    fn test_direction_picks_transfer_manager() {
        let cases = [
            ("./clip.mov", "s3://media/", TransferDirection::Upload),
            ("s3://media/clip.mov", ".", TransferDirection::Download),
            ("s3://media/clip.mov", "s3://archive/", TransferDirection::S3ToS3),
            ("./a", "./b", TransferDirection::LocalToLocal),
        ];
        for (source, dest, expected) in cases {
            assert_eq!(TransferDirection::determine(source, dest), expected);
        }
    }
}
