//! Hafiz Core Library
//!
//! Core types, limits, errors and configuration shared by the Hafiz
//! transfer crates.

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use config::TransferConfig;
pub use error::{Error, Result};

/// Hafiz version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default S3 region
pub const DEFAULT_REGION: &str = "us-east-1";

/// Maximum object size (5 TiB)
pub const MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024 * 1024;

/// Maximum number of parts in multipart upload
pub const MAX_PARTS: u64 = 10_000;

/// Minimum part size (5 MiB)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum part size (5 GiB)
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;
