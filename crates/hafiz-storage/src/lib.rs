//! Hafiz Storage
//!
//! The [`StorageClient`] trait the transfer managers talk to, plus an
//! in-memory backend, an S3 backend and a retrying wrapper.

pub mod client;
pub mod memory;
pub mod retry;
pub mod s3;

pub use client::{ByteStream, GetObjectOutput, StorageClient};
pub use memory::MemoryStorage;
pub use retry::{DefaultRetryPolicy, RetryPolicy, RetryingClient};
pub use s3::S3StorageClient;
