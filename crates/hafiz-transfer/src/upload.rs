//! Uploads
//!
//! Small sources go up in a single PUT. Larger ones are split into parts
//! that a bounded set of workers upload concurrently, after which the
//! multipart session is completed (or aborted on failure).

use std::sync::Arc;

use async_trait::async_trait;
use hafiz_core::config::UploadConfig;
use hafiz_core::types::{ByteRange, ObjectAttributes};
use hafiz_core::{MAX_PARTS, MAX_PART_SIZE};
use hafiz_storage::StorageClient;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::batch::{self, BatchIterator, BatchOperation, BatchUploadObject};
use crate::error::{TransferError, TransferResult};
use crate::multipart::{run_multipart, MultipartJob, PartOperation};
use crate::planner::{fit_part_size, TransferPlan};
use crate::pool::BufferPool;
use crate::source::{ReadAt, UploadBody};
use crate::worker::until_cancelled;

#[derive(Debug)]
pub struct UploadInput {
    pub bucket: String,
    pub key: String,
    pub body: UploadBody,
    pub attributes: ObjectAttributes,
}

impl UploadInput {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, body: impl Into<UploadBody>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            body: body.into(),
            attributes: ObjectAttributes::default(),
        }
    }

    pub fn with_attributes(mut self, attributes: ObjectAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.attributes.content_type = Some(content_type.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOutput {
    pub etag: Option<String>,
    pub version_id: Option<String>,
    /// Only reported by multipart uploads
    pub location: Option<String>,
    /// Set when the object went up in parts
    pub upload_id: Option<String>,
}

pub struct Uploader {
    client: Arc<dyn StorageClient>,
    config: UploadConfig,
    buffer_pool: Option<BufferPool>,
    lease_pool_capacity: bool,
}

impl Uploader {
    pub fn new(client: Arc<dyn StorageClient>, config: UploadConfig) -> Self {
        Self {
            client,
            config,
            buffer_pool: None,
            lease_pool_capacity: false,
        }
    }

    /// Read parts into buffers from `pool` instead of fresh allocations.
    pub fn with_buffer_pool(mut self, pool: BufferPool) -> Self {
        self.buffer_pool = Some(pool);
        self.lease_pool_capacity = false;
        self
    }

    /// Like [`Uploader::with_buffer_pool`], for a pool shared with other
    /// uploaders: each multipart upload grows the pool by its concurrency
    /// for as long as it runs.
    pub fn with_shared_buffer_pool(mut self, pool: BufferPool) -> Self {
        self.buffer_pool = Some(pool);
        self.lease_pool_capacity = true;
        self
    }

    pub async fn upload(
        &self,
        input: UploadInput,
        cancel: &CancellationToken,
    ) -> TransferResult<UploadOutput> {
        self.config.validate().map_err(TransferError::config)?;
        if let Some(pool) = &self.buffer_pool {
            if (pool.buffer_size() as u64) < self.config.part_size {
                return Err(TransferError::InvalidConfig(format!(
                    "buffer size {} is smaller than the part size {}",
                    pool.buffer_size(),
                    self.config.part_size
                )));
            }
        }

        let UploadInput {
            bucket,
            key,
            body,
            attributes,
        } = input;

        let source = until_cancelled(cancel, body.into_source())
            .await
            .ok_or(TransferError::Cancelled { upload_id: None })??;
        let source: Arc<dyn ReadAt> = Arc::from(source);
        let size = source.size();
        let plan = plan_upload(size, &self.config)?;

        if size <= self.config.multipart_threshold || plan.is_single_part() {
            debug!("Uploading {}/{} ({} bytes) in a single request", bucket, key, size);
            return self
                .put_single(&bucket, &key, source.as_ref(), &attributes, cancel)
                .await;
        }

        let _lease = match &self.buffer_pool {
            Some(pool) if self.lease_pool_capacity => Some(pool.lease(self.config.concurrency)),
            _ => None,
        };

        let op = Arc::new(UploadPart {
            client: Arc::clone(&self.client),
            bucket: bucket.clone(),
            key: key.clone(),
            source,
            pool: self.buffer_pool.clone(),
        });
        let job = MultipartJob {
            bucket,
            key,
            attributes,
            plan,
            concurrency: self.config.concurrency,
            leave_parts_on_error: self.config.leave_parts_on_error,
        };

        let outcome = run_multipart(&self.client, &job, op, cancel).await?;
        info!(
            "Uploaded {}/{} ({} bytes in {} parts)",
            job.bucket, job.key, size, plan.part_count
        );
        Ok(UploadOutput {
            etag: outcome.output.etag,
            version_id: outcome.output.version_id,
            location: outcome.output.location,
            upload_id: Some(outcome.upload_id),
        })
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        source: &dyn ReadAt,
        attributes: &ObjectAttributes,
        cancel: &CancellationToken,
    ) -> TransferResult<UploadOutput> {
        let len = usize::try_from(source.size())
            .map_err(|_| TransferError::InvalidRequest("source too large".to_string()))?;
        let mut body = vec![0u8; len];
        if len > 0 {
            source.read_at(0, &mut body).await?;
        }

        let output = until_cancelled(
            cancel,
            self.client.put_object(bucket, key, &body, attributes),
        )
        .await
        .ok_or(TransferError::Cancelled { upload_id: None })??;

        info!("Uploaded {}/{} ({} bytes)", bucket, key, len);
        Ok(UploadOutput {
            etag: output.etag,
            version_id: output.version_id,
            location: None,
            upload_id: None,
        })
    }

    /// Upload every item of `iter` in turn, collecting failures.
    pub async fn upload_with_iterator<I>(
        &self,
        iter: &mut I,
        cancel: &CancellationToken,
    ) -> TransferResult<()>
    where
        I: BatchIterator<Item = BatchUploadObject>,
    {
        batch::execute(BatchOperation::Upload, iter, cancel, |item| async move {
            self.upload(item.input, cancel).await.map(|_| ())
        })
        .await
    }
}

/// Split `size` bytes into parts, growing the part size to stay within
/// the part count limit.
pub(crate) fn plan_upload(size: u64, config: &UploadConfig) -> TransferResult<TransferPlan> {
    let part_size = fit_part_size(size, config.part_size, MAX_PARTS);
    if part_size > MAX_PART_SIZE {
        return Err(TransferError::InvalidRequest(format!(
            "object of {} bytes needs parts of {} bytes, above the {} byte limit",
            size, part_size, MAX_PART_SIZE
        )));
    }
    Ok(TransferPlan::new(size, part_size))
}

struct UploadPart {
    client: Arc<dyn StorageClient>,
    bucket: String,
    key: String,
    source: Arc<dyn ReadAt>,
    pool: Option<BufferPool>,
}

impl UploadPart {
    async fn send(
        &self,
        upload_id: &str,
        part_number: i32,
        offset: u64,
        buf: &mut [u8],
    ) -> TransferResult<String> {
        self.source.read_at(offset, buf).await?;
        Ok(self
            .client
            .upload_part(&self.bucket, &self.key, upload_id, part_number, buf)
            .await?)
    }
}

#[async_trait]
impl PartOperation for UploadPart {
    async fn transfer(
        &self,
        upload_id: &str,
        part_number: i32,
        range: ByteRange,
        cancel: &CancellationToken,
    ) -> TransferResult<String> {
        let len = usize::try_from(range.size())
            .map_err(|_| TransferError::InvalidRequest("part too large".to_string()))?;

        match &self.pool {
            Some(pool) if pool.buffer_size() >= len => {
                let mut buf = pool.get(cancel).await?;
                self.send(upload_id, part_number, range.start, &mut buf[..len])
                    .await
            }
            _ => {
                let mut buf = vec![0u8; len];
                self.send(upload_id, part_number, range.start, &mut buf)
                    .await
            }
        }
    }
}
