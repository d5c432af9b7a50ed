//! Server-side copies
//!
//! Sources up to the multipart threshold are copied with one CopyObject.
//! Larger ones are copied range by range with UploadPartCopy into a new
//! multipart upload.

use std::sync::Arc;

use async_trait::async_trait;
use hafiz_core::config::CopyConfig;
use hafiz_core::types::{
    ByteRange, CopyConditions, CopyObjectRequest, CopySource, MetadataDirective, ObjectAttributes,
    ObjectHead, UploadPartCopyRequest,
};
use hafiz_core::{MAX_PARTS, MAX_PART_SIZE};
use hafiz_storage::StorageClient;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{TransferError, TransferResult};
use crate::multipart::{run_multipart, MultipartJob, PartOperation};
use crate::planner::{fit_part_size, optimal_part_size, TransferPlan};
use crate::worker::until_cancelled;

#[derive(Debug, Clone)]
pub struct CopyInput {
    /// Destination bucket
    pub bucket: String,
    /// Destination key
    pub key: String,
    /// URL-encoded `bucket/key[?versionId=id]`
    pub copy_source: String,
    /// Region of the source bucket; looked up when absent
    pub source_region: Option<String>,
    pub metadata_directive: MetadataDirective,
    /// Used with [`MetadataDirective::Replace`]
    pub attributes: ObjectAttributes,
    pub conditions: CopyConditions,
}

impl CopyInput {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        copy_source: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            copy_source: copy_source.into(),
            source_region: None,
            metadata_directive: MetadataDirective::Copy,
            attributes: ObjectAttributes::default(),
            conditions: CopyConditions::default(),
        }
    }

    pub fn with_source_region(mut self, region: impl Into<String>) -> Self {
        self.source_region = Some(region.into());
        self
    }

    /// Replace the source metadata with `attributes`.
    pub fn with_replaced_attributes(mut self, attributes: ObjectAttributes) -> Self {
        self.metadata_directive = MetadataDirective::Replace;
        self.attributes = attributes;
        self
    }

    pub fn with_conditions(mut self, conditions: CopyConditions) -> Self {
        self.conditions = conditions;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyOutput {
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub upload_id: Option<String>,
}

pub struct Copier {
    client: Arc<dyn StorageClient>,
    config: CopyConfig,
}

impl Copier {
    pub fn new(client: Arc<dyn StorageClient>, config: CopyConfig) -> Self {
        Self { client, config }
    }

    pub async fn copy(
        &self,
        input: CopyInput,
        cancel: &CancellationToken,
    ) -> TransferResult<CopyOutput> {
        self.config.validate().map_err(TransferError::config)?;
        let mut source = CopySource::parse(&input.copy_source)
            .map_err(|e| TransferError::InvalidRequest(e.to_string()))?;

        let region = match &input.source_region {
            Some(region) => Some(region.clone()),
            None if self.config.discover_source_bucket_region => Some(
                until_cancelled(cancel, self.client.bucket_region(&source.bucket))
                    .await
                    .ok_or(TransferError::Cancelled { upload_id: None })??,
            ),
            None => None,
        };

        let head = until_cancelled(
            cancel,
            self.client.head_object(&source.object_ref(), region.as_deref()),
        )
        .await
        .ok_or(TransferError::Cancelled { upload_id: None })??;

        let plan = self.plan(head.size)?;
        if head.size <= self.config.multipart_threshold || plan.part_count < 2 {
            debug!(
                "Copying {} to {}/{} ({} bytes) in a single request",
                input.copy_source, input.bucket, input.key, head.size
            );
            return self.copy_single(input, source, cancel).await;
        }

        // Part copies carry no preconditions, so they are checked once here
        // and the source is pinned to the version that passed.
        if !input.conditions.is_empty() {
            check_conditions(&input.conditions, &head)?;
        }
        if source.version_id.is_none() {
            source.version_id = head.version_id.clone();
        }

        let attributes = match input.metadata_directive {
            MetadataDirective::Copy => head.attributes(),
            MetadataDirective::Replace => input.attributes,
        };
        let op = Arc::new(CopyPart {
            client: Arc::clone(&self.client),
            bucket: input.bucket.clone(),
            key: input.key.clone(),
            source,
        });
        let job = MultipartJob {
            bucket: input.bucket,
            key: input.key,
            attributes,
            plan,
            concurrency: self.config.concurrency,
            leave_parts_on_error: self.config.leave_parts_on_error,
        };

        let outcome = run_multipart(&self.client, &job, op, cancel).await?;
        info!(
            "Copied {} to {}/{} ({} bytes in {} parts)",
            input.copy_source, job.bucket, job.key, head.size, plan.part_count
        );
        Ok(CopyOutput {
            etag: outcome.output.etag,
            version_id: outcome.output.version_id,
            upload_id: Some(outcome.upload_id),
        })
    }

    fn plan(&self, size: u64) -> TransferResult<TransferPlan> {
        let part_size = optimal_part_size(size, self.config.concurrency).min(self.config.max_part_size);
        let part_size = fit_part_size(size, part_size, MAX_PARTS);
        if part_size > MAX_PART_SIZE {
            return Err(TransferError::InvalidRequest(format!(
                "source of {} bytes needs parts of {} bytes, above the {} byte limit",
                size, part_size, MAX_PART_SIZE
            )));
        }
        Ok(TransferPlan::new(size, part_size))
    }

    async fn copy_single(
        &self,
        input: CopyInput,
        source: CopySource,
        cancel: &CancellationToken,
    ) -> TransferResult<CopyOutput> {
        let request = CopyObjectRequest {
            bucket: input.bucket,
            key: input.key,
            source,
            metadata_directive: input.metadata_directive,
            attributes: input.attributes,
            conditions: input.conditions,
        };
        let output = until_cancelled(cancel, self.client.copy_object(&request))
            .await
            .ok_or(TransferError::Cancelled { upload_id: None })??;

        info!(
            "Copied {} to {}/{}",
            input.copy_source, request.bucket, request.key
        );
        Ok(CopyOutput {
            etag: output.etag,
            version_id: output.version_id,
            upload_id: None,
        })
    }
}

fn check_conditions(conditions: &CopyConditions, head: &ObjectHead) -> TransferResult<()> {
    let etag = head.etag.as_deref().unwrap_or_default();
    conditions.check(etag, head.last_modified)?;
    Ok(())
}

struct CopyPart {
    client: Arc<dyn StorageClient>,
    bucket: String,
    key: String,
    source: CopySource,
}

#[async_trait]
impl PartOperation for CopyPart {
    async fn transfer(
        &self,
        upload_id: &str,
        part_number: i32,
        range: ByteRange,
        _cancel: &CancellationToken,
    ) -> TransferResult<String> {
        let request = UploadPartCopyRequest {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            upload_id: upload_id.to_string(),
            part_number,
            source: self.source.clone(),
            source_range: range,
            conditions: CopyConditions::default(),
        };
        Ok(self.client.upload_part_copy(&request).await?)
    }
}
