//! [`StorageClient`] backed by the AWS SDK for S3

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream as SdkByteStream, DateTime as SdkDateTime};
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart as SdkCompletedPart,
    MetadataDirective as SdkMetadataDirective,
};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use hafiz_core::types::{
    CompleteMultipartOutput, CompletedPart, CopyConditions, CopyObjectOutput, CopyObjectRequest,
    ListObjectsPage, MetadataDirective, ObjectAttributes, ObjectHead, ObjectRef, ObjectSummary,
    PutObjectOutput, RangeSpec, UploadPartCopyRequest,
};
use hafiz_core::{Error, Result, DEFAULT_REGION};
use tracing::debug;

use crate::client::{GetObjectOutput, StorageClient};

/// S3 client adapter.
#[derive(Clone)]
pub struct S3StorageClient {
    client: Client,
}

impl S3StorageClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn map_sdk_error<E>(err: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::ServiceError(service) => {
            let raw = service.raw();
            let status = raw.status().as_u16();
            let retry_after = raw
                .headers()
                .get("retry-after")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let e = service.err();
            let code = match e.code() {
                Some(code) => code.to_string(),
                None if status == 404 => "NotFound".to_string(),
                None => format!("Http{}", status),
            };
            Error::from_service(status, &code, e.message().unwrap_or_default(), retry_after)
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            Error::Transport(DisplayErrorContext(&err).to_string())
        }
        _ => Error::InternalError(DisplayErrorContext(&err).to_string()),
    }
}

fn to_chrono(dt: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn to_sdk_time(dt: Option<DateTime<Utc>>) -> Option<SdkDateTime> {
    dt.map(|d| SdkDateTime::from_secs(d.timestamp()))
}

fn metadata(attributes: &ObjectAttributes) -> Option<std::collections::HashMap<String, String>> {
    (!attributes.metadata.is_empty()).then(|| attributes.metadata.clone())
}

fn size(value: Option<i64>) -> u64 {
    value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0)
}

fn region_override(region: &str) -> aws_sdk_s3::config::Builder {
    aws_sdk_s3::config::Builder::default().region(Region::new(region.to_string()))
}

#[async_trait]
impl StorageClient for S3StorageClient {
    async fn head_object(&self, object: &ObjectRef, region: Option<&str>) -> Result<ObjectHead> {
        let request = self
            .client
            .head_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .set_version_id(object.version_id.clone());

        let output = match region {
            Some(region) => {
                request
                    .customize()
                    .config_override(region_override(region))
                    .send()
                    .await
            }
            None => request.send().await,
        }
        .map_err(map_sdk_error)?;

        Ok(ObjectHead {
            size: size(output.content_length()),
            etag: output.e_tag().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
            last_modified: output.last_modified().and_then(to_chrono),
            content_type: output.content_type().map(str::to_string),
            metadata: output.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn get_object(
        &self,
        object: &ObjectRef,
        range: Option<RangeSpec>,
    ) -> Result<GetObjectOutput> {
        let output = self
            .client
            .get_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .set_version_id(object.version_id.clone())
            .set_range(range.map(|r| r.to_string()))
            .send()
            .await
            .map_err(map_sdk_error)?;

        let content_length = output.content_length().and_then(|v| u64::try_from(v).ok());
        let content_range = output.content_range().map(str::to_string);
        let etag = output.e_tag().map(str::to_string);

        let body = stream::try_unfold(output.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Ok(Some((chunk, body))),
                Ok(None) => Ok(None),
                Err(e) => Err(Error::Transport(format!("reading response body: {}", e))),
            }
        })
        .boxed();

        Ok(GetObjectOutput {
            body,
            content_length,
            content_range,
            etag,
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        attributes: &ObjectAttributes,
    ) -> Result<PutObjectOutput> {
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(SdkByteStream::from(body.to_vec()))
            .set_content_type(attributes.content_type.clone())
            .set_metadata(metadata(attributes))
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(PutObjectOutput {
            etag: output.e_tag().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
        })
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> Result<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_content_type(attributes.content_type.clone())
            .set_metadata(metadata(attributes))
            .send()
            .await
            .map_err(map_sdk_error)?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| Error::InternalError("CreateMultipartUpload returned no upload ID".into()))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: &[u8],
    ) -> Result<String> {
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(body.len() as i64)
            .body(SdkByteStream::from(body.to_vec()))
            .send()
            .await
            .map_err(map_sdk_error)?;

        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| Error::InternalError(format!("UploadPart {} returned no ETag", part_number)))
    }

    async fn upload_part_copy(&self, request: &UploadPartCopyRequest) -> Result<String> {
        let CopyConditions {
            if_match,
            if_none_match,
            if_modified_since,
            if_unmodified_since,
        } = request.conditions.clone();

        let output = self
            .client
            .upload_part_copy()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(&request.upload_id)
            .part_number(request.part_number)
            .copy_source(request.source.to_header())
            .copy_source_range(request.source_range.to_header())
            .set_copy_source_if_match(if_match)
            .set_copy_source_if_none_match(if_none_match)
            .set_copy_source_if_modified_since(to_sdk_time(if_modified_since))
            .set_copy_source_if_unmodified_since(to_sdk_time(if_unmodified_since))
            .send()
            .await
            .map_err(map_sdk_error)?;

        output
            .copy_part_result()
            .and_then(|r| r.e_tag())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::InternalError(format!(
                    "UploadPartCopy {} returned no ETag",
                    request.part_number
                ))
            })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartOutput> {
        let parts = parts
            .iter()
            .map(|p| {
                SdkCompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(CompleteMultipartOutput {
            etag: output.e_tag().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
            location: output.location().map(str::to_string),
        })
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn copy_object(&self, request: &CopyObjectRequest) -> Result<CopyObjectOutput> {
        let CopyConditions {
            if_match,
            if_none_match,
            if_modified_since,
            if_unmodified_since,
        } = request.conditions.clone();

        let mut builder = self
            .client
            .copy_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .copy_source(request.source.to_header())
            .set_copy_source_if_match(if_match)
            .set_copy_source_if_none_match(if_none_match)
            .set_copy_source_if_modified_since(to_sdk_time(if_modified_since))
            .set_copy_source_if_unmodified_since(to_sdk_time(if_unmodified_since));

        builder = match request.metadata_directive {
            MetadataDirective::Copy => builder.metadata_directive(SdkMetadataDirective::Copy),
            MetadataDirective::Replace => builder
                .metadata_directive(SdkMetadataDirective::Replace)
                .set_content_type(request.attributes.content_type.clone())
                .set_metadata(metadata(&request.attributes)),
        };

        let output = builder.send().await.map_err(map_sdk_error)?;

        Ok(CopyObjectOutput {
            etag: output
                .copy_object_result()
                .and_then(|r| r.e_tag())
                .map(str::to_string),
            version_id: output.version_id().map(str::to_string),
        })
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .set_version_id(object.version_id.clone())
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        marker: Option<&str>,
    ) -> Result<ListObjectsPage> {
        let output = self
            .client
            .list_objects()
            .bucket(bucket)
            .set_prefix(prefix.map(str::to_string))
            .set_marker(marker.map(str::to_string))
            .send()
            .await
            .map_err(map_sdk_error)?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|o| {
                Some(ObjectSummary {
                    key: o.key()?.to_string(),
                    size: size(o.size()),
                    etag: o.e_tag().map(str::to_string),
                    last_modified: o.last_modified().and_then(to_chrono),
                })
            })
            .collect();

        Ok(ListObjectsPage {
            objects,
            next_marker: output.next_marker().map(str::to_string),
            is_truncated: output.is_truncated().unwrap_or(false),
        })
    }

    async fn bucket_region(&self, bucket: &str) -> Result<String> {
        let output = self
            .client
            .get_bucket_location()
            .bucket(bucket)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let region = match output.location_constraint().map(|c| c.as_str()) {
            None | Some("") => DEFAULT_REGION.to_string(),
            Some("EU") => "eu-west-1".to_string(),
            Some(other) => other.to_string(),
        };
        debug!("Bucket {} is in region {}", bucket, region);
        Ok(region)
    }
}
