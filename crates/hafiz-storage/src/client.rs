//! Storage client abstraction used by the transfer managers

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use hafiz_core::types::{
    CompleteMultipartOutput, CompletedPart, ContentRange, CopyObjectOutput, CopyObjectRequest,
    ListObjectsPage, ObjectAttributes, ObjectHead, ObjectRef, PutObjectOutput, RangeSpec,
    UploadPartCopyRequest,
};
use hafiz_core::Result;

/// Streaming response body.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Response of a (possibly ranged) GET.
pub struct GetObjectOutput {
    pub body: ByteStream,
    pub content_length: Option<u64>,
    /// Raw `Content-Range` header, present on ranged responses
    pub content_range: Option<String>,
    pub etag: Option<String>,
}

impl GetObjectOutput {
    /// Wrap an in-memory body, split into `chunk_size` pieces.
    pub fn from_bytes(data: Bytes, chunk_size: usize, content_range: Option<String>) -> Self {
        let content_length = Some(data.len() as u64);
        let chunk_size = chunk_size.max(1);
        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(chunk_size)
            .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
            .collect();
        Self {
            body: stream::iter(chunks).boxed(),
            content_length,
            content_range,
            etag: None,
        }
    }

    /// Parsed `Content-Range` header, if the response carried one.
    pub fn content_range(&self) -> Result<Option<ContentRange>> {
        self.content_range
            .as_deref()
            .map(ContentRange::parse)
            .transpose()
    }

    /// Drain the body into one buffer.
    pub async fn collect(self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.content_length.unwrap_or(0) as usize);
        let mut body = self.body;
        while let Some(chunk) = body.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

/// Object storage operations the transfer managers are built on.
///
/// Every call is a single request; cancellation is done by dropping the
/// returned future.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Size and metadata of an object. `region` overrides the client region.
    async fn head_object(&self, object: &ObjectRef, region: Option<&str>) -> Result<ObjectHead>;

    /// Fetch an object or a byte range of it.
    async fn get_object(&self, object: &ObjectRef, range: Option<RangeSpec>)
        -> Result<GetObjectOutput>;

    /// Single-request upload.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        attributes: &ObjectAttributes,
    ) -> Result<PutObjectOutput>;

    /// Start a multipart session, returning its upload ID.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> Result<String>;

    /// Upload one part, returning its ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: &[u8],
    ) -> Result<String>;

    /// Copy a source range into a part, returning its ETag.
    async fn upload_part_copy(&self, request: &UploadPartCopyRequest) -> Result<String>;

    /// Finalize a session. `parts` must be in ascending part order.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartOutput>;

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;

    /// Single-request server-side copy.
    async fn copy_object(&self, request: &CopyObjectRequest) -> Result<CopyObjectOutput>;

    async fn delete_object(&self, object: &ObjectRef) -> Result<()>;

    /// One page of keys after `marker`.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        marker: Option<&str>,
    ) -> Result<ListObjectsPage>;

    /// Region the bucket lives in.
    async fn bucket_region(&self, bucket: &str) -> Result<String>;
}

#[async_trait]
impl<T: StorageClient + ?Sized> StorageClient for Arc<T> {
    async fn head_object(&self, object: &ObjectRef, region: Option<&str>) -> Result<ObjectHead> {
        (**self).head_object(object, region).await
    }

    async fn get_object(
        &self,
        object: &ObjectRef,
        range: Option<RangeSpec>,
    ) -> Result<GetObjectOutput> {
        (**self).get_object(object, range).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        attributes: &ObjectAttributes,
    ) -> Result<PutObjectOutput> {
        (**self).put_object(bucket, key, body, attributes).await
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> Result<String> {
        (**self).create_multipart_upload(bucket, key, attributes).await
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: &[u8],
    ) -> Result<String> {
        (**self)
            .upload_part(bucket, key, upload_id, part_number, body)
            .await
    }

    async fn upload_part_copy(&self, request: &UploadPartCopyRequest) -> Result<String> {
        (**self).upload_part_copy(request).await
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartOutput> {
        (**self)
            .complete_multipart_upload(bucket, key, upload_id, parts)
            .await
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        (**self).abort_multipart_upload(bucket, key, upload_id).await
    }

    async fn copy_object(&self, request: &CopyObjectRequest) -> Result<CopyObjectOutput> {
        (**self).copy_object(request).await
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<()> {
        (**self).delete_object(object).await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        marker: Option<&str>,
    ) -> Result<ListObjectsPage> {
        (**self).list_objects(bucket, prefix, marker).await
    }

    async fn bucket_region(&self, bucket: &str) -> Result<String> {
        (**self).bucket_region(bucket).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_bytes_chunks_and_collects() {
        let data = Bytes::from((0..=255u8).cycle().take(1000).collect::<Vec<_>>());
        let out = GetObjectOutput::from_bytes(data.clone(), 64, Some("bytes 0-999/5000".into()));

        let range = out.content_range().unwrap().unwrap();
        assert_eq!(range.total, Some(5000));
        assert_eq!(out.content_length, Some(1000));
        assert_eq!(out.collect().await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_empty_body() {
        let out = GetObjectOutput::from_bytes(Bytes::new(), 64, None);
        assert!(out.content_range().unwrap().is_none());
        assert!(out.collect().await.unwrap().is_empty());
    }
}
