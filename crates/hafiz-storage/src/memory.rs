//! In-process storage backend
//!
//! Keeps buckets, objects and multipart sessions in memory with the
//! request semantics of the S3 API (ranged reads, part ordering, minimum
//! part size, copy preconditions). Used by tests and for local dry runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use hafiz_core::types::{
    CompleteMultipartOutput, CompletedPart, CopyObjectOutput, CopyObjectRequest, ListObjectsPage,
    MetadataDirective, ObjectAttributes, ObjectHead, ObjectRef, ObjectSummary, PutObjectOutput,
    RangeSpec, UploadPartCopyRequest, NULL_VERSION_ID,
};
use hafiz_core::utils::{generate_etag, generate_request_id, md5_hex, multipart_etag, parse_etag};
use hafiz_core::{Error, Result, DEFAULT_REGION, MAX_PARTS, MIN_PART_SIZE};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::client::{GetObjectOutput, StorageClient};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    version_id: Option<String>,
    last_modified: DateTime<Utc>,
    attributes: ObjectAttributes,
}

impl StoredObject {
    fn head(&self) -> ObjectHead {
        ObjectHead {
            size: self.data.len() as u64,
            etag: Some(self.etag.clone()),
            version_id: self.version_id.clone(),
            last_modified: Some(self.last_modified),
            content_type: self.attributes.content_type.clone(),
            metadata: self.attributes.metadata.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Bucket {
    region: String,
    versioned: bool,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    attributes: ObjectAttributes,
    parts: BTreeMap<i32, (Bytes, String)>,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, Bucket>,
    uploads: HashMap<String, PendingUpload>,
}

/// In-memory [`StorageClient`].
pub struct MemoryStorage {
    state: RwLock<State>,
    chunk_size: usize,
    page_size: usize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            chunk_size: DEFAULT_CHUNK_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Size of the chunks GET bodies are streamed in.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Maximum keys per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.create_bucket_in(bucket, DEFAULT_REGION);
    }

    pub fn create_bucket_in(&self, bucket: &str, region: &str) {
        let mut state = self.state.write();
        state.buckets.entry(bucket.to_string()).or_insert_with(|| Bucket {
            region: region.to_string(),
            ..Default::default()
        });
    }

    pub fn set_versioning(&self, bucket: &str, enabled: bool) {
        if let Some(b) = self.state.write().buckets.get_mut(bucket) {
            b.versioned = enabled;
        }
    }

    /// Store an object directly, bypassing the request path.
    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let mut state = self.state.write();
        let b = state.buckets.entry(bucket.to_string()).or_insert_with(|| Bucket {
            region: DEFAULT_REGION.to_string(),
            ..Default::default()
        });
        let object = new_object(b.versioned, data, ObjectAttributes::default(), None);
        b.objects.insert(key.to_string(), object);
    }

    /// Current bytes of an object.
    pub fn object_data(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let state = self.state.read();
        state
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|o| o.data.clone())
    }

    pub fn object_head(&self, bucket: &str, key: &str) -> Option<ObjectHead> {
        let state = self.state.read();
        state
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(StoredObject::head)
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        self.state
            .read()
            .buckets
            .get(bucket)
            .map(|b| b.objects.len())
            .unwrap_or(0)
    }

    /// Multipart sessions neither completed nor aborted.
    pub fn pending_uploads(&self) -> Vec<String> {
        self.state.read().uploads.keys().cloned().collect()
    }

    /// Part numbers stored so far for a session.
    pub fn uploaded_parts(&self, upload_id: &str) -> Vec<i32> {
        self.state
            .read()
            .uploads
            .get(upload_id)
            .map(|u| u.parts.keys().copied().collect())
            .unwrap_or_default()
    }

    fn lookup<'a>(state: &'a State, object: &ObjectRef) -> Result<&'a StoredObject> {
        let bucket = state
            .buckets
            .get(&object.bucket)
            .ok_or_else(|| Error::NoSuchBucket(object.bucket.clone()))?;
        let stored = bucket
            .objects
            .get(&object.key)
            .ok_or_else(|| Error::NoSuchKey(object.to_string()))?;

        if let Some(version) = &object.version_id {
            let current = stored.version_id.as_deref().unwrap_or(NULL_VERSION_ID);
            if version != current {
                return Err(Error::NoSuchKey(object.to_string()));
            }
        }
        Ok(stored)
    }

    fn bucket_mut<'a>(state: &'a mut State, bucket: &str) -> Result<&'a mut Bucket> {
        state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::NoSuchBucket(bucket.to_string()))
    }

    fn upload_mut<'a>(
        state: &'a mut State,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<&'a mut PendingUpload> {
        match state.uploads.get_mut(upload_id) {
            Some(upload) if upload.bucket == bucket && upload.key == key => Ok(upload),
            _ => Err(Error::NoSuchUpload(upload_id.to_string())),
        }
    }
}

fn new_object(
    versioned: bool,
    data: Bytes,
    attributes: ObjectAttributes,
    etag: Option<String>,
) -> StoredObject {
    let etag = etag.unwrap_or_else(|| generate_etag(&md5_hex(&data)));
    StoredObject {
        data,
        etag,
        version_id: versioned.then(|| Uuid::new_v4().to_string()),
        last_modified: Utc::now(),
        attributes,
    }
}

fn check_part_number(part_number: i32) -> Result<()> {
    if part_number < 1 || part_number as u64 > MAX_PARTS {
        return Err(Error::InvalidArgument(format!(
            "Part number must be an integer between 1 and {}",
            MAX_PARTS
        )));
    }
    Ok(())
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn head_object(&self, object: &ObjectRef, region: Option<&str>) -> Result<ObjectHead> {
        let state = self.state.read();
        if let (Some(region), Some(bucket)) = (region, state.buckets.get(&object.bucket)) {
            if bucket.region != region {
                return Err(Error::Service {
                    status: 301,
                    code: "PermanentRedirect".to_string(),
                    message: format!("bucket {} is in {}", object.bucket, bucket.region),
                });
            }
        }
        Ok(Self::lookup(&state, object)?.head())
    }

    async fn get_object(
        &self,
        object: &ObjectRef,
        range: Option<RangeSpec>,
    ) -> Result<GetObjectOutput> {
        let (data, etag) = {
            let state = self.state.read();
            let stored = Self::lookup(&state, object)?;
            (stored.data.clone(), stored.etag.clone())
        };
        let total = data.len() as u64;

        let mut out = match range {
            Some(spec) => {
                let resolved = spec.resolve(total)?;
                let body = data.slice(resolved.start as usize..=resolved.end as usize);
                let content_range = format!("bytes {}-{}/{}", resolved.start, resolved.end, total);
                GetObjectOutput::from_bytes(body, self.chunk_size, Some(content_range))
            }
            None => GetObjectOutput::from_bytes(data, self.chunk_size, None),
        };
        out.etag = Some(etag);
        Ok(out)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        attributes: &ObjectAttributes,
    ) -> Result<PutObjectOutput> {
        let mut state = self.state.write();
        let b = Self::bucket_mut(&mut state, bucket)?;
        let object = new_object(
            b.versioned,
            Bytes::copy_from_slice(body),
            attributes.clone(),
            None,
        );
        let output = PutObjectOutput {
            etag: Some(object.etag.clone()),
            version_id: object.version_id.clone(),
        };
        b.objects.insert(key.to_string(), object);
        debug!("Stored object {}/{} ({} bytes)", bucket, key, body.len());
        Ok(output)
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> Result<String> {
        let mut state = self.state.write();
        Self::bucket_mut(&mut state, bucket)?;
        let upload_id = generate_request_id();
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                attributes: attributes.clone(),
                parts: BTreeMap::new(),
            },
        );
        debug!("Created multipart upload {} for {}/{}", upload_id, bucket, key);
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: &[u8],
    ) -> Result<String> {
        check_part_number(part_number)?;
        let mut state = self.state.write();
        let upload = Self::upload_mut(&mut state, bucket, key, upload_id)?;
        let etag = generate_etag(&md5_hex(body));
        upload
            .parts
            .insert(part_number, (Bytes::copy_from_slice(body), etag.clone()));
        Ok(etag)
    }

    async fn upload_part_copy(&self, request: &UploadPartCopyRequest) -> Result<String> {
        check_part_number(request.part_number)?;
        let mut state = self.state.write();

        let slice = {
            let source = Self::lookup(&state, &request.source.object_ref())?;
            request.conditions.check(&source.etag, Some(source.last_modified))?;
            let range = request.source_range;
            if range.end >= source.data.len() as u64 {
                return Err(Error::InvalidRange(format!(
                    "{} exceeds source size {}",
                    range,
                    source.data.len()
                )));
            }
            source.data.slice(range.start as usize..=range.end as usize)
        };

        let upload = Self::upload_mut(&mut state, &request.bucket, &request.key, &request.upload_id)?;
        let etag = generate_etag(&md5_hex(&slice));
        upload
            .parts
            .insert(request.part_number, (slice, etag.clone()));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartOutput> {
        let mut state = self.state.write();
        let upload = Self::upload_mut(&mut state, bucket, key, upload_id)?;

        if parts.is_empty() {
            return Err(Error::InvalidRequest(
                "You must specify at least one part".into(),
            ));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(Error::InvalidPart("part list is not in ascending order".into()));
        }

        let mut data = BytesMut::new();
        let mut etags = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let (body, etag) = upload.parts.get(&part.part_number).ok_or_else(|| {
                Error::InvalidPart(format!("part {} was not uploaded", part.part_number))
            })?;
            if parse_etag(etag) != parse_etag(&part.etag) {
                return Err(Error::InvalidPart(format!(
                    "etag mismatch for part {}",
                    part.part_number
                )));
            }
            if i + 1 < parts.len() && (body.len() as u64) < MIN_PART_SIZE {
                return Err(Error::EntityTooSmall(format!(
                    "part {} is {} bytes",
                    part.part_number,
                    body.len()
                )));
            }
            data.extend_from_slice(body);
            etags.push(etag.clone());
        }

        let attributes = upload.attributes.clone();
        state.uploads.remove(upload_id);

        let b = Self::bucket_mut(&mut state, bucket)?;
        let etag = generate_etag(&multipart_etag(&etags));
        let object = new_object(b.versioned, data.freeze(), attributes, Some(etag.clone()));
        let version_id = object.version_id.clone();
        b.objects.insert(key.to_string(), object);
        debug!("Completed multipart upload {} ({} parts)", upload_id, parts.len());

        Ok(CompleteMultipartOutput {
            etag: Some(etag),
            version_id,
            location: Some(format!("memory://{}/{}", bucket, key)),
        })
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        let mut state = self.state.write();
        Self::upload_mut(&mut state, bucket, key, upload_id)?;
        state.uploads.remove(upload_id);
        debug!("Aborted multipart upload {}", upload_id);
        Ok(())
    }

    async fn copy_object(&self, request: &CopyObjectRequest) -> Result<CopyObjectOutput> {
        let mut state = self.state.write();
        let (data, source_attributes) = {
            let source = Self::lookup(&state, &request.source.object_ref())?;
            request.conditions.check(&source.etag, Some(source.last_modified))?;
            (source.data.clone(), source.attributes.clone())
        };

        let attributes = match request.metadata_directive {
            MetadataDirective::Copy => source_attributes,
            MetadataDirective::Replace => request.attributes.clone(),
        };

        let b = Self::bucket_mut(&mut state, &request.bucket)?;
        let object = new_object(b.versioned, data, attributes, None);
        let output = CopyObjectOutput {
            etag: Some(object.etag.clone()),
            version_id: object.version_id.clone(),
        };
        b.objects.insert(request.key.clone(), object);
        Ok(output)
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<()> {
        let mut state = self.state.write();
        let b = Self::bucket_mut(&mut state, &object.bucket)?;
        b.objects.remove(&object.key);
        debug!("Deleted object {}", object);
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        marker: Option<&str>,
    ) -> Result<ListObjectsPage> {
        let state = self.state.read();
        let b = state
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::NoSuchBucket(bucket.to_string()))?;

        let prefix = prefix.unwrap_or("");
        let mut matching = b
            .objects
            .iter()
            .filter(|(key, _)| marker.map_or(true, |m| key.as_str() > m))
            .filter(|(key, _)| key.starts_with(prefix));

        let objects: Vec<ObjectSummary> = matching
            .by_ref()
            .take(self.page_size)
            .map(|(key, o)| ObjectSummary {
                key: key.clone(),
                size: o.data.len() as u64,
                etag: Some(o.etag.clone()),
                last_modified: Some(o.last_modified),
            })
            .collect();
        let is_truncated = matching.next().is_some();

        Ok(ListObjectsPage {
            objects,
            next_marker: None,
            is_truncated,
        })
    }

    async fn bucket_region(&self, bucket: &str) -> Result<String> {
        self.state
            .read()
            .buckets
            .get(bucket)
            .map(|b| b.region.clone())
            .ok_or_else(|| Error::NoSuchBucket(bucket.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hafiz_core::types::{ByteRange, CopyConditions, CopySource};

    fn storage() -> MemoryStorage {
        let s = MemoryStorage::new().with_chunk_size(7);
        s.create_bucket("bucket");
        s
    }

    #[tokio::test]
    async fn test_put_head_get() {
        let s = storage();
        let attrs = ObjectAttributes::default().with_content_type("text/plain");
        let out = s.put_object("bucket", "k", b"hello world", &attrs).await.unwrap();
        assert_eq!(out.etag.as_deref(), Some("\"5eb63bbbe01eeed093cb22bb8f5acdc3\""));

        let obj = ObjectRef::new("bucket", "k");
        let head = s.head_object(&obj, None).await.unwrap();
        assert_eq!(head.size, 11);
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));

        let body = s.get_object(&obj, None).await.unwrap().collect().await.unwrap();
        assert_eq!(&body[..], b"hello world");
    }

    #[tokio::test]
    async fn test_ranged_get() {
        let s = storage();
        s.insert_object("bucket", "k", &b"0123456789"[..]);
        let obj = ObjectRef::new("bucket", "k");

        let out = s
            .get_object(&obj, Some(ByteRange::new(2, 100).into()))
            .await
            .unwrap();
        assert_eq!(out.content_range.as_deref(), Some("bytes 2-9/10"));
        assert_eq!(&out.collect().await.unwrap()[..], b"23456789");

        let err = s
            .get_object(&obj, Some(ByteRange::new(10, 12).into()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidRange(_)));
    }

    #[tokio::test]
    async fn test_missing_objects() {
        let s = storage();
        let err = s
            .head_object(&ObjectRef::new("bucket", "nope"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchKey(_)));

        let err = s
            .head_object(&ObjectRef::new("other", "k"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchBucket(_)));
    }

    #[tokio::test]
    async fn test_multipart_lifecycle() {
        let s = storage();
        let attrs = ObjectAttributes::default();
        let id = s.create_multipart_upload("bucket", "big", &attrs).await.unwrap();

        let first = vec![1u8; MIN_PART_SIZE as usize];
        let e1 = s.upload_part("bucket", "big", &id, 1, &first).await.unwrap();
        let e2 = s.upload_part("bucket", "big", &id, 2, b"tail").await.unwrap();
        assert_eq!(s.uploaded_parts(&id), vec![1, 2]);

        let out_of_order = [
            CompletedPart { part_number: 2, etag: e2.clone() },
            CompletedPart { part_number: 1, etag: e1.clone() },
        ];
        assert!(s
            .complete_multipart_upload("bucket", "big", &id, &out_of_order)
            .await
            .is_err());

        let parts = [
            CompletedPart { part_number: 1, etag: e1 },
            CompletedPart { part_number: 2, etag: e2 },
        ];
        let out = s
            .complete_multipart_upload("bucket", "big", &id, &parts)
            .await
            .unwrap();
        assert!(out.etag.unwrap().ends_with("-2\""));
        assert!(s.pending_uploads().is_empty());
        assert_eq!(
            s.object_data("bucket", "big").unwrap().len(),
            MIN_PART_SIZE as usize + 4
        );
    }

    #[tokio::test]
    async fn test_small_non_final_part_rejected() {
        let s = storage();
        let id = s
            .create_multipart_upload("bucket", "k", &ObjectAttributes::default())
            .await
            .unwrap();
        let e1 = s.upload_part("bucket", "k", &id, 1, b"tiny").await.unwrap();
        let e2 = s.upload_part("bucket", "k", &id, 2, b"tail").await.unwrap();
        let parts = [
            CompletedPart { part_number: 1, etag: e1 },
            CompletedPart { part_number: 2, etag: e2 },
        ];
        let err = s
            .complete_multipart_upload("bucket", "k", &id, &parts)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EntityTooSmall(_)));
    }

    #[tokio::test]
    async fn test_abort_unknown_upload() {
        let s = storage();
        let err = s.abort_multipart_upload("bucket", "k", "missing").await.unwrap_err();
        assert!(matches!(err, Error::NoSuchUpload(_)));
    }

    #[tokio::test]
    async fn test_copy_object_directives() {
        let s = storage();
        let attrs = ObjectAttributes::default().with_metadata("color", "blue");
        s.put_object("bucket", "src", b"data", &attrs).await.unwrap();

        let mut request = CopyObjectRequest {
            bucket: "bucket".into(),
            key: "copy".into(),
            source: CopySource::new("bucket", "src"),
            metadata_directive: MetadataDirective::Copy,
            attributes: ObjectAttributes::default().with_metadata("color", "red"),
            conditions: CopyConditions::default(),
        };
        s.copy_object(&request).await.unwrap();
        let head = s.object_head("bucket", "copy").unwrap();
        assert_eq!(head.metadata.get("color").map(String::as_str), Some("blue"));

        request.metadata_directive = MetadataDirective::Replace;
        s.copy_object(&request).await.unwrap();
        let head = s.object_head("bucket", "copy").unwrap();
        assert_eq!(head.metadata.get("color").map(String::as_str), Some("red"));

        request.conditions.if_match = Some("\"not-the-etag\"".into());
        assert!(matches!(
            s.copy_object(&request).await.unwrap_err(),
            Error::PreconditionFailed
        ));
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let s = MemoryStorage::new().with_page_size(2);
        s.create_bucket("bucket");
        for key in ["a/1", "a/2", "a/3", "b/1"] {
            s.insert_object("bucket", key, &b"x"[..]);
        }

        let page = s.list_objects("bucket", Some("a/"), None).await.unwrap();
        assert_eq!(page.objects.len(), 2);
        assert!(page.is_truncated);
        let marker = page.continuation().unwrap();

        let page = s
            .list_objects("bucket", Some("a/"), Some(&marker))
            .await
            .unwrap();
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, "a/3");
        assert!(!page.is_truncated);
    }

    #[tokio::test]
    async fn test_region_checks() {
        let s = MemoryStorage::new();
        s.create_bucket_in("eu", "eu-west-1");
        s.insert_object("eu", "k", &b"x"[..]);

        assert_eq!(s.bucket_region("eu").await.unwrap(), "eu-west-1");
        let obj = ObjectRef::new("eu", "k");
        assert!(s.head_object(&obj, Some("us-east-1")).await.is_err());
        assert!(s.head_object(&obj, Some("eu-west-1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_versioned_bucket() {
        let s = storage();
        s.set_versioning("bucket", true);
        let out = s
            .put_object("bucket", "k", b"v1", &ObjectAttributes::default())
            .await
            .unwrap();
        let version = out.version_id.unwrap();

        let obj = ObjectRef::new("bucket", "k").with_version(version);
        assert!(s.head_object(&obj, None).await.is_ok());
        let stale = ObjectRef::new("bucket", "k").with_version("other");
        assert!(s.head_object(&stale, None).await.is_err());
    }
}
