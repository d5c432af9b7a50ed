//! Test support: a storage client that records calls and injects faults

use async_trait::async_trait;
use hafiz_core::types::{
    CompleteMultipartOutput, CompletedPart, CopyConditions, CopyObjectOutput, CopyObjectRequest,
    ListObjectsPage, ObjectAttributes, ObjectHead, ObjectRef, PutObjectOutput, RangeSpec,
    UploadPartCopyRequest,
};
use hafiz_core::{Error, Result};
use hafiz_storage::{GetObjectOutput, MemoryStorage, StorageClient};
use parking_lot::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub op: &'static str,
    pub key: String,
    pub part: Option<i32>,
    /// Range header, copy source or similar per-call detail
    pub detail: Option<String>,
    /// Whether copy preconditions were attached
    pub conditional: bool,
}

#[derive(Debug, Clone)]
enum Fault {
    Fail,
    Hang,
    /// Cancel the token, then answer after a short delay
    Cancel(CancellationToken),
}

#[derive(Debug, Clone)]
struct Rule {
    op: &'static str,
    key: Option<String>,
    part: Option<i32>,
    detail: Option<String>,
    fault: Fault,
}

impl Rule {
    fn matches(&self, call: &Call) -> bool {
        self.op == call.op
            && self.key.as_deref().map_or(true, |k| k == call.key)
            && self.part.map_or(true, |p| Some(p) == call.part)
            && self
                .detail
                .as_deref()
                .map_or(true, |d| Some(d) == call.detail.as_deref())
    }
}

/// Wraps [`MemoryStorage`], logging every request in order.
pub(crate) struct RecordingClient {
    inner: MemoryStorage,
    calls: Mutex<Vec<Call>>,
    rules: Mutex<Vec<Rule>>,
}

impl RecordingClient {
    pub fn new(inner: MemoryStorage) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            rules: Mutex::new(Vec::new()),
        }
    }

    pub fn storage(&self) -> &MemoryStorage {
        &self.inner
    }

    /// Fail matching calls with a 500 response.
    pub fn fail_on(&self, op: &'static str, key: Option<&str>, part: Option<i32>) {
        self.add_rule(op, key, part, None, Fault::Fail);
    }

    /// Fail matching calls whose detail (range header, ...) equals `detail`.
    pub fn fail_on_detail(&self, op: &'static str, detail: &str) {
        self.add_rule(op, None, None, Some(detail), Fault::Fail);
    }

    /// Never answer matching calls.
    pub fn hang_on(&self, op: &'static str, key: Option<&str>, part: Option<i32>) {
        self.add_rule(op, key, part, None, Fault::Hang);
    }

    /// Cancel `token` while a matching call is in flight, then let it succeed.
    pub fn cancel_during(&self, op: &'static str, token: CancellationToken) {
        self.add_rule(op, None, None, None, Fault::Cancel(token));
    }

    pub fn hang_on_detail(&self, op: &'static str, detail: &str) {
        self.add_rule(op, None, None, Some(detail), Fault::Hang);
    }

    fn add_rule(
        &self,
        op: &'static str,
        key: Option<&str>,
        part: Option<i32>,
        detail: Option<&str>,
        fault: Fault,
    ) {
        self.rules.lock().push(Rule {
            op,
            key: key.map(str::to_string),
            part,
            detail: detail.map(str::to_string),
            fault,
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.op == op).count()
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(|c| c.op).collect()
    }

    pub fn calls_for(&self, op: &str) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    async fn intercept(&self, call: Call) -> Result<()> {
        let fault = self
            .rules
            .lock()
            .iter()
            .find(|r| r.matches(&call))
            .map(|r| r.fault.clone());
        self.calls.lock().push(call);

        match fault {
            Some(Fault::Fail) => Err(Error::from_service(
                500,
                "InternalError",
                "injected failure",
                None,
            )),
            Some(Fault::Hang) => std::future::pending().await,
            Some(Fault::Cancel(token)) => {
                token.cancel();
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn call(op: &'static str, key: &str) -> Call {
    Call {
        op,
        key: key.to_string(),
        part: None,
        detail: None,
        conditional: false,
    }
}

fn has_conditions(conditions: &CopyConditions) -> bool {
    !conditions.is_empty()
}

#[async_trait]
impl StorageClient for RecordingClient {
    async fn head_object(&self, object: &ObjectRef, region: Option<&str>) -> Result<ObjectHead> {
        let mut c = call("head_object", &object.key);
        c.detail = region.map(str::to_string);
        self.intercept(c).await?;
        self.inner.head_object(object, region).await
    }

    async fn get_object(
        &self,
        object: &ObjectRef,
        range: Option<RangeSpec>,
    ) -> Result<GetObjectOutput> {
        let mut c = call("get_object", &object.key);
        c.detail = range.map(|r| r.to_string());
        self.intercept(c).await?;
        self.inner.get_object(object, range).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        attributes: &ObjectAttributes,
    ) -> Result<PutObjectOutput> {
        let mut c = call("put_object", key);
        c.detail = Some(body.len().to_string());
        self.intercept(c).await?;
        self.inner.put_object(bucket, key, body, attributes).await
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> Result<String> {
        self.intercept(call("create_multipart_upload", key)).await?;
        self.inner
            .create_multipart_upload(bucket, key, attributes)
            .await
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: &[u8],
    ) -> Result<String> {
        let mut c = call("upload_part", key);
        c.part = Some(part_number);
        c.detail = Some(body.len().to_string());
        self.intercept(c).await?;
        self.inner
            .upload_part(bucket, key, upload_id, part_number, body)
            .await
    }

    async fn upload_part_copy(&self, request: &UploadPartCopyRequest) -> Result<String> {
        let mut c = call("upload_part_copy", &request.key);
        c.part = Some(request.part_number);
        c.detail = Some(request.source_range.to_header());
        c.conditional = has_conditions(&request.conditions);
        self.intercept(c).await?;
        self.inner.upload_part_copy(request).await
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartOutput> {
        let mut c = call("complete_multipart_upload", key);
        c.detail = Some(
            parts
                .iter()
                .map(|p| p.part_number.to_string())
                .collect::<Vec<_>>()
                .join(","),
        );
        self.intercept(c).await?;
        self.inner
            .complete_multipart_upload(bucket, key, upload_id, parts)
            .await
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.intercept(call("abort_multipart_upload", key)).await?;
        self.inner
            .abort_multipart_upload(bucket, key, upload_id)
            .await
    }

    async fn copy_object(&self, request: &CopyObjectRequest) -> Result<CopyObjectOutput> {
        let mut c = call("copy_object", &request.key);
        c.detail = Some(request.metadata_directive.as_str().to_string());
        c.conditional = has_conditions(&request.conditions);
        self.intercept(c).await?;
        self.inner.copy_object(request).await
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<()> {
        self.intercept(call("delete_object", &object.key)).await?;
        self.inner.delete_object(object).await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        marker: Option<&str>,
    ) -> Result<ListObjectsPage> {
        let mut c = call("list_objects", prefix.unwrap_or_default());
        c.detail = marker.map(str::to_string);
        self.intercept(c).await?;
        self.inner.list_objects(bucket, prefix, marker).await
    }

    async fn bucket_region(&self, bucket: &str) -> Result<String> {
        self.intercept(call("bucket_region", bucket)).await?;
        self.inner.bucket_region(bucket).await
    }
}

/// Deterministic test payload.
pub(crate) fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
