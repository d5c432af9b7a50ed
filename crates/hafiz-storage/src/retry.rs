//! Per-request retry policy
//!
//! Retries are applied beneath the transfer managers, one request at a
//! time, by wrapping any [`StorageClient`] in a [`RetryingClient`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hafiz_core::config::RetryConfig;
use hafiz_core::types::{
    CompleteMultipartOutput, CompletedPart, CopyObjectOutput, CopyObjectRequest, ListObjectsPage,
    ObjectAttributes, ObjectHead, ObjectRef, PutObjectOutput, RangeSpec, UploadPartCopyRequest,
};
use hafiz_core::{Error, Result};
use rand::Rng;
use tracing::{debug, warn};

use crate::client::{GetObjectOutput, StorageClient};

/// Decides whether and when a failed request is tried again.
pub trait RetryPolicy: Send + Sync {
    fn max_retries(&self) -> u32;

    fn should_retry(&self, error: &Error) -> bool;

    /// Delay before retry number `attempt` (0-based).
    fn retry_delay(&self, attempt: u32, throttled: bool, retry_after: Option<Duration>) -> Duration;
}

/// Exponential backoff with jitter, slower for throttling responses.
#[derive(Debug, Clone, Default)]
pub struct DefaultRetryPolicy {
    config: RetryConfig,
}

impl DefaultRetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

/// Random duration in `[d, 2d)`.
fn jitter(d: Duration) -> Duration {
    let nanos = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
    if nanos == 0 {
        return d;
    }
    d + Duration::from_nanos(rand::rng().random_range(0..nanos))
}

impl RetryPolicy for DefaultRetryPolicy {
    fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    fn should_retry(&self, error: &Error) -> bool {
        error.is_retryable()
    }

    fn retry_delay(&self, attempt: u32, throttled: bool, retry_after: Option<Duration>) -> Duration {
        let (min, max) = if throttled {
            (self.config.min_throttle_delay(), self.config.max_throttle_delay())
        } else {
            (self.config.min_retry_delay(), self.config.max_retry_delay())
        };

        let delay = 1u32
            .checked_shl(attempt)
            .and_then(|factor| jitter(min).checked_mul(factor))
            .filter(|d| *d <= max)
            .unwrap_or_else(|| jitter(max / 2));

        match retry_after {
            Some(hint) if throttled => delay + hint,
            _ => delay,
        }
    }
}

/// [`StorageClient`] wrapper that retries failed requests per a policy.
pub struct RetryingClient<C> {
    inner: C,
    policy: Arc<dyn RetryPolicy>,
}

impl<C: StorageClient> RetryingClient<C> {
    pub fn new(inner: C, policy: Arc<dyn RetryPolicy>) -> Self {
        Self { inner, policy }
    }

    pub fn with_config(inner: C, config: RetryConfig) -> Self {
        Self::new(inner, Arc::new(DefaultRetryPolicy::new(config)))
    }

    async fn retry<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.policy.max_retries() && self.policy.should_retry(&e) => {
                    let delay = self.policy.retry_delay(attempt, e.is_throttle(), e.retry_after());
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation,
                        attempt + 1,
                        self.policy.max_retries() + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 0 {
                        debug!("{} gave up after {} retries", operation, attempt);
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl<C: StorageClient> StorageClient for RetryingClient<C> {
    async fn head_object(&self, object: &ObjectRef, region: Option<&str>) -> Result<ObjectHead> {
        self.retry("HeadObject", || self.inner.head_object(object, region))
            .await
    }

    async fn get_object(
        &self,
        object: &ObjectRef,
        range: Option<RangeSpec>,
    ) -> Result<GetObjectOutput> {
        self.retry("GetObject", || self.inner.get_object(object, range))
            .await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        attributes: &ObjectAttributes,
    ) -> Result<PutObjectOutput> {
        self.retry("PutObject", || {
            self.inner.put_object(bucket, key, body, attributes)
        })
        .await
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> Result<String> {
        self.retry("CreateMultipartUpload", || {
            self.inner.create_multipart_upload(bucket, key, attributes)
        })
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
        self.retry("UploadPart", || {
            self.inner
                .upload_part(bucket, key, upload_id, part_number, body)
        })
        .await
    }

    async fn upload_part_copy(&self, request: &UploadPartCopyRequest) -> Result<String> {
        self.retry("UploadPartCopy", || self.inner.upload_part_copy(request))
            .await
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartOutput> {
        self.retry("CompleteMultipartUpload", || {
            self.inner
                .complete_multipart_upload(bucket, key, upload_id, parts)
        })
        .await
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.retry("AbortMultipartUpload", || {
            self.inner.abort_multipart_upload(bucket, key, upload_id)
        })
        .await
    }

    async fn copy_object(&self, request: &CopyObjectRequest) -> Result<CopyObjectOutput> {
        self.retry("CopyObject", || self.inner.copy_object(request))
            .await
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<()> {
        self.retry("DeleteObject", || self.inner.delete_object(object))
            .await
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        marker: Option<&str>,
    ) -> Result<ListObjectsPage> {
        self.retry("ListObjects", || self.inner.list_objects(bucket, prefix, marker))
            .await
    }

    async fn bucket_region(&self, bucket: &str) -> Result<String> {
        self.retry("GetBucketLocation", || self.inner.bucket_region(bucket))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            min_retry_delay_ms: 1,
            min_throttle_delay_ms: 2,
            max_retry_delay_ms: 20,
            max_throttle_delay_ms: 20,
        }
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let policy = DefaultRetryPolicy::default();
        for attempt in 0..5 {
            let d = policy.retry_delay(attempt, false, None);
            let floor = Duration::from_millis(30) * (1 << attempt);
            assert!(d >= floor, "attempt {} delay {:?} below {:?}", attempt, d, floor);
            assert!(d < floor * 2);
        }

        let d = policy.retry_delay(40, false, None);
        assert!(d >= Duration::from_secs(150));
        assert!(d < Duration::from_secs(300));
    }

    #[test]
    fn test_throttle_delay_honors_retry_after() {
        let policy = DefaultRetryPolicy::default();
        let d = policy.retry_delay(0, true, Some(Duration::from_secs(5)));
        assert!(d >= Duration::from_millis(5_500));
        assert!(d < Duration::from_millis(6_000));

        let d = policy.retry_delay(0, false, Some(Duration::from_secs(5)));
        assert!(d < Duration::from_millis(60));
    }

    #[test]
    fn test_should_retry_follows_error_class() {
        let policy = DefaultRetryPolicy::default();
        assert!(policy.should_retry(&Error::from_service(503, "SlowDown", "", None)));
        assert!(policy.should_retry(&Error::from_service(500, "InternalError", "", None)));
        assert!(!policy.should_retry(&Error::from_service(501, "NotImplemented", "", None)));
        assert!(!policy.should_retry(&Error::NoSuchKey("k".into())));
    }

    struct Flaky {
        inner: MemoryStorage,
        failures: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl StorageClient for Flaky {
        async fn head_object(&self, object: &ObjectRef, region: Option<&str>) -> Result<ObjectHead> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::from_service(500, "InternalError", "try again", None));
            }
            self.inner.head_object(object, region).await
        }

        async fn get_object(&self, o: &ObjectRef, r: Option<RangeSpec>) -> Result<GetObjectOutput> {
            self.inner.get_object(o, r).await
        }

        async fn put_object(
            &self,
            b: &str,
            k: &str,
            body: &[u8],
            a: &ObjectAttributes,
        ) -> Result<PutObjectOutput> {
            self.inner.put_object(b, k, body, a).await
        }

        async fn create_multipart_upload(
            &self,
            b: &str,
            k: &str,
            a: &ObjectAttributes,
        ) -> Result<String> {
            self.inner.create_multipart_upload(b, k, a).await
        }

        async fn upload_part(
            &self,
            b: &str,
            k: &str,
            id: &str,
            n: i32,
            body: &[u8],
        ) -> Result<String> {
            self.inner.upload_part(b, k, id, n, body).await
        }

        async fn upload_part_copy(&self, r: &UploadPartCopyRequest) -> Result<String> {
            self.inner.upload_part_copy(r).await
        }

        async fn complete_multipart_upload(
            &self,
            b: &str,
            k: &str,
            id: &str,
            p: &[CompletedPart],
        ) -> Result<CompleteMultipartOutput> {
            self.inner.complete_multipart_upload(b, k, id, p).await
        }

        async fn abort_multipart_upload(&self, b: &str, k: &str, id: &str) -> Result<()> {
            self.inner.abort_multipart_upload(b, k, id).await
        }

        async fn copy_object(&self, r: &CopyObjectRequest) -> Result<CopyObjectOutput> {
            self.inner.copy_object(r).await
        }

        async fn delete_object(&self, o: &ObjectRef) -> Result<()> {
            self.inner.delete_object(o).await
        }

        async fn list_objects(
            &self,
            b: &str,
            p: Option<&str>,
            m: Option<&str>,
        ) -> Result<ListObjectsPage> {
            self.inner.list_objects(b, p, m).await
        }

        async fn bucket_region(&self, b: &str) -> Result<String> {
            self.inner.bucket_region(b).await
        }
    }

    fn flaky(failures: u32) -> Flaky {
        let inner = MemoryStorage::new();
        inner.insert_object("bucket", "k", &b"abc"[..]);
        Flaky {
            inner,
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    #[tokio::test]
    async fn test_retrying_client_recovers() {
        let client = RetryingClient::with_config(flaky(2), fast_config());
        let head = client
            .head_object(&ObjectRef::new("bucket", "k"), None)
            .await
            .unwrap();
        assert_eq!(head.size, 3);
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retrying_client_gives_up() {
        let client = RetryingClient::with_config(flaky(10), fast_config());
        let result = client.head_object(&ObjectRef::new("bucket", "k"), None).await;
        assert!(result.is_err());
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_is_not_retried() {
        let client = RetryingClient::with_config(flaky(0), fast_config());
        let result = client.head_object(&ObjectRef::new("bucket", "missing"), None).await;
        assert!(matches!(result, Err(Error::NoSuchKey(_))));
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }
}
