//! Batch execution
//!
//! Drives a single-object operation over every item of an iterator, one
//! item at a time, and reports all failures together at the end instead of
//! stopping at the first one.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use hafiz_core::types::{ObjectRef, ObjectSummary};
use hafiz_storage::StorageClient;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::download::DownloadInput;
use crate::error::{TransferError, TransferResult};
use crate::sink::WriteAt;
use crate::upload::UploadInput;
use crate::worker::until_cancelled;

/// Runs after an item's operation, whatever its outcome.
pub type AfterHook = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Source of batch items.
///
/// `next` advances to the following item and returns `false` once the
/// iterator is exhausted or failed; `err` then reports the failure.
#[async_trait]
pub trait BatchIterator: Send {
    type Item: BatchItem;

    async fn next(&mut self) -> bool;

    fn err(&mut self) -> Option<hafiz_core::Error>;

    /// Take the item `next` advanced to.
    fn current_item(&mut self) -> Option<Self::Item>;
}

/// What the executor needs to know about any item.
pub trait BatchItem: Send {
    fn bucket(&self) -> &str;

    fn key(&self) -> &str;

    fn take_after(&mut self) -> Option<AfterHook>;
}

pub struct BatchDeleteObject {
    pub object: ObjectRef,
    pub after: Option<AfterHook>,
}

impl BatchDeleteObject {
    pub fn new(object: ObjectRef) -> Self {
        Self {
            object,
            after: None,
        }
    }

    pub fn with_after(mut self, after: impl FnOnce() -> anyhow::Result<()> + Send + 'static) -> Self {
        self.after = Some(Box::new(after));
        self
    }
}

impl BatchItem for BatchDeleteObject {
    fn bucket(&self) -> &str {
        &self.object.bucket
    }

    fn key(&self) -> &str {
        &self.object.key
    }

    fn take_after(&mut self) -> Option<AfterHook> {
        self.after.take()
    }
}

pub struct BatchUploadObject {
    pub input: UploadInput,
    pub after: Option<AfterHook>,
}

impl BatchUploadObject {
    pub fn new(input: UploadInput) -> Self {
        Self { input, after: None }
    }

    pub fn with_after(mut self, after: impl FnOnce() -> anyhow::Result<()> + Send + 'static) -> Self {
        self.after = Some(Box::new(after));
        self
    }
}

impl BatchItem for BatchUploadObject {
    fn bucket(&self) -> &str {
        &self.input.bucket
    }

    fn key(&self) -> &str {
        &self.input.key
    }

    fn take_after(&mut self) -> Option<AfterHook> {
        self.after.take()
    }
}

pub struct BatchDownloadObject {
    pub input: DownloadInput,
    pub sink: Arc<dyn WriteAt>,
    pub after: Option<AfterHook>,
}

impl BatchDownloadObject {
    pub fn new(input: DownloadInput, sink: Arc<dyn WriteAt>) -> Self {
        Self {
            input,
            sink,
            after: None,
        }
    }

    pub fn with_after(mut self, after: impl FnOnce() -> anyhow::Result<()> + Send + 'static) -> Self {
        self.after = Some(Box::new(after));
        self
    }
}

impl BatchItem for BatchDownloadObject {
    fn bucket(&self) -> &str {
        &self.input.object.bucket
    }

    fn key(&self) -> &str {
        &self.input.object.key
    }

    fn take_after(&mut self) -> Option<AfterHook> {
        self.after.take()
    }
}

/// Iterator over a fixed list of items.
pub struct ObjectsIterator<T> {
    items: VecDeque<T>,
    current: Option<T>,
}

impl<T> ObjectsIterator<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
            current: None,
        }
    }
}

impl<T> FromIterator<T> for ObjectsIterator<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[async_trait]
impl<T: BatchItem> BatchIterator for ObjectsIterator<T> {
    type Item = T;

    async fn next(&mut self) -> bool {
        self.current = self.items.pop_front();
        self.current.is_some()
    }

    fn err(&mut self) -> Option<hafiz_core::Error> {
        None
    }

    fn current_item(&mut self) -> Option<T> {
        self.current.take()
    }
}

/// Lists a bucket by prefix and yields a delete item per key.
pub struct DeleteListIterator {
    client: Arc<dyn StorageClient>,
    bucket: String,
    prefix: Option<String>,
    page: VecDeque<ObjectSummary>,
    marker: Option<String>,
    done: bool,
    current: Option<BatchDeleteObject>,
    error: Option<hafiz_core::Error>,
}

impl DeleteListIterator {
    pub fn new(
        client: Arc<dyn StorageClient>,
        bucket: impl Into<String>,
        prefix: Option<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix,
            page: VecDeque::new(),
            marker: None,
            done: false,
            current: None,
            error: None,
        }
    }
}

#[async_trait]
impl BatchIterator for DeleteListIterator {
    type Item = BatchDeleteObject;

    async fn next(&mut self) -> bool {
        loop {
            if let Some(summary) = self.page.pop_front() {
                let object = ObjectRef::new(self.bucket.clone(), summary.key);
                self.current = Some(BatchDeleteObject::new(object));
                return true;
            }
            self.current = None;
            if self.done || self.error.is_some() {
                return false;
            }

            let listed = self
                .client
                .list_objects(&self.bucket, self.prefix.as_deref(), self.marker.as_deref())
                .await;
            match listed {
                Ok(page) => {
                    self.marker = page.continuation();
                    self.done = self.marker.is_none();
                    debug!(
                        "Listed {} keys in {} (truncated: {})",
                        page.objects.len(),
                        self.bucket,
                        page.is_truncated
                    );
                    self.page.extend(page.objects);
                }
                Err(e) => {
                    self.error = Some(e);
                    return false;
                }
            }
        }
    }

    fn err(&mut self) -> Option<hafiz_core::Error> {
        self.error.take()
    }

    fn current_item(&mut self) -> Option<BatchDeleteObject> {
        self.current.take()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOperation {
    Delete,
    Upload,
    Download,
}

impl BatchOperation {
    pub fn code(&self) -> &'static str {
        match self {
            BatchOperation::Delete => "BatchedDeleteIncomplete",
            BatchOperation::Upload => "BatchedUploadIncomplete",
            BatchOperation::Download => "BatchedDownloadIncomplete",
        }
    }
}

impl fmt::Display for BatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchOperation::Delete => f.write_str("delete"),
            BatchOperation::Upload => f.write_str("upload"),
            BatchOperation::Download => f.write_str("download"),
        }
    }
}

/// One failed item of a batch.
#[derive(Debug)]
pub struct BatchItemError {
    pub bucket: String,
    pub key: String,
    pub cause: TransferError,
}

/// Every failure of one batch call.
#[derive(Debug)]
pub struct BatchError {
    pub operation: BatchOperation,
    pub failures: Vec<BatchItemError>,
    /// Why the iterator stopped early, if it did
    pub iteration_error: Option<hafiz_core::Error>,
}

impl BatchError {
    pub fn code(&self) -> &'static str {
        self.operation.code()
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} batched {} operations failed",
            self.code(),
            self.failures.len(),
            self.operation
        )?;
        if let Some(e) = &self.iteration_error {
            write!(f, "; iteration stopped: {}", e)?;
        }
        for failure in &self.failures {
            write!(f, "\n  {}/{}: {}", failure.bucket, failure.key, failure.cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchError {}

/// Run `op` over every item of `iter`.
pub(crate) async fn execute<I, F, Fut>(
    operation: BatchOperation,
    iter: &mut I,
    cancel: &CancellationToken,
    mut op: F,
) -> TransferResult<()>
where
    I: BatchIterator + ?Sized,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = TransferResult<()>>,
{
    let mut failures = Vec::new();
    let mut attempted = 0usize;

    while until_cancelled(cancel, iter.next()).await.unwrap_or(false) {
        let Some(mut item) = iter.current_item() else {
            continue;
        };
        let bucket = item.bucket().to_string();
        let key = item.key().to_string();
        let after = item.take_after();

        attempted += 1;
        if let Err(cause) = op(item).await {
            warn!("Batched {} of {}/{} failed: {}", operation, bucket, key, cause);
            failures.push(BatchItemError {
                bucket: bucket.clone(),
                key: key.clone(),
                cause,
            });
        }
        if let Some(after) = after {
            if let Err(e) = after() {
                warn!("After hook for {}/{} failed: {}", bucket, key, e);
                failures.push(BatchItemError {
                    bucket,
                    key,
                    cause: TransferError::AfterHook(e),
                });
            }
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled { upload_id: None });
    }

    let iteration_error = iter.err();
    info!(
        "Batched {} finished: {} items, {} failures",
        operation,
        attempted,
        failures.len()
    );
    if failures.is_empty() && iteration_error.is_none() {
        return Ok(());
    }
    Err(BatchError {
        operation,
        failures,
        iteration_error,
    }
    .into())
}

/// Deletes every object an iterator yields.
pub struct BatchDelete {
    client: Arc<dyn StorageClient>,
}

impl BatchDelete {
    pub fn new(client: Arc<dyn StorageClient>) -> Self {
        Self { client }
    }

    pub async fn delete<I>(&self, iter: &mut I, cancel: &CancellationToken) -> TransferResult<()>
    where
        I: BatchIterator<Item = BatchDeleteObject>,
    {
        execute(BatchOperation::Delete, iter, cancel, |item| async move {
            until_cancelled(cancel, self.client.delete_object(&item.object))
                .await
                .ok_or(TransferError::Cancelled { upload_id: None })??;
            Ok(())
        })
        .await
    }
}
