//! Concurrent ranged downloads
//!
//! The object is fetched in part-sized ranges by a bounded set of workers,
//! each writing its bytes at their absolute offset in the sink. When the
//! caller does not know the size, the first ranged GET doubles as the size
//! probe through its `Content-Range` header.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::TryStreamExt;
use hafiz_core::config::DownloadConfig;
use hafiz_core::types::{ByteRange, ObjectRef, RangeSpec};
use hafiz_storage::{ByteStream, GetObjectOutput, StorageClient};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::batch::{self, BatchDownloadObject, BatchIterator, BatchOperation};
use crate::error::{TransferError, TransferResult};
use crate::planner::TransferPlan;
use crate::pool::BufferPool;
use crate::sink::WriteAt;
use crate::worker::{join_workers, until_cancelled, FirstError, PartCursor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadInput {
    pub object: ObjectRef,
    /// Fetch only this range, in one request
    pub range: Option<RangeSpec>,
    /// Object size when already known, skipping the size probe
    pub size: Option<u64>,
}

impl DownloadInput {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            object: ObjectRef::new(bucket, key),
            range: None,
            size: None,
        }
    }

    pub fn with_version(mut self, version_id: impl Into<String>) -> Self {
        self.object.version_id = Some(version_id.into());
        self
    }

    pub fn with_range(mut self, range: RangeSpec) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

pub struct Downloader {
    client: Arc<dyn StorageClient>,
    config: DownloadConfig,
    buffer_pool: Option<BufferPool>,
}

/// Outcome of the size-probing first request.
enum Probe {
    Empty,
    /// The response carried the whole object
    Whole(u64),
    Partial { total: u64, written: u64 },
}

impl Downloader {
    pub fn new(client: Arc<dyn StorageClient>, config: DownloadConfig) -> Self {
        Self {
            client,
            config,
            buffer_pool: None,
        }
    }

    /// Coalesce each part into a pooled buffer before writing it.
    pub fn with_buffer_pool(mut self, pool: BufferPool) -> Self {
        self.buffer_pool = Some(pool);
        self
    }

    /// Download `input` into `sink`, returning the number of bytes written.
    ///
    /// On failure the bytes already written stay in the sink.
    pub async fn download(
        &self,
        sink: Arc<dyn WriteAt>,
        input: &DownloadInput,
        cancel: &CancellationToken,
    ) -> TransferResult<u64> {
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

        let object = &input.object;
        if let Some(range) = input.range {
            let out = until_cancelled(cancel, self.client.get_object(object, Some(range)))
                .await
                .ok_or(TransferError::Cancelled { upload_id: None })??;
            let written = write_stream(sink.as_ref(), 0, out.body, None).await?;
            info!("Downloaded {} bytes of {} ({})", written, object, range);
            return Ok(written);
        }

        let part_size = self.config.part_size;
        let (plan, first_part, written) = match input.size {
            Some(size) => {
                sink.set_len(size).await?;
                (TransferPlan::new(size, part_size), 1, 0)
            }
            None => match self.probe(sink.as_ref(), object, cancel).await? {
                Probe::Empty => {
                    info!("Downloaded empty object {}", object);
                    return Ok(0);
                }
                Probe::Whole(written) => {
                    info!("Downloaded {} ({} bytes)", object, written);
                    return Ok(written);
                }
                Probe::Partial { total, written } => {
                    (TransferPlan::new(total, part_size), 2, written)
                }
            },
        };

        let remaining = plan.part_count.saturating_sub(first_part - 1);
        debug!(
            "Downloading {} ({} bytes) in {} parts of {} bytes",
            object, plan.total_size, plan.part_count, plan.part_size
        );

        let fetched = if remaining > 0 {
            let fetcher = Arc::new(PartFetcher {
                client: Arc::clone(&self.client),
                object: object.clone(),
                sink,
                pool: self.buffer_pool.clone(),
            });
            self.fetch_parts(fetcher, plan, first_part, remaining, cancel)
                .await?
        } else {
            0
        };

        let total = written + fetched;
        info!("Downloaded {} ({} bytes)", object, total);
        Ok(total)
    }

    /// GET the first part and learn the object size from the response.
    async fn probe(
        &self,
        sink: &dyn WriteAt,
        object: &ObjectRef,
        cancel: &CancellationToken,
    ) -> TransferResult<Probe> {
        let first = ByteRange::new(0, self.config.part_size - 1);
        let response = until_cancelled(cancel, self.client.get_object(object, Some(first.into())))
            .await
            .ok_or(TransferError::Cancelled { upload_id: None })?;

        let out = match response {
            Ok(out) => out,
            Err(hafiz_core::Error::InvalidRange(message)) => {
                // A range request against an empty object is unsatisfiable.
                let head = until_cancelled(cancel, self.client.head_object(object, None))
                    .await
                    .ok_or(TransferError::Cancelled { upload_id: None })??;
                if head.size == 0 {
                    return Ok(Probe::Empty);
                }
                return Err(hafiz_core::Error::InvalidRange(message).into());
            }
            Err(e) => return Err(e.into()),
        };

        // No Content-Range: the service sent the whole object.
        if out.content_range.is_none() {
            let written = write_stream(sink, 0, out.body, out.content_length).await?;
            return Ok(Probe::Whole(written));
        }

        let total = match response_total(&out)? {
            Some(total) => total,
            None => {
                until_cancelled(cancel, self.client.head_object(object, None))
                    .await
                    .ok_or(TransferError::Cancelled { upload_id: None })??
                    .size
            }
        };

        sink.set_len(total).await?;
        let expected = total.min(first.size());
        let written = write_stream(sink, 0, out.body, Some(expected)).await?;
        Ok(Probe::Partial { total, written })
    }

    async fn fetch_parts(
        &self,
        fetcher: Arc<PartFetcher>,
        plan: TransferPlan,
        first_part: u64,
        count: u64,
        cancel: &CancellationToken,
    ) -> TransferResult<u64> {
        let child = cancel.child_token();
        let cursor = Arc::new(PartCursor::new(first_part, count));
        let first_error: Arc<FirstError<TransferError>> = Arc::new(FirstError::default());
        let written = Arc::new(AtomicU64::new(0));

        let worker_count = (self.config.concurrency.max(1) as u64).min(count);
        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            let fetcher = Arc::clone(&fetcher);
            let cursor = Arc::clone(&cursor);
            let first_error = Arc::clone(&first_error);
            let written = Arc::clone(&written);
            let child = child.clone();

            workers.spawn(async move {
                while !child.is_cancelled() {
                    let Some(n) = cursor.claim() else { break };
                    let Some(range) = plan.range(n) else { break };

                    match until_cancelled(&child, fetcher.fetch(range, &child)).await {
                        None => break,
                        Some(Ok(bytes)) => {
                            written.fetch_add(bytes, Ordering::Relaxed);
                        }
                        Some(Err(e)) if e.is_cancelled() && child.is_cancelled() => break,
                        Some(Err(e)) => {
                            debug!("Part {} of {} failed: {}", n, fetcher.object, e);
                            first_error.set(e);
                            child.cancel();
                            break;
                        }
                    }
                }
            });
        }

        let joined = join_workers(workers).await;
        child.cancel();

        if let Some(e) = first_error.take() {
            return Err(e);
        }
        joined?;
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled { upload_id: None });
        }
        Ok(written.load(Ordering::Relaxed))
    }

    /// Download every item of `iter` in turn, collecting failures.
    pub async fn download_with_iterator<I>(
        &self,
        iter: &mut I,
        cancel: &CancellationToken,
    ) -> TransferResult<()>
    where
        I: BatchIterator<Item = BatchDownloadObject>,
    {
        batch::execute(BatchOperation::Download, iter, cancel, |item| async move {
            let BatchDownloadObject { input, sink, .. } = item;
            self.download(sink, &input, cancel).await.map(|_| ())
        })
        .await
    }
}

fn response_total(out: &GetObjectOutput) -> TransferResult<Option<u64>> {
    Ok(out.content_range()?.and_then(|r| r.total))
}

struct PartFetcher {
    client: Arc<dyn StorageClient>,
    object: ObjectRef,
    sink: Arc<dyn WriteAt>,
    pool: Option<BufferPool>,
}

impl PartFetcher {
    async fn fetch(&self, range: ByteRange, cancel: &CancellationToken) -> TransferResult<u64> {
        let expected = range.size();
        // Hold the buffer before the request goes out so the response is
        // read as soon as it arrives.
        let buffer = match &self.pool {
            Some(pool) if pool.buffer_size() as u64 >= expected => Some(pool.get(cancel).await?),
            _ => None,
        };
        let out = self.client.get_object(&self.object, Some(range.into())).await?;

        match buffer {
            Some(mut buf) => {
                let len = coalesce(out.body, &mut buf[..expected as usize]).await?;
                self.sink.write_at(range.start, &buf[..len]).await?;
                Ok(len as u64)
            }
            None => write_stream(self.sink.as_ref(), range.start, out.body, Some(expected)).await,
        }
    }
}

/// Stream `body` into `sink` starting at `offset`.
async fn write_stream(
    sink: &dyn WriteAt,
    offset: u64,
    mut body: ByteStream,
    expected: Option<u64>,
) -> TransferResult<u64> {
    let mut written = 0u64;
    while let Some(chunk) = body.try_next().await? {
        let end = written + chunk.len() as u64;
        if let Some(expected) = expected {
            if end > expected {
                return Err(length_mismatch(expected, end));
            }
        }
        sink.write_at(offset + written, &chunk).await?;
        written = end;
    }
    match expected {
        Some(expected) if written != expected => Err(length_mismatch(expected, written)),
        _ => Ok(written),
    }
}

/// Collect `body` into `buf`, which must be filled exactly.
async fn coalesce(mut body: ByteStream, buf: &mut [u8]) -> TransferResult<usize> {
    let expected = buf.len() as u64;
    let mut filled = 0usize;
    while let Some(chunk) = body.try_next().await? {
        let end = filled + chunk.len();
        if end > buf.len() {
            return Err(length_mismatch(expected, end as u64));
        }
        buf[filled..end].copy_from_slice(&chunk);
        filled = end;
    }
    if filled != buf.len() {
        return Err(length_mismatch(expected, filled as u64));
    }
    Ok(filled)
}

fn length_mismatch(expected: u64, got: u64) -> TransferError {
    TransferError::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("expected {} bytes in response body, got {}", expected, got),
    ))
}
