//! Multipart session driver shared by uploads and copies
//!
//! Creates the session, runs a bounded set of workers that each claim the
//! next part number, completes the session with the parts in order, and
//! aborts it when anything goes wrong.

use std::sync::Arc;

use async_trait::async_trait;
use hafiz_core::types::{ByteRange, CompleteMultipartOutput, CompletedPart, ObjectAttributes};
use hafiz_storage::StorageClient;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{TransferError, TransferResult};
use crate::planner::{PartState, TransferPlan};
use crate::worker::{join_workers, until_cancelled, FirstError, PartCursor};

/// Parts acknowledged so far for one multipart upload.
#[derive(Debug)]
pub(crate) struct Session {
    pub upload_id: String,
    completed: Mutex<Vec<CompletedPart>>,
}

impl Session {
    pub(crate) fn new(upload_id: String) -> Self {
        Self {
            upload_id,
            completed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn record(&self, part_number: i32, etag: String) {
        self.completed.lock().push(CompletedPart { part_number, etag });
    }

    pub(crate) fn len(&self) -> usize {
        self.completed.lock().len()
    }

    /// Completed parts in ascending part order.
    pub(crate) fn sorted_parts(&self) -> Vec<CompletedPart> {
        let mut parts = self.completed.lock().clone();
        parts.sort_by_key(|p| p.part_number);
        parts
    }
}

/// Transfers one part of a multipart session and returns its ETag.
#[async_trait]
pub(crate) trait PartOperation: Send + Sync + 'static {
    async fn transfer(
        &self,
        upload_id: &str,
        part_number: i32,
        range: ByteRange,
        cancel: &CancellationToken,
    ) -> TransferResult<String>;
}

/// Everything the driver needs to know about the target object.
#[derive(Debug, Clone)]
pub(crate) struct MultipartJob {
    pub bucket: String,
    pub key: String,
    pub attributes: ObjectAttributes,
    pub plan: TransferPlan,
    pub concurrency: usize,
    pub leave_parts_on_error: bool,
}

#[derive(Debug)]
pub(crate) struct MultipartOutcome {
    pub upload_id: String,
    pub output: CompleteMultipartOutput,
}

pub(crate) async fn run_multipart<O: PartOperation>(
    client: &Arc<dyn StorageClient>,
    job: &MultipartJob,
    op: Arc<O>,
    cancel: &CancellationToken,
) -> TransferResult<MultipartOutcome> {
    let created = until_cancelled(
        cancel,
        client.create_multipart_upload(&job.bucket, &job.key, &job.attributes),
    )
    .await
    .ok_or(TransferError::Cancelled { upload_id: None })?;
    let upload_id = created?;

    debug!(
        "Created multipart upload {} for {}/{}: {} parts of {} bytes",
        upload_id, job.bucket, job.key, job.plan.part_count, job.plan.part_size
    );

    let session = Arc::new(Session::new(upload_id.clone()));
    let failure = run_parts(job, &session, op, cancel).await;
    let failure = failure.or_else(|| {
        let done = session.len() as u64;
        (done != job.plan.part_count).then(|| {
            TransferError::Internal(format!(
                "{} of {} parts completed for upload {}",
                done, job.plan.part_count, upload_id
            ))
        })
    });
    if let Some(cause) = failure {
        return Err(abort(client, job, &upload_id, cause).await);
    }

    // Every part is stored; cancellation no longer applies to finalizing.
    let parts = session.sorted_parts();
    match client
        .complete_multipart_upload(&job.bucket, &job.key, &upload_id, &parts)
        .await
    {
        Ok(output) => {
            info!(
                "Completed multipart upload {} for {}/{} ({} parts)",
                upload_id,
                job.bucket,
                job.key,
                parts.len()
            );
            Ok(MultipartOutcome { upload_id, output })
        }
        Err(e) => {
            error!("Failed to complete multipart upload {}: {}", upload_id, e);
            let cause = TransferError::CompleteFailed {
                upload_id: upload_id.clone(),
                source: e,
            };
            Err(abort(client, job, &upload_id, cause).await)
        }
    }
}

/// Run the part workers; returns the error that stopped them, if any.
async fn run_parts<O: PartOperation>(
    job: &MultipartJob,
    session: &Arc<Session>,
    op: Arc<O>,
    cancel: &CancellationToken,
) -> Option<TransferError> {
    let plan = job.plan;
    let child = cancel.child_token();
    let cursor = Arc::new(PartCursor::new(1, plan.part_count));
    let first_error: Arc<FirstError<(u64, TransferError)>> = Arc::new(FirstError::default());

    let worker_count = (job.concurrency.max(1) as u64).min(plan.part_count);
    let mut workers = JoinSet::new();
    for _ in 0..worker_count {
        let cursor = Arc::clone(&cursor);
        let first_error = Arc::clone(&first_error);
        let session = Arc::clone(session);
        let op = Arc::clone(&op);
        let child = child.clone();

        workers.spawn(async move {
            while !child.is_cancelled() {
                let Some(n) = cursor.claim() else { break };
                let Some(mut part) = plan.part(n) else { break };
                let Some(number) = part.wire_number() else {
                    first_error.set((
                        n,
                        TransferError::InvalidRequest(format!("part number {} out of range", n)),
                    ));
                    child.cancel();
                    break;
                };

                part.state = PartState::InFlight;
                let result = until_cancelled(
                    &child,
                    op.transfer(&session.upload_id, number, part.range, &child),
                )
                .await;

                match result {
                    None => break,
                    Some(Ok(etag)) => {
                        part.state = PartState::Completed;
                        session.record(number, etag);
                    }
                    Some(Err(e)) if e.is_cancelled() && child.is_cancelled() => break,
                    Some(Err(e)) => {
                        part.state = PartState::Failed;
                        debug!("Part {} of upload {} failed: {}", n, session.upload_id, e);
                        first_error.set((n, e));
                        child.cancel();
                        break;
                    }
                }
            }
        });
    }

    let joined = join_workers(workers).await;
    child.cancel();

    if let Some((part_number, source)) = first_error.take() {
        return Some(TransferError::PartFailed {
            upload_id: session.upload_id.clone(),
            part_number,
            source: Box::new(source),
        });
    }
    if let Err(e) = joined {
        return Some(e);
    }
    cancel.is_cancelled().then(|| TransferError::Cancelled {
        upload_id: Some(session.upload_id.clone()),
    })
}

/// Abort the session unless parts are to be left behind; returns the error
/// the caller should see.
async fn abort(
    client: &Arc<dyn StorageClient>,
    job: &MultipartJob,
    upload_id: &str,
    cause: TransferError,
) -> TransferError {
    if job.leave_parts_on_error {
        warn!(
            "Leaving parts of multipart upload {} for {}/{} after error: {}",
            upload_id, job.bucket, job.key, cause
        );
        return cause;
    }

    warn!(
        "Aborting multipart upload {} for {}/{}: {}",
        upload_id, job.bucket, job.key, cause
    );
    match client
        .abort_multipart_upload(&job.bucket, &job.key, upload_id)
        .await
    {
        Ok(()) => cause,
        Err(e) => {
            error!("Failed to abort multipart upload {}: {}", upload_id, e);
            TransferError::AbortFailed {
                upload_id: upload_id.to_string(),
                cause: Box::new(cause),
                source: e,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pattern, RecordingClient};
    use hafiz_core::MIN_PART_SIZE;
    use hafiz_storage::MemoryStorage;

    /// Uploads the planned range of a fixed payload.
    struct PayloadPart {
        client: Arc<dyn StorageClient>,
        key: String,
        data: Vec<u8>,
    }

    #[async_trait]
    impl PartOperation for PayloadPart {
        async fn transfer(
            &self,
            upload_id: &str,
            part_number: i32,
            range: ByteRange,
            _cancel: &CancellationToken,
        ) -> TransferResult<String> {
            let body = &self.data[range.start as usize..=range.end as usize];
            Ok(self
                .client
                .upload_part("bucket", &self.key, upload_id, part_number, body)
                .await?)
        }
    }

    fn setup(size: usize) -> (Arc<RecordingClient>, Arc<dyn StorageClient>, MultipartJob, Vec<u8>) {
        let storage = MemoryStorage::new();
        storage.create_bucket("bucket");
        let recorder = Arc::new(RecordingClient::new(storage));
        let client: Arc<dyn StorageClient> = recorder.clone();
        let job = MultipartJob {
            bucket: "bucket".into(),
            key: "key".into(),
            attributes: ObjectAttributes::default(),
            plan: TransferPlan::new(size as u64, MIN_PART_SIZE),
            concurrency: 3,
            leave_parts_on_error: false,
        };
        (recorder, client, job, pattern(size))
    }

    #[test]
    fn test_session_sorts_parts() {
        let session = Session::new("id".into());
        session.record(3, "c".into());
        session.record(1, "a".into());
        session.record(2, "b".into());
        let numbers: Vec<i32> = session.sorted_parts().iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(session.len(), 3);
    }

    #[tokio::test]
    async fn test_parts_complete_in_order() {
        let size = 3 * MIN_PART_SIZE as usize + 17;
        let (recorder, client, job, data) = setup(size);
        let op = Arc::new(PayloadPart {
            client: client.clone(),
            key: "key".into(),
            data: data.clone(),
        });

        let outcome = run_multipart(&client, &job, op, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.upload_id.is_empty());
        assert!(outcome.output.etag.unwrap().ends_with("-4\""));

        let complete = recorder.calls_for("complete_multipart_upload");
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].detail.as_deref(), Some("1,2,3,4"));
        assert_eq!(
            recorder.storage().object_data("bucket", "key").unwrap(),
            data
        );
    }

    #[tokio::test]
    async fn test_abort_failure_keeps_cause() {
        let size = 2 * MIN_PART_SIZE as usize;
        let (recorder, client, job, data) = setup(size);
        recorder.fail_on("upload_part", None, Some(2));
        recorder.fail_on("abort_multipart_upload", None, None);
        let op = Arc::new(PayloadPart {
            client: client.clone(),
            key: "key".into(),
            data,
        });

        let err = run_multipart(&client, &job, op, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            TransferError::AbortFailed { cause, .. } => {
                assert!(matches!(
                    *cause,
                    TransferError::PartFailed { part_number: 2, .. }
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(recorder.count("complete_multipart_upload"), 0);
        assert_eq!(recorder.storage().pending_uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_failure_aborts() {
        let size = 2 * MIN_PART_SIZE as usize;
        let (recorder, client, job, data) = setup(size);
        recorder.fail_on("complete_multipart_upload", None, None);
        let op = Arc::new(PayloadPart {
            client: client.clone(),
            key: "key".into(),
            data,
        });

        let err = run_multipart(&client, &job, op, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::CompleteFailed { .. }));
        assert_eq!(recorder.count("abort_multipart_upload"), 1);
        assert!(recorder.storage().pending_uploads().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_complete_still_succeeds() {
        let size = 2 * MIN_PART_SIZE as usize;
        let (recorder, client, job, data) = setup(size);
        let cancel = CancellationToken::new();
        recorder.cancel_during("complete_multipart_upload", cancel.clone());
        let op = Arc::new(PayloadPart {
            client: client.clone(),
            key: "key".into(),
            data: data.clone(),
        });

        let outcome = run_multipart(&client, &job, op, &cancel).await.unwrap();
        assert!(cancel.is_cancelled());
        assert!(outcome.output.etag.is_some());
        assert_eq!(recorder.count("abort_multipart_upload"), 0);
        assert_eq!(
            recorder.storage().object_data("bucket", "key").unwrap(),
            data
        );
    }
}
