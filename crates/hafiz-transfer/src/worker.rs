//! Coordination primitives shared by the transfer drivers

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;

/// Hands out part numbers `start..start + count` exactly once each.
#[derive(Debug)]
pub(crate) struct PartCursor {
    next: AtomicU64,
    end: u64,
}

impl PartCursor {
    pub(crate) fn new(start: u64, count: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
            end: start.saturating_add(count),
        }
    }

    /// Next unclaimed part number, `None` once all are scheduled.
    pub(crate) fn claim(&self) -> Option<u64> {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        (n < self.end).then_some(n)
    }
}

/// Keeps the first error reported by any worker.
#[derive(Debug)]
pub(crate) struct FirstError<E> {
    slot: Mutex<Option<E>>,
}

impl<E> Default for FirstError<E> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<E> FirstError<E> {
    /// Record `err` unless another error got there first.
    pub(crate) fn set(&self, err: E) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(err);
        true
    }

    pub(crate) fn take(&self) -> Option<E> {
        self.slot.lock().take()
    }
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Wait for every worker; a panicked worker is reported as an internal error.
pub(crate) async fn join_workers(mut workers: JoinSet<()>) -> Result<(), TransferError> {
    let mut result = Ok(());
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            if result.is_ok() {
                result = Err(TransferError::Internal(format!("worker task failed: {}", e)));
            }
        }
    }
    result
}
