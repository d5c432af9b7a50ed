//! Hafiz Transfer
//!
//! Concurrent multipart transfers against any [`hafiz_storage::StorageClient`]:
//! uploads, ranged downloads, server-side copies and batched per-object
//! operations, with a shared buffer pool and cooperative cancellation.

pub mod batch;
pub mod copy;
pub mod download;
pub mod error;
pub mod planner;
pub mod pool;
pub mod sink;
pub mod source;
pub mod upload;

mod multipart;
mod worker;

#[cfg(test)]
mod testing;

pub use batch::{
    AfterHook, BatchDelete, BatchDeleteObject, BatchDownloadObject, BatchError, BatchItem,
    BatchItemError, BatchIterator, BatchOperation, BatchUploadObject, DeleteListIterator,
    ObjectsIterator,
};
pub use copy::{Copier, CopyInput, CopyOutput};
pub use download::{DownloadInput, Downloader};
pub use error::{TransferError, TransferResult};
pub use planner::{Part, PartState, TransferPlan};
pub use pool::{BufferPool, CapacityLease, PoolError, PooledBuffer};
pub use sink::{FileSink, MemorySink, WriteAt};
pub use source::{BytesSource, FileSource, ReadAt, UploadBody};
pub use upload::{UploadInput, UploadOutput, Uploader};

pub use tokio_util::sync::CancellationToken;
