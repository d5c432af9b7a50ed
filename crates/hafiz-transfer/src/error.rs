//! Transfer error types

use thiserror::Error;

use crate::batch::BatchError;
use crate::pool::PoolError;

pub type TransferResult<T> = std::result::Result<T, TransferError>;

#[derive(Error, Debug)]
pub enum TransferError {
    /// Rejected before any request was sent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The caller cancelled the transfer.
    #[error("transfer cancelled{}", .upload_id.as_ref().map(|id| format!(" (upload {})", id)).unwrap_or_default())]
    Cancelled { upload_id: Option<String> },

    /// First part failure of a multipart session.
    #[error("failed to transfer part {part_number} of upload {upload_id}: {source}")]
    PartFailed {
        upload_id: String,
        part_number: u64,
        #[source]
        source: Box<TransferError>,
    },

    #[error("failed to complete multipart upload {upload_id}: {source}")]
    CompleteFailed {
        upload_id: String,
        #[source]
        source: hafiz_core::Error,
    },

    /// The session could not be aborted after `cause`; its parts remain.
    #[error("failed to abort multipart upload {upload_id} after error ({cause}): {source}")]
    AbortFailed {
        upload_id: String,
        cause: Box<TransferError>,
        #[source]
        source: hafiz_core::Error,
    },

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Storage(#[from] hafiz_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("after hook failed: {0}")]
    AfterHook(anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TransferError {
    pub(crate) fn config(err: hafiz_core::Error) -> Self {
        TransferError::InvalidConfig(err.to_string())
    }

    /// Upload ID of the multipart session this error belongs to.
    pub fn upload_id(&self) -> Option<&str> {
        match self {
            TransferError::Cancelled { upload_id } => upload_id.as_deref(),
            TransferError::PartFailed { upload_id, .. }
            | TransferError::CompleteFailed { upload_id, .. }
            | TransferError::AbortFailed { upload_id, .. } => Some(upload_id),
            _ => None,
        }
    }

    /// Whether the transfer stopped because the caller cancelled it.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            TransferError::Cancelled { .. } | TransferError::Pool(PoolError::Cancelled)
        )
    }

    /// Underlying storage error, looking through part and finalize wrappers.
    pub fn storage_error(&self) -> Option<&hafiz_core::Error> {
        match self {
            TransferError::Storage(e)
            | TransferError::CompleteFailed { source: e, .. }
            | TransferError::AbortFailed { source: e, .. } => Some(e),
            TransferError::PartFailed { source, .. } => source.storage_error(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_id_is_reported() {
        let err = TransferError::PartFailed {
            upload_id: "UPLOAD".into(),
            part_number: 3,
            source: Box::new(TransferError::Storage(hafiz_core::Error::AccessDenied)),
        };
        assert_eq!(err.upload_id(), Some("UPLOAD"));
        assert!(err.to_string().contains("part 3 of upload UPLOAD"));
        assert!(matches!(
            err.storage_error(),
            Some(hafiz_core::Error::AccessDenied)
        ));
    }

    #[test]
    fn test_cancelled_display() {
        let err = TransferError::Cancelled { upload_id: None };
        assert_eq!(err.to_string(), "transfer cancelled");
        assert!(err.is_cancelled());

        let err = TransferError::Cancelled {
            upload_id: Some("abc".into()),
        };
        assert_eq!(err.to_string(), "transfer cancelled (upload abc)");
        assert!(TransferError::Pool(PoolError::Cancelled).is_cancelled());
        assert!(!TransferError::Pool(PoolError::Closed).is_cancelled());
    }
}
