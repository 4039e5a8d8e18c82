//! Error taxonomy for the upload core.

use stower_scan::ScanError;
use stower_store::StoreError;
use stower_transfer::TransferError;

/// Failure kinds surfaced by uploads.
///
/// Only transport-side failures are transient; source-side problems
/// (missing files, unreadable data), cancellation and invariant
/// violations are permanent and never retried.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The source file could not be stat'ed or read.
    #[error(transparent)]
    Source(#[from] ScanError),

    /// A transport call failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The multipart engine failed; carries the underlying cause.
    #[error("multipart upload failed: {0}")]
    Multipart(#[source] TransferError),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    /// Final failure after the retry budget was exhausted.
    #[error("upload failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<UploadError>,
    },
}

impl From<TransferError> for UploadError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Cancelled => Self::Cancelled,
            TransferError::Internal(msg) => Self::Internal(msg),
            other => Self::Multipart(other),
        }
    }
}

impl UploadError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(_) => true,
            Self::Multipart(inner) => matches!(inner, TransferError::Store(_)),
            _ => false,
        }
    }
}
