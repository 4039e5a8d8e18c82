//! Progress tracking and the segmented (multipart) upload engine.

mod chunk;
mod multipart;
mod progress;

pub use chunk::{effective_chunk_size, part_count, part_spans, PartSpan, MIN_CHUNK_SIZE};
pub use multipart::{MultipartEngine, MultipartSession};
pub use progress::{ProgressTracker, Stats};

use stower_store::StoreError;

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Reading the source failed. Permanent from the caller's viewpoint.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A transport call failed. Transient; the caller may retry the whole
    /// engine invocation.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cancelled")]
    Cancelled,

    /// Invariant violation, e.g. a gap in recorded part numbers.
    #[error("internal error: {0}")]
    Internal(String),
}
