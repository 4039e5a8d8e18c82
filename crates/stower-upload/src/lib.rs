//! The upload execution core.
//!
//! [`Uploader`] moves single files into an object store, choosing between
//! one-shot and segmented transfer per file and wrapping every file in the
//! shared retry policy. [`WorkerPool`] fans file jobs out across workers,
//! [`Uploader::upload_directory`] binds the scanner to the pool, and
//! [`TaskRunner`] drives a declared list of upload tasks into a
//! [`RunReport`].

mod directory;
mod error;
mod pool;
mod retry;
mod task_runner;
mod types;
mod uploader;

pub use error::UploadError;
pub use pool::{Job, WorkerPool};
pub use retry::RetryPolicy;
pub use task_runner::{RunReport, TaskResult, TaskRunner, TaskSpec};
pub use types::{
    UploadOptions, UploadResult, DEFAULT_MULTIPART_CHUNKSIZE, DEFAULT_MULTIPART_THRESHOLD,
    DRY_RUN_REASON,
};
pub use uploader::Uploader;
