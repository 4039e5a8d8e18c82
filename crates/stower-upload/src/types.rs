//! Options and result types shared across the core.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::UploadError;

/// Default byte size at which a file switches to segmented upload.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Default requested chunk size for segmented uploads.
pub const DEFAULT_MULTIPART_CHUNKSIZE: u64 = 8 * 1024 * 1024;

/// `skipped_reason` attached to results produced in dry-run mode.
pub const DRY_RUN_REASON: &str = "dry run";

/// Tuning knobs consumed by the upload core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    /// When set, no transport call is made; every file is reported as a
    /// skipped success.
    pub dry_run: bool,
    /// Extra attempts per file on transient failure; total attempts are
    /// `max_retries + 1`.
    pub max_retries: u32,
    /// Scanner exclusion patterns (shell glob on the base name, literal
    /// substring on the full path).
    pub exclude_patterns: Vec<String>,
    /// File-level worker count; also reused as the part-level worker
    /// count inside a segmented upload. Must be at least 1.
    pub parallel_uploads: usize,
    /// Files at or above this size use the multipart engine.
    pub multipart_threshold: u64,
    /// Requested part size; clamped to the store minimum at upload time.
    pub multipart_chunksize: u64,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_retries: 3,
            exclude_patterns: Vec::new(),
            parallel_uploads: 4,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            multipart_chunksize: DEFAULT_MULTIPART_CHUNKSIZE,
        }
    }
}

impl UploadOptions {
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.parallel_uploads < 1 {
            return Err(UploadError::InvalidInput(
                "parallel_uploads must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of uploading one file.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub source: PathBuf,
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub success: bool,
    /// Present when the file was deliberately not transferred (dry run).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResult {
    /// A success that deliberately moved no bytes.
    pub fn is_skipped(&self) -> bool {
        self.success && self.skipped_reason.is_some()
    }

    /// A success that actually moved the file's bytes.
    pub fn transferred(&self) -> bool {
        self.success && self.skipped_reason.is_none()
    }
}
