//! Single-file upload with path selection.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use stower_scan::{ExcludePatterns, ScanError, Scanner};
use stower_store::{guess_content_type, ObjectStore};
use stower_transfer::{MultipartEngine, ProgressTracker};

use crate::types::{UploadOptions, UploadResult, DRY_RUN_REASON};
use crate::UploadError;

/// Uploads files into an object store.
///
/// Cheap to clone; the store, scanner patterns and progress tracker are
/// shared. One instance is used by every worker of a pool.
#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    scanner: Scanner,
    options: UploadOptions,
    progress: Option<Arc<ProgressTracker>>,
    cancel: CancellationToken,
}

impl Uploader {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        options: UploadOptions,
        cancel: CancellationToken,
    ) -> Result<Self, UploadError> {
        options.validate()?;
        let patterns = ExcludePatterns::new(options.exclude_patterns.iter().cloned())?;
        Ok(Self {
            store,
            scanner: Scanner::new(patterns),
            options,
            progress: None,
            cancel,
        })
    }

    /// Attaches a shared progress tracker.
    pub fn with_progress(mut self, progress: Arc<ProgressTracker>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub(crate) fn progress(&self) -> Option<&Arc<ProgressTracker>> {
        self.progress.as_ref()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Uploads one file in a single attempt.
    ///
    /// Dry runs produce a skipped success; files at or above the
    /// multipart threshold go through the segmented engine (parallel when
    /// more than one worker is configured); everything else is a single
    /// `put_object` with a guessed content type.
    pub async fn upload(&self, path: &Path, bucket: &str, key: &str) -> UploadResult {
        match self.attempt(path, bucket, key).await {
            Ok(result) => result,
            Err(e) => self.failed_result(path, bucket, key, &e),
        }
    }

    pub(crate) async fn attempt(
        &self,
        path: &Path,
        bucket: &str,
        key: &str,
    ) -> Result<UploadResult, UploadError> {
        // Stat failures are permanent: a missing source will not appear
        // on a later attempt.
        let file = self.scanner.stat(path)?;

        if self.options.dry_run {
            info!(
                source = %file.path.display(),
                bucket = %bucket,
                key = %key,
                size = file.size,
                "dry run: would upload file"
            );
            if let Some(progress) = &self.progress {
                progress.inc_skipped();
            }
            return Ok(UploadResult {
                source: file.path,
                bucket: bucket.to_string(),
                key: key.to_string(),
                size: file.size,
                success: true,
                skipped_reason: Some(DRY_RUN_REASON.to_string()),
                error: None,
            });
        }

        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        if file.size >= self.options.multipart_threshold {
            info!(
                source = %file.path.display(),
                size = file.size,
                threshold = self.options.multipart_threshold,
                "size at multipart threshold, using segmented upload"
            );
            let mut engine = MultipartEngine::new(
                Arc::clone(&self.store),
                self.options.multipart_chunksize,
                self.options.parallel_uploads,
                self.cancel.child_token(),
            );
            if let Some(progress) = &self.progress {
                engine = engine.with_progress(Arc::clone(progress));
            }
            engine.upload(path, bucket, key).await?;
            info!(
                source = %file.path.display(),
                bucket = %bucket,
                key = %key,
                size = file.size,
                "multipart upload completed successfully"
            );
            // The engine already advanced progress once per part.
            return Ok(UploadResult {
                source: file.path,
                bucket: bucket.to_string(),
                key: key.to_string(),
                size: file.size,
                success: true,
                skipped_reason: None,
                error: None,
            });
        }

        debug!(
            source = %file.path.display(),
            bucket = %bucket,
            key = %key,
            size = file.size,
            "uploading file"
        );
        let body = read_file(path).await?;
        let content_type = guess_content_type(path);
        self.store
            .put_object(bucket, key, body, content_type, None)
            .await?;
        info!(
            source = %file.path.display(),
            bucket = %bucket,
            key = %key,
            size = file.size,
            "file uploaded successfully"
        );
        if let Some(progress) = &self.progress {
            progress.inc_processed(file.size);
        }
        Ok(UploadResult {
            source: file.path,
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: file.size,
            success: true,
            skipped_reason: None,
            error: None,
        })
    }

    pub(crate) fn failed_result(
        &self,
        path: &Path,
        bucket: &str,
        key: &str,
        error: &UploadError,
    ) -> UploadResult {
        if let Some(progress) = &self.progress {
            progress.inc_failed();
        }
        UploadResult {
            source: path.to_path_buf(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: 0,
            success: false,
            skipped_reason: None,
            error: Some(error.to_string()),
        }
    }
}

async fn read_file(path: &Path) -> Result<Bytes, UploadError> {
    let owned = path.to_path_buf();
    let data = tokio::task::spawn_blocking(move || std::fs::read(&owned))
        .await
        .map_err(|e| UploadError::Internal(format!("blocking read failed: {e}")))?
        .map_err(|e| ScanError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(Bytes::from(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use stower_store::MemoryStore;
    use tempfile::TempDir;

    const MIB: u64 = 1024 * 1024;

    fn uploader(store: &Arc<MemoryStore>, options: UploadOptions) -> Uploader {
        Uploader::new(Arc::clone(store) as _, options, CancellationToken::new()).unwrap()
    }

    #[tokio::test]
    async fn small_file_uses_put_object_with_content_type() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        fs::write(&path, b"contents").unwrap();

        let store = Arc::new(MemoryStore::new());
        let up = uploader(&store, UploadOptions::default());
        let result = up.upload(&path, "bucket", "pfx/hello.txt").await;

        assert!(result.success);
        assert_eq!(result.size, 8);
        assert!(result.skipped_reason.is_none());

        assert_eq!(store.puts(), 1);
        assert_eq!(store.multipart_creates(), 0);
        assert_eq!(
            store.object_content_type("bucket", "pfx/hello.txt").as_deref(),
            Some("text/plain")
        );
        assert_eq!(
            store.object("bucket", "pfx/hello.txt").unwrap().as_ref(),
            b"contents"
        );
    }

    #[tokio::test]
    async fn dry_run_issues_no_transport_calls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        fs::write(&path, b"contents").unwrap();

        let store = Arc::new(MemoryStore::new());
        let up = uploader(
            &store,
            UploadOptions {
                dry_run: true,
                ..Default::default()
            },
        );
        let result = up.upload(&path, "bucket", "k").await;

        assert!(result.success);
        assert_eq!(result.skipped_reason.as_deref(), Some(DRY_RUN_REASON));
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn threshold_routes_to_multipart_engine() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        fs::write(&path, vec![7u8; (6 * MIB) as usize]).unwrap();

        let store = Arc::new(MemoryStore::new());
        let up = uploader(
            &store,
            UploadOptions {
                multipart_threshold: 6 * MIB,
                multipart_chunksize: 5 * MIB,
                parallel_uploads: 2,
                ..Default::default()
            },
        );
        let result = up.upload(&path, "bucket", "big.bin").await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(store.puts(), 0);
        assert_eq!(store.multipart_creates(), 1);
        assert_eq!(store.multipart_completes(), 1);
        assert_eq!(
            store.object("bucket", "big.bin").unwrap().len() as u64,
            6 * MIB
        );
    }

    #[tokio::test]
    async fn file_below_threshold_never_touches_multipart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mid.bin");
        fs::write(&path, vec![1u8; 1024]).unwrap();

        let store = Arc::new(MemoryStore::new());
        let up = uploader(
            &store,
            UploadOptions {
                multipart_threshold: 2048,
                ..Default::default()
            },
        );
        up.upload(&path, "b", "mid.bin").await;

        assert_eq!(store.puts(), 1);
        assert_eq!(store.multipart_creates(), 0);
    }

    #[tokio::test]
    async fn missing_source_fails_without_transport_calls() {
        let store = Arc::new(MemoryStore::new());
        let up = uploader(&store, UploadOptions::default());
        let result = up.upload(Path::new("/no/such/file"), "b", "k").await;

        assert!(!result.success);
        assert!(result.error.is_some());
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn progress_counts_standard_uploads_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.bin");
        fs::write(&path, vec![0u8; 100]).unwrap();

        let store = Arc::new(MemoryStore::new());
        let tracker = Arc::new(ProgressTracker::new(1, 100));
        let up = uploader(&store, UploadOptions::default()).with_progress(Arc::clone(&tracker));
        up.upload(&path, "b", "a.bin").await;

        let stats = tracker.snapshot();
        assert_eq!(stats.processed_files, 1);
        assert_eq!(stats.processed_bytes, 100);
    }

    #[tokio::test]
    async fn invalid_pattern_is_rejected_at_construction() {
        let store = Arc::new(MemoryStore::new());
        let result = Uploader::new(
            store as _,
            UploadOptions {
                exclude_patterns: vec!["broken[".into()],
                ..Default::default()
            },
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(UploadError::Source(_))));
    }
}
