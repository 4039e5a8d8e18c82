//! Directory upload: scanner bound to the pool.

use std::path::Path;

use tracing::{error, info, warn};

use stower_scan::FileRef;

use crate::pool::{Job, WorkerPool};
use crate::types::UploadResult;
use crate::{UploadError, Uploader};

impl Uploader {
    /// Uploads every file under `root`, keyed as
    /// `key_prefix/<relative path>`.
    ///
    /// Uses the worker pool when more than one worker is configured and
    /// the file count exceeds the worker count; with only a handful of
    /// files the pool setup outweighs its benefit and the sequential path
    /// is easier to follow in the logs.
    pub async fn upload_directory(
        &self,
        root: &Path,
        bucket: &str,
        key_prefix: &str,
        recursive: bool,
    ) -> Result<Vec<UploadResult>, UploadError> {
        let files = self.scanner().scan(root, recursive)?;
        info!(
            path = %root.display(),
            files_found = files.len(),
            recursive,
            "directory scan completed"
        );

        if self.options().parallel_uploads > 1 && files.len() > self.options().parallel_uploads {
            self.upload_directory_parallel(files, bucket, key_prefix)
                .await
        } else {
            Ok(self
                .upload_directory_sequential(files, bucket, key_prefix)
                .await)
        }
    }

    async fn upload_directory_sequential(
        &self,
        files: Vec<FileRef>,
        bucket: &str,
        key_prefix: &str,
    ) -> Vec<UploadResult> {
        let mut results = Vec::with_capacity(files.len());
        for file in files {
            let key = join_key(key_prefix, &file.relative_path);
            let result = self.upload_with_retry(&file.path, bucket, &key).await;
            if !result.success {
                error!(
                    file = %file.path.display(),
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "failed to upload file"
                );
            }
            results.push(result);
        }
        results
    }

    async fn upload_directory_parallel(
        &self,
        files: Vec<FileRef>,
        bucket: &str,
        key_prefix: &str,
    ) -> Result<Vec<UploadResult>, UploadError> {
        let workers = self.options().parallel_uploads;
        info!(
            files = files.len(),
            workers,
            "using parallel upload for directory"
        );

        let mut pool = WorkerPool::new(self.clone(), workers, self.cancel_token().child_token());
        let mut result_rx = pool
            .results()
            .ok_or_else(|| UploadError::Internal("pool results already taken".into()))?;
        pool.start();

        let collector = tokio::spawn(async move {
            let mut collected = Vec::new();
            while let Some(result) = result_rx.recv().await {
                collected.push(result);
            }
            collected
        });

        for (id, file) in files.iter().enumerate() {
            let key = join_key(key_prefix, &file.relative_path);
            let job = Job {
                file: file.clone(),
                bucket: bucket.to_string(),
                key,
                id: id as u64,
            };
            if let Err(e) = pool.submit(job).await {
                warn!(error = %e, "job submission rejected, stopping intake");
                break;
            }
        }
        pool.stop().await;

        let results = collector
            .await
            .map_err(|e| UploadError::Internal(format!("result collector failed: {e}")))?;

        let (uploaded, failed, total_bytes) = pool.stats();
        info!(
            total_files = files.len(),
            uploaded,
            failed,
            total_bytes,
            "parallel upload completed"
        );
        Ok(results)
    }
}

/// Joins a key prefix and a `/`-relative path into an object key.
///
/// An empty prefix means the relative path is the full key; a leading
/// slash never survives into the key.
pub(crate) fn join_key(prefix: &str, relative: &str) -> String {
    let joined = if prefix.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), relative)
    };
    joined.trim_start_matches('/').to_string()
}
