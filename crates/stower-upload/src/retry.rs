//! Retry with capped exponential backoff.

use std::path::Path;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::types::UploadResult;
use crate::{UploadError, Uploader};

/// Retry schedule shared by every file upload: no delay before the first
/// attempt, then `1s, 2s, 4s, …` capped at 30 seconds.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

const MAX_DELAY: Duration = Duration::from_secs(30);

impl RetryPolicy {
    /// Total attempts, including the first one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to sleep before the given 1-based attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(62);
        Duration::from_secs(1u64 << exp).min(MAX_DELAY)
    }
}

impl Uploader {
    /// Uploads one file, retrying transient failures up to
    /// `max_retries` extra times.
    ///
    /// The cancellation token is checked before every attempt; permanent
    /// failures return immediately. Intermediate failures are logged at
    /// `warn`; only the final one is attached to the result.
    pub async fn upload_with_retry(&self, path: &Path, bucket: &str, key: &str) -> UploadResult {
        let policy = RetryPolicy {
            max_retries: self.options().max_retries,
        };

        let mut last_error: Option<UploadError> = None;
        for attempt in 1..=policy.attempts() {
            if self.cancel_token().is_cancelled() {
                return self.failed_result(path, bucket, key, &UploadError::Cancelled);
            }

            let delay = policy.delay_before(attempt);
            if !delay.is_zero() {
                info!(
                    file = %path.display(),
                    attempt,
                    max_attempts = policy.attempts(),
                    delay_secs = delay.as_secs(),
                    "retrying upload"
                );
                tokio::time::sleep(delay).await;
            }

            match self.attempt(path, bucket, key).await {
                Ok(result) => return result,
                Err(e) => {
                    warn!(
                        file = %path.display(),
                        attempt,
                        error = %e,
                        "upload attempt failed"
                    );
                    if !e.is_transient() {
                        return self.failed_result(path, bucket, key, &e);
                    }
                    last_error = Some(e);
                }
            }
        }

        let final_error = UploadError::RetriesExhausted {
            attempts: policy.attempts(),
            source: Box::new(
                last_error.unwrap_or_else(|| UploadError::Internal("no attempt was made".into())),
            ),
        };
        error!(
            file = %path.display(),
            error = %final_error,
            "upload failed after all attempts"
        );
        self.failed_result(path, bucket, key, &final_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;

    use stower_store::MemoryStore;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use crate::types::UploadOptions;

    fn uploader_with(
        store: &Arc<MemoryStore>,
        max_retries: u32,
        cancel: CancellationToken,
    ) -> Uploader {
        Uploader::new(
            Arc::clone(store) as _,
            UploadOptions {
                max_retries,
                ..Default::default()
            },
            cancel,
        )
        .unwrap()
    }

    #[test]
    fn backoff_sequence_is_exponential_and_capped() {
        let policy = RetryPolicy { max_retries: 8 };
        let delays: Vec<u64> = (1..=9).map(|a| policy.delay_before(a).as_secs()).collect();
        assert_eq!(delays, vec![0, 1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn attempts_include_the_first_try() {
        assert_eq!(RetryPolicy { max_retries: 0 }.attempts(), 1);
        assert_eq!(RetryPolicy { max_retries: 3 }.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"data").unwrap();

        let store = Arc::new(MemoryStore::new());
        store.fail_put_object(2);
        let up = uploader_with(&store, 2, CancellationToken::new());

        let result = up.upload_with_retry(&path, "b", "a.txt").await;
        assert!(result.success);
        assert_eq!(store.puts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_budget_is_respected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"data").unwrap();

        let store = Arc::new(MemoryStore::new());
        store.fail_put_object(10);
        let up = uploader_with(&store, 2, CancellationToken::new());

        let result = up.upload_with_retry(&path, "b", "a.txt").await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("3 attempts"));
        // max_retries + 1 attempts, no more.
        assert_eq!(store.puts(), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let up = uploader_with(&store, 5, CancellationToken::new());

        let result = up.upload_with_retry(Path::new("/missing/file"), "b", "k").await;
        assert!(!result.success);
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn cancellation_preempts_the_first_attempt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"data").unwrap();

        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let up = uploader_with(&store, 3, cancel);

        let result = up.upload_with_retry(&path, "b", "a.txt").await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("cancelled"));
        assert!(store.journal().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn multipart_cycle_is_retried_from_scratch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let mib = 1024 * 1024;
        fs::write(&path, vec![3u8; 11 * mib]).unwrap();

        let store = Arc::new(MemoryStore::new());
        // Part 2 fails once; the whole multipart cycle restarts.
        store.fail_upload_part(2, 1);
        let up = Uploader::new(
            Arc::clone(&store) as _,
            UploadOptions {
                max_retries: 1,
                multipart_threshold: mib as u64,
                multipart_chunksize: 5 * mib as u64,
                parallel_uploads: 1,
                ..Default::default()
            },
            CancellationToken::new(),
        )
        .unwrap();

        let result = up.upload_with_retry(&path, "b", "big.bin").await;
        assert!(result.success, "{:?}", result.error);

        assert_eq!(store.multipart_creates(), 2);
        assert_eq!(store.multipart_aborts(), 1);
        assert_eq!(store.multipart_completes(), 1);
        assert_eq!(store.open_uploads(), 0);
    }
}
