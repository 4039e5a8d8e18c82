//! Segmented upload of one large, seekable source file.
//!
//! One engine invocation drives a single multipart session from `init`
//! through `complete`, or `abort` on any failure. The engine never retries
//! individual parts; callers retry the whole invocation, which starts a
//! fresh session with a fresh upload-id.

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use stower_store::{guess_content_type, CompletedPart, ObjectStore};

use crate::chunk::{effective_chunk_size, part_spans, PartSpan};
use crate::{ProgressTracker, TransferError};

/// Transient state of one multipart upload.
///
/// Part recording is mutex-guarded; [`sorted_parts`](Self::sorted_parts)
/// is only read after all part uploads have finished.
pub struct MultipartSession {
    bucket: String,
    key: String,
    upload_id: String,
    parts: Mutex<Vec<CompletedPart>>,
}

impl MultipartSession {
    pub fn new(bucket: &str, key: &str, upload_id: String) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
            parts: Mutex::new(Vec::new()),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Records a finished part. Safe to call from concurrent workers.
    pub fn record_part(&self, part_number: i32, etag: String) {
        self.parts
            .lock()
            .unwrap()
            .push(CompletedPart { part_number, etag });
    }

    pub fn recorded_parts(&self) -> usize {
        self.parts.lock().unwrap().len()
    }

    /// Returns the recorded parts sorted ascending, verifying that they
    /// form the contiguous sequence `1..=expected`.
    pub fn sorted_parts(&self, expected: usize) -> Result<Vec<CompletedPart>, TransferError> {
        let mut parts = self.parts.lock().unwrap().clone();
        parts.sort_by_key(|p| p.part_number);

        if parts.len() != expected {
            return Err(TransferError::Internal(format!(
                "recorded {} parts, expected {expected} (upload {})",
                parts.len(),
                self.upload_id
            )));
        }
        for (i, part) in parts.iter().enumerate() {
            let want = (i + 1) as i32;
            if part.part_number != want {
                return Err(TransferError::Internal(format!(
                    "part number gap: found {} where {want} was expected (upload {})",
                    part.part_number, self.upload_id
                )));
            }
        }
        Ok(parts)
    }
}

/// Drives multipart uploads against an [`ObjectStore`].
pub struct MultipartEngine {
    store: Arc<dyn ObjectStore>,
    chunk_size: u64,
    workers: usize,
    cancel: CancellationToken,
    progress: Option<Arc<ProgressTracker>>,
}

impl MultipartEngine {
    /// Creates an engine. `requested_chunk_size` is clamped to the store
    /// minimum; `workers > 1` selects the parallel part strategy.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        requested_chunk_size: u64,
        workers: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            chunk_size: effective_chunk_size(requested_chunk_size),
            workers: workers.max(1),
            cancel,
            progress: None,
        }
    }

    /// Attaches a progress tracker; each finished part is recorded as one
    /// completion unit of the part's size.
    pub fn with_progress(mut self, progress: Arc<ProgressTracker>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Uploads `path` as one object, in `⌈size/chunk⌉` numbered parts.
    pub async fn upload(&self, path: &Path, bucket: &str, key: &str) -> Result<(), TransferError> {
        let (file, size) = open_source(path).await?;
        let content_type = guess_content_type(path);
        let spans = part_spans(size, self.chunk_size);

        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        info!(
            file = %path.display(),
            size,
            chunk_size = self.chunk_size,
            total_parts = spans.len(),
            workers = self.workers,
            "starting multipart upload"
        );

        let upload_id = self
            .store
            .create_multipart(bucket, key, content_type, None)
            .await?;
        info!(bucket = %bucket, key = %key, upload_id = %upload_id, "multipart upload created");
        let session = Arc::new(MultipartSession::new(bucket, key, upload_id));

        if let Err(e) = self.run_to_completion(file, &session, &spans).await {
            self.abort(&session).await;
            return Err(e);
        }
        Ok(())
    }

    async fn run_to_completion(
        &self,
        file: Arc<File>,
        session: &Arc<MultipartSession>,
        spans: &[PartSpan],
    ) -> Result<(), TransferError> {
        if self.workers > 1 && spans.len() > 1 {
            self.upload_parts_parallel(file, session, spans).await?;
        } else {
            self.upload_parts_sequential(file, session, spans).await?;
        }

        let parts = session.sorted_parts(spans.len())?;
        self.store
            .complete_multipart(session.bucket(), session.key(), session.upload_id(), &parts)
            .await?;
        info!(
            bucket = %session.bucket(),
            key = %session.key(),
            upload_id = %session.upload_id(),
            total_parts = parts.len(),
            "multipart upload completed"
        );
        Ok(())
    }

    async fn upload_parts_sequential(
        &self,
        file: Arc<File>,
        session: &Arc<MultipartSession>,
        spans: &[PartSpan],
    ) -> Result<(), TransferError> {
        for span in spans {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            let body = read_part(&file, *span).await?;
            let etag = self
                .store
                .upload_part(
                    session.bucket(),
                    session.key(),
                    session.upload_id(),
                    span.number,
                    body,
                )
                .await?;
            session.record_part(span.number, etag);
            if let Some(progress) = &self.progress {
                progress.inc_processed(span.len);
            }
            debug!(
                part = span.number,
                offset = span.offset,
                size = span.len,
                upload_id = %session.upload_id(),
                "part uploaded"
            );
        }
        Ok(())
    }

    /// Fans the part queue out over `workers` tasks.
    ///
    /// Each worker reads its range positionally; the shared file handle's
    /// cursor is never used. The first error trips an engine-local token
    /// so siblings stop at their next iteration without cancelling the
    /// caller's context.
    async fn upload_parts_parallel(
        &self,
        file: Arc<File>,
        session: &Arc<MultipartSession>,
        spans: &[PartSpan],
    ) -> Result<(), TransferError> {
        let local_cancel = self.cancel.child_token();
        let queue: Arc<Mutex<VecDeque<PartSpan>>> =
            Arc::new(Mutex::new(spans.iter().copied().collect()));

        let mut workers: JoinSet<Result<(), TransferError>> = JoinSet::new();
        for worker_id in 0..self.workers {
            let store = Arc::clone(&self.store);
            let file = Arc::clone(&file);
            let session = Arc::clone(session);
            let queue = Arc::clone(&queue);
            let cancel = local_cancel.clone();
            let progress = self.progress.clone();

            workers.spawn(async move {
                debug!(worker = worker_id, upload_id = %session.upload_id(), "part worker started");
                loop {
                    if cancel.is_cancelled() {
                        return Err(TransferError::Cancelled);
                    }
                    let span = { queue.lock().unwrap().pop_front() };
                    let Some(span) = span else { break };

                    let body = read_part(&file, span).await?;
                    let etag = store
                        .upload_part(
                            session.bucket(),
                            session.key(),
                            session.upload_id(),
                            span.number,
                            body,
                        )
                        .await?;
                    session.record_part(span.number, etag);
                    if let Some(progress) = &progress {
                        progress.inc_processed(span.len);
                    }
                    debug!(
                        worker = worker_id,
                        part = span.number,
                        offset = span.offset,
                        size = span.len,
                        upload_id = %session.upload_id(),
                        "part uploaded"
                    );
                }
                debug!(worker = worker_id, upload_id = %session.upload_id(), "part worker finished");
                Ok(())
            });
        }

        let mut first_error: Option<TransferError> = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = match joined {
                Ok(result) => result,
                Err(e) => Err(TransferError::Internal(format!("part worker panicked: {e}"))),
            };
            if let Err(e) = outcome {
                // Keep the root cause; a sibling's Cancelled is just fallout.
                let replace = match &first_error {
                    None => true,
                    Some(TransferError::Cancelled) => !matches!(e, TransferError::Cancelled),
                    Some(_) => false,
                };
                if replace {
                    local_cancel.cancel();
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Releases the server-side upload-id after a failure.
    ///
    /// Runs without consulting any cancellation token so that cleanup
    /// happens even when the run itself was cancelled.
    async fn abort(&self, session: &MultipartSession) {
        match self
            .store
            .abort_multipart(session.bucket(), session.key(), session.upload_id())
            .await
        {
            Ok(()) => info!(
                bucket = %session.bucket(),
                key = %session.key(),
                upload_id = %session.upload_id(),
                "multipart upload aborted"
            ),
            Err(e) => error!(
                upload_id = %session.upload_id(),
                error = %e,
                "failed to abort multipart upload"
            ),
        }
    }
}

async fn open_source(path: &Path) -> Result<(Arc<File>, u64), TransferError> {
    let path = path.to_path_buf();
    let (file, size) = tokio::task::spawn_blocking(move || {
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        Ok::<_, std::io::Error>((file, size))
    })
    .await
    .map_err(|e| TransferError::Internal(format!("blocking open failed: {e}")))??;
    Ok((Arc::new(file), size))
}

async fn read_part(file: &Arc<File>, span: PartSpan) -> Result<Bytes, TransferError> {
    let file = Arc::clone(file);
    let buf = tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; span.len as usize];
        read_exact_at(&file, &mut buf, span.offset)?;
        Ok::<_, std::io::Error>(buf)
    })
    .await
    .map_err(|e| TransferError::Internal(format!("blocking read failed: {e}")))??;
    Ok(Bytes::from(buf))
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut read = 0;
    while read < buf.len() {
        let n = file.seek_read(&mut buf[read..], offset + read as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "file shorter than expected",
            ));
        }
        read += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use stower_store::{MemoryStore, ObjectMetadata, ObjectSummary, StoreError, StoreOp};
    use tempfile::TempDir;

    const MIB: u64 = 1024 * 1024;

    /// Writes `size` bytes where each byte encodes its 5 MiB chunk index,
    /// so misassembled parts are visible in the result.
    fn write_patterned(dir: &TempDir, name: &str, size: u64) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let data: Vec<u8> = (0..size).map(|i| (i / (5 * MIB)) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        path
    }

    fn part_numbers(store: &MemoryStore) -> Vec<i32> {
        store
            .journal()
            .iter()
            .filter_map(|op| match op {
                StoreOp::UploadPart { part_number, .. } => Some(*part_number),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn sequential_uploads_contiguous_parts() {
        let dir = TempDir::new().unwrap();
        let path = write_patterned(&dir, "big.bin", 11 * MIB);
        let store = Arc::new(MemoryStore::new());

        let engine = MultipartEngine::new(Arc::clone(&store) as _, 5 * MIB, 1, CancellationToken::new());
        engine.upload(&path, "b", "big.bin").await.unwrap();

        assert_eq!(store.multipart_creates(), 1);
        assert_eq!(store.multipart_completes(), 1);
        assert_eq!(store.multipart_aborts(), 0);

        let mut numbers = part_numbers(&store);
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2, 3]);

        let body = store.object("b", "big.bin").unwrap();
        assert_eq!(body.len() as u64, 11 * MIB);
        assert_eq!(body[0], 0);
        assert_eq!(body[(10 * MIB + 1) as usize], 2);
    }

    #[tokio::test]
    async fn parallel_uploads_assemble_in_order() {
        let dir = TempDir::new().unwrap();
        let path = write_patterned(&dir, "big.bin", 23 * MIB);
        let store = Arc::new(MemoryStore::new());

        let engine = MultipartEngine::new(Arc::clone(&store) as _, 5 * MIB, 4, CancellationToken::new());
        engine.upload(&path, "b", "big.bin").await.unwrap();

        let mut numbers = part_numbers(&store);
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

        // The completion call must list parts ascending.
        let completed: Vec<Vec<i32>> = store
            .journal()
            .iter()
            .filter_map(|op| match op {
                StoreOp::CompleteMultipart { part_numbers, .. } => Some(part_numbers.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![vec![1, 2, 3, 4, 5]]);

        let body = store.object("b", "big.bin").unwrap();
        assert_eq!(body.len() as u64, 23 * MIB);
        let expected: Vec<u8> = (0..23 * MIB).map(|i| (i / (5 * MIB)) as u8).collect();
        assert_eq!(body.as_ref(), expected.as_slice());
    }

    #[tokio::test]
    async fn requested_chunk_size_is_clamped() {
        let store = Arc::new(MemoryStore::new());
        let engine = MultipartEngine::new(store as _, 1024, 1, CancellationToken::new());
        assert_eq!(engine.chunk_size(), 5 * MIB);
    }

    #[tokio::test]
    async fn part_failure_aborts_without_internal_retry() {
        let dir = TempDir::new().unwrap();
        let path = write_patterned(&dir, "big.bin", 11 * MIB);
        let store = Arc::new(MemoryStore::new());
        store.fail_upload_part(2, 1);

        let engine = MultipartEngine::new(Arc::clone(&store) as _, 5 * MIB, 1, CancellationToken::new());
        let result = engine.upload(&path, "b", "big.bin").await;
        assert!(matches!(result, Err(TransferError::Store(_))));

        assert_eq!(store.multipart_creates(), 1);
        assert_eq!(store.multipart_completes(), 0);
        assert_eq!(store.multipart_aborts(), 1);
        assert_eq!(store.open_uploads(), 0);

        // Part 2 was attempted exactly once: the engine does not retry parts.
        let attempts_on_2 = part_numbers(&store).iter().filter(|&&n| n == 2).count();
        assert_eq!(attempts_on_2, 1);
    }

    #[tokio::test]
    async fn parallel_part_failure_stops_siblings_and_aborts() {
        let dir = TempDir::new().unwrap();
        let path = write_patterned(&dir, "big.bin", 23 * MIB);
        let store = Arc::new(MemoryStore::new());
        store.fail_upload_part(1, 1);

        let engine = MultipartEngine::new(Arc::clone(&store) as _, 5 * MIB, 3, CancellationToken::new());
        let result = engine.upload(&path, "b", "big.bin").await;
        assert!(matches!(result, Err(TransferError::Store(_))));

        assert_eq!(store.multipart_completes(), 0);
        assert_eq!(store.multipart_aborts(), 1);
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn complete_failure_still_releases_upload() {
        let dir = TempDir::new().unwrap();
        let path = write_patterned(&dir, "big.bin", 6 * MIB);
        let store = Arc::new(MemoryStore::new());
        store.fail_complete_multipart(1);

        let engine = MultipartEngine::new(Arc::clone(&store) as _, 5 * MIB, 1, CancellationToken::new());
        let result = engine.upload(&path, "b", "big.bin").await;
        assert!(result.is_err());

        assert_eq!(store.multipart_completes(), 1);
        assert_eq!(store.multipart_aborts(), 1);
        assert_eq!(store.open_uploads(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_start_issues_no_calls() {
        let dir = TempDir::new().unwrap();
        let path = write_patterned(&dir, "big.bin", 6 * MIB);
        let store = Arc::new(MemoryStore::new());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = MultipartEngine::new(Arc::clone(&store) as _, 5 * MIB, 2, cancel);
        let result = engine.upload(&path, "b", "big.bin").await;

        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert_eq!(store.multipart_creates(), 0);
    }

    #[tokio::test]
    async fn cancellation_mid_flight_aborts_the_session() {
        let dir = TempDir::new().unwrap();
        let path = write_patterned(&dir, "big.bin", 21 * MIB);
        let store = Arc::new(SlowStore::new(Duration::from_millis(25)));

        let cancel = CancellationToken::new();
        let engine = Arc::new(MultipartEngine::new(
            Arc::clone(&store) as _,
            5 * MIB,
            1,
            cancel.clone(),
        ));

        let task = tokio::spawn({
            let engine = Arc::clone(&engine);
            let path = path.clone();
            async move { engine.upload(&path, "b", "big.bin").await }
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        cancel.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert_eq!(store.inner.multipart_creates(), 1);
        assert_eq!(store.inner.multipart_completes(), 0);
        assert_eq!(store.inner.multipart_aborts(), 1);
        assert_eq!(store.inner.open_uploads(), 0);
    }

    #[tokio::test]
    async fn progress_advances_per_part() {
        let dir = TempDir::new().unwrap();
        let path = write_patterned(&dir, "big.bin", 11 * MIB);
        let store = Arc::new(MemoryStore::new());
        let tracker = Arc::new(ProgressTracker::new(3, 11 * MIB));

        let engine = MultipartEngine::new(Arc::clone(&store) as _, 5 * MIB, 2, CancellationToken::new())
            .with_progress(Arc::clone(&tracker));
        engine.upload(&path, "b", "big.bin").await.unwrap();

        let stats = tracker.snapshot();
        assert_eq!(stats.processed_bytes, 11 * MIB);
        assert_eq!(stats.processed_files, 3);
    }

    #[test]
    fn session_sorts_recorded_parts() {
        let session = MultipartSession::new("b", "k", "u1".into());
        session.record_part(3, "e3".into());
        session.record_part(1, "e1".into());
        session.record_part(2, "e2".into());

        let parts = session.sorted_parts(3).unwrap();
        let numbers: Vec<i32> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn session_rejects_part_number_gap() {
        let session = MultipartSession::new("b", "k", "u1".into());
        session.record_part(1, "e1".into());
        session.record_part(3, "e3".into());

        assert!(matches!(
            session.sorted_parts(2),
            Err(TransferError::Internal(_))
        ));
    }

    #[test]
    fn session_rejects_missing_parts() {
        let session = MultipartSession::new("b", "k", "u1".into());
        session.record_part(1, "e1".into());
        assert!(matches!(
            session.sorted_parts(2),
            Err(TransferError::Internal(_))
        ));
    }

    #[test]
    fn session_rejects_duplicate_parts() {
        let session = MultipartSession::new("b", "k", "u1".into());
        session.record_part(1, "e1".into());
        session.record_part(1, "e1b".into());
        assert!(matches!(
            session.sorted_parts(2),
            Err(TransferError::Internal(_))
        ));
    }

    /// Delegating store that sleeps before each part upload, giving
    /// cancellation tests a window to land in.
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
    }

    impl SlowStore {
        fn new(delay: Duration) -> Self {
            Self {
                inner: MemoryStore::new(),
                delay,
            }
        }
    }

    #[async_trait::async_trait]
    impl ObjectStore for SlowStore {
        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            body: Bytes,
            content_type: &str,
            metadata: Option<&ObjectMetadata>,
        ) -> Result<(), StoreError> {
            self.inner.put_object(bucket, key, body, content_type, metadata).await
        }

        async fn head_bucket(&self, bucket: &str) -> Result<(), StoreError> {
            self.inner.head_bucket(bucket).await
        }

        async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectSummary, StoreError> {
            self.inner.head_object(bucket, key).await
        }

        async fn list_objects(
            &self,
            bucket: &str,
            prefix: &str,
        ) -> Result<Vec<ObjectSummary>, StoreError> {
            self.inner.list_objects(bucket, prefix).await
        }

        async fn create_multipart(
            &self,
            bucket: &str,
            key: &str,
            content_type: &str,
            metadata: Option<&ObjectMetadata>,
        ) -> Result<String, StoreError> {
            self.inner.create_multipart(bucket, key, content_type, metadata).await
        }

        async fn upload_part(
            &self,
            bucket: &str,
            key: &str,
            upload_id: &str,
            part_number: i32,
            body: Bytes,
        ) -> Result<String, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.upload_part(bucket, key, upload_id, part_number, body).await
        }

        async fn complete_multipart(
            &self,
            bucket: &str,
            key: &str,
            upload_id: &str,
            parts: &[CompletedPart],
        ) -> Result<(), StoreError> {
            self.inner.complete_multipart(bucket, key, upload_id, parts).await
        }

        async fn abort_multipart(
            &self,
            bucket: &str,
            key: &str,
            upload_id: &str,
        ) -> Result<(), StoreError> {
            self.inner.abort_multipart(bucket, key, upload_id).await
        }
    }
}
