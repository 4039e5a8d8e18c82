//! Fixed-size worker pool for file jobs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use stower_scan::FileRef;

use crate::types::UploadResult;
use crate::{UploadError, Uploader};

/// One unit of work for the pool.
#[derive(Debug, Clone)]
pub struct Job {
    pub file: FileRef,
    pub bucket: String,
    pub key: String,
    /// Monotonic id, for log correlation only.
    pub id: u64,
}

#[derive(Default)]
struct PoolStats {
    uploaded: AtomicU64,
    failed: AtomicU64,
    total_bytes: AtomicU64,
}

/// Fans jobs out over a fixed number of workers.
///
/// Both channels are bounded at twice the worker count, so submission
/// backpressures instead of buffering the whole scan. Result order does
/// not match submission order; results carry their source path for
/// correlation.
pub struct WorkerPool {
    uploader: Uploader,
    workers: usize,
    job_tx: Option<mpsc::Sender<Job>>,
    job_rx: Option<mpsc::Receiver<Job>>,
    result_tx: Option<mpsc::Sender<UploadResult>>,
    result_rx: Option<mpsc::Receiver<UploadResult>>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    stopped: AtomicBool,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    pub fn new(uploader: Uploader, workers: usize, cancel: CancellationToken) -> Self {
        let workers = workers.max(1);
        let (job_tx, job_rx) = mpsc::channel(workers * 2);
        let (result_tx, result_rx) = mpsc::channel(workers * 2);
        Self {
            uploader,
            workers,
            job_tx: Some(job_tx),
            job_rx: Some(job_rx),
            result_tx: Some(result_tx),
            result_rx: Some(result_rx),
            cancel,
            handles: Vec::new(),
            stopped: AtomicBool::new(false),
            stats: Arc::new(PoolStats::default()),
        }
    }

    /// Spawns the workers. Call once.
    pub fn start(&mut self) {
        let Some(job_rx) = self.job_rx.take() else {
            debug!("worker pool already started");
            return;
        };
        info!(workers = self.workers, "starting worker pool");

        let job_rx = Arc::new(Mutex::new(job_rx));
        // Workers hold the only result senders once this is taken, so the
        // result stream ends exactly when the last worker exits.
        let result_tx = self.result_tx.take();

        for worker_id in 0..self.workers {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let uploader = self.uploader.clone();
            let cancel = self.cancel.clone();
            let stats = Arc::clone(&self.stats);
            self.handles.push(tokio::spawn(async move {
                if let Some(result_tx) = result_tx {
                    worker_loop(worker_id, job_rx, result_tx, uploader, cancel, stats).await;
                }
            }));
        }
    }

    /// Queues a job, waiting for capacity.
    ///
    /// Fails once the pool is cancelled or stopped; the job is then not
    /// accepted and will produce no result.
    pub async fn submit(&self, job: Job) -> Result<(), UploadError> {
        let Some(job_tx) = &self.job_tx else {
            return Err(UploadError::Cancelled);
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(UploadError::Cancelled),
            sent = job_tx.send(job) => sent.map_err(|_| UploadError::Cancelled),
        }
    }

    /// Closes the job channel and waits for every worker to exit.
    /// Idempotent.
    pub async fn stop(&mut self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("worker pool already stopped");
            return;
        }
        info!("stopping worker pool");
        self.job_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }

    /// Takes the result stream. Can only be taken once.
    pub fn results(&mut self) -> Option<mpsc::Receiver<UploadResult>> {
        self.result_rx.take()
    }

    /// `(uploaded, failed, total_bytes)` counted so far.
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.uploaded.load(Ordering::Relaxed),
            self.stats.failed.load(Ordering::Relaxed),
            self.stats.total_bytes.load(Ordering::Relaxed),
        )
    }
}

async fn worker_loop(
    worker_id: usize,
    job_rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    result_tx: mpsc::Sender<UploadResult>,
    uploader: Uploader,
    cancel: CancellationToken,
    stats: Arc<PoolStats>,
) {
    debug!(worker = worker_id, "worker started");
    loop {
        let job = {
            let mut rx = job_rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else { break };

        debug!(
            worker = worker_id,
            job = job.id,
            file = %job.file.path.display(),
            "processing job"
        );
        if let Some(progress) = uploader.progress() {
            progress.set_worker(worker_id, &job.file.relative_path);
        }

        let result = uploader
            .upload_with_retry(&job.file.path, &job.bucket, &job.key)
            .await;

        if let Some(progress) = uploader.progress() {
            progress.set_worker(worker_id, "");
        }
        if result.transferred() {
            stats.uploaded.fetch_add(1, Ordering::Relaxed);
            stats.total_bytes.fetch_add(result.size, Ordering::Relaxed);
        } else if !result.success {
            stats.failed.fetch_add(1, Ordering::Relaxed);
        }

        tokio::select! {
            biased;
            sent = result_tx.send(result) => {
                if sent.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
    debug!(worker = worker_id, "worker finished");
}
