//! Thread-safe upload progress counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Snapshot of the tracker at one point in time.
#[derive(Debug, Clone)]
pub struct Stats {
    pub total_files: u64,
    pub processed_files: u64,
    pub failed_files: u64,
    pub skipped_files: u64,
    pub total_bytes: u64,
    pub processed_bytes: u64,
    pub elapsed: Duration,
    /// Instantaneous rate in bytes per second.
    pub bytes_per_sec: f64,
    /// Estimated time remaining; `None` until at least one completion has
    /// been recorded or when nothing remains.
    pub eta: Option<Duration>,
}

impl Stats {
    /// Completion units recorded so far (processed + failed + skipped).
    pub fn completed(&self) -> u64 {
        self.processed_files + self.failed_files + self.skipped_files
    }
}

/// Shared progress state.
///
/// Counters are lock-free atomics; only the per-worker status map takes a
/// mutex. Safe to call from any task.
#[derive(Debug)]
pub struct ProgressTracker {
    total_files: u64,
    total_bytes: u64,
    processed_files: AtomicU64,
    failed_files: AtomicU64,
    skipped_files: AtomicU64,
    processed_bytes: AtomicU64,
    started: Instant,
    // worker id -> file currently being uploaded
    workers: Mutex<HashMap<usize, String>>,
}

impl ProgressTracker {
    pub fn new(total_files: u64, total_bytes: u64) -> Self {
        Self {
            total_files,
            total_bytes,
            processed_files: AtomicU64::new(0),
            failed_files: AtomicU64::new(0),
            skipped_files: AtomicU64::new(0),
            processed_bytes: AtomicU64::new(0),
            started: Instant::now(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Records one completed unit carrying `bytes` payload bytes.
    pub fn inc_processed(&self, bytes: u64) {
        self.processed_files.fetch_add(1, Ordering::Relaxed);
        self.processed_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failed_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_skipped(&self) {
        self.skipped_files.fetch_add(1, Ordering::Relaxed);
    }

    /// Updates what `worker_id` is working on; an empty name clears it.
    pub fn set_worker(&self, worker_id: usize, file: &str) {
        let mut workers = self.workers.lock().unwrap();
        if file.is_empty() {
            workers.remove(&worker_id);
        } else {
            workers.insert(worker_id, file.to_string());
        }
    }

    /// Returns a copy of the active worker map.
    pub fn active_workers(&self) -> HashMap<usize, String> {
        self.workers.lock().unwrap().clone()
    }

    pub fn snapshot(&self) -> Stats {
        let processed_files = self.processed_files.load(Ordering::Relaxed);
        let failed_files = self.failed_files.load(Ordering::Relaxed);
        let skipped_files = self.skipped_files.load(Ordering::Relaxed);
        let processed_bytes = self.processed_bytes.load(Ordering::Relaxed);

        let elapsed = self.started.elapsed();
        // Floor to keep the rate finite right after construction.
        let secs = elapsed.as_secs_f64().max(0.001);
        let bytes_per_sec = processed_bytes as f64 / secs;

        let completed = processed_files + failed_files + skipped_files;
        let eta = if completed > 0 && self.total_files > completed {
            let remaining = self.total_files - completed;
            Some(elapsed.mul_f64(remaining as f64 / completed as f64))
        } else {
            None
        };

        Stats {
            total_files: self.total_files,
            processed_files,
            failed_files,
            skipped_files,
            total_bytes: self.total_bytes,
            processed_bytes,
            elapsed,
            bytes_per_sec,
            eta,
        }
    }
}
