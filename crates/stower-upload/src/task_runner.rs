//! Declarative task execution.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use stower_store::ObjectStore;
use stower_transfer::ProgressTracker;

use crate::types::{UploadOptions, UploadResult};
use crate::{UploadError, Uploader};

/// One declared upload action: a single file or a directory tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source: PathBuf,
    pub bucket: String,
    /// Destination key when the source is a single file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Destination key prefix when the source is a directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Aggregate outcome of one task.
#[derive(Debug, Serialize)]
pub struct TaskResult {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub total_files: usize,
    pub success_files: usize,
    pub failed_files: usize,
    pub skipped_files: usize,
    pub total_bytes: u64,
    pub results: Vec<UploadResult>,
    /// Fatal error that prevented per-file processing (missing source).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    /// A task fails on a fatal error or any failed file.
    pub fn failed(&self) -> bool {
        self.error.is_some() || self.failed_files > 0
    }
}

/// Aggregate outcome of one whole run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    pub total_tasks: usize,
    pub success_tasks: usize,
    pub failed_tasks: usize,
    pub skipped_tasks: usize,
    pub dry_run: bool,
    pub tasks: Vec<TaskResult>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.failed_tasks > 0
    }
}

/// Runs a declared list of tasks in order and aggregates the report.
pub struct TaskRunner {
    uploader: Uploader,
    tasks: Vec<TaskSpec>,
    dry_run: bool,
}

impl TaskRunner {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        options: UploadOptions,
        tasks: Vec<TaskSpec>,
        cancel: CancellationToken,
    ) -> Result<Self, UploadError> {
        let dry_run = options.dry_run;
        let uploader = Uploader::new(store, options, cancel)?;
        Ok(Self {
            uploader,
            tasks,
            dry_run,
        })
    }

    /// Attaches a shared progress tracker to the underlying uploader.
    pub fn with_progress(mut self, progress: Arc<ProgressTracker>) -> Self {
        self.uploader = self.uploader.with_progress(progress);
        self
    }

    /// Runs every enabled task in declared order.
    ///
    /// Per-task fatal errors and per-file failures never stop the run;
    /// the caller decides what the report means for the exit code.
    pub async fn run(&self) -> RunReport {
        let started_at = Utc::now();
        let t0 = Instant::now();

        if self.dry_run {
            info!("running in dry-run mode, no files will be uploaded");
        }
        info!(
            total_tasks = self.tasks.len(),
            dry_run = self.dry_run,
            "starting task runner"
        );

        let mut tasks = Vec::new();
        let mut success_tasks = 0;
        let mut failed_tasks = 0;
        let mut skipped_tasks = 0;

        for spec in &self.tasks {
            if !spec.enabled {
                info!(task = %spec.name, "skipping disabled task");
                skipped_tasks += 1;
                continue;
            }

            info!(
                task = %spec.name,
                description = spec.description.as_deref().unwrap_or(""),
                "starting task"
            );
            let result = self.run_task(spec).await;

            if result.failed() {
                failed_tasks += 1;
                error!(
                    task = %spec.name,
                    failed_files = result.failed_files,
                    error = result.error.as_deref().unwrap_or(""),
                    "task failed"
                );
            } else {
                success_tasks += 1;
                info!(
                    task = %spec.name,
                    duration_ms = result.duration.as_millis() as u64,
                    files = result.success_files,
                    bytes = result.total_bytes,
                    "task completed"
                );
            }
            tasks.push(result);
        }

        let finished_at = Utc::now();
        RunReport {
            started_at,
            finished_at,
            duration: t0.elapsed(),
            total_tasks: self.tasks.len(),
            success_tasks,
            failed_tasks,
            skipped_tasks,
            dry_run: self.dry_run,
            tasks,
        }
    }

    async fn run_task(&self, spec: &TaskSpec) -> TaskResult {
        let started_at = Utc::now();
        let t0 = Instant::now();

        let meta = match std::fs::metadata(&spec.source) {
            Ok(meta) => meta,
            Err(e) => {
                return TaskResult {
                    name: spec.name.clone(),
                    started_at,
                    duration: t0.elapsed(),
                    total_files: 0,
                    success_files: 0,
                    failed_files: 0,
                    skipped_files: 0,
                    total_bytes: 0,
                    results: Vec::new(),
                    error: Some(format!("source not found: {e}")),
                };
            }
        };

        let outcome = if meta.is_dir() {
            let key_prefix = spec.key_prefix.as_deref().unwrap_or("");
            debug!(
                source = %spec.source.display(),
                bucket = %spec.bucket,
                prefix = %key_prefix,
                recursive = spec.recursive,
                "uploading directory"
            );
            self.uploader
                .upload_directory(&spec.source, &spec.bucket, key_prefix, spec.recursive)
                .await
        } else {
            let key = spec
                .key
                .clone()
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| {
                    spec.source
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                });
            debug!(
                source = %spec.source.display(),
                bucket = %spec.bucket,
                key = %key,
                "uploading file"
            );
            Ok(vec![
                self.uploader
                    .upload_with_retry(&spec.source, &spec.bucket, &key)
                    .await,
            ])
        };

        match outcome {
            Ok(results) => {
                let mut task = TaskResult {
                    name: spec.name.clone(),
                    started_at,
                    duration: Duration::ZERO,
                    total_files: results.len(),
                    success_files: 0,
                    failed_files: 0,
                    skipped_files: 0,
                    total_bytes: 0,
                    results,
                    error: None,
                };
                for result in &task.results {
                    if result.transferred() {
                        task.success_files += 1;
                        task.total_bytes += result.size;
                    } else if result.is_skipped() {
                        task.skipped_files += 1;
                    } else {
                        task.failed_files += 1;
                    }
                }
                task.duration = t0.elapsed();
                task
            }
            Err(e) => TaskResult {
                name: spec.name.clone(),
                started_at,
                duration: t0.elapsed(),
                total_files: 0,
                success_files: 0,
                failed_files: 0,
                skipped_files: 0,
                total_bytes: 0,
                results: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }
}
