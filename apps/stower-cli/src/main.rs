//! Batch uploader entry point.
//!
//! Loads a JSON task manifest, runs every enabled task and renders the
//! run report. Exit code 1 when any task failed. This build ships the
//! in-memory transport: dry runs never touch a store, and live runs
//! rehearse the full pipeline against it; a network transport plugs in
//! through the `ObjectStore` trait.

mod config;
mod report;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stower_store::{MemoryStore, ObjectStore};
use stower_transfer::ProgressTracker;
use stower_upload::TaskRunner;

use crate::config::{Config, LoggingConfig};

const USAGE: &str = "usage: stower [--check] [--dry-run] [config.json]";

struct Args {
    config_path: PathBuf,
    check: bool,
    dry_run: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut config_path = None;
    let mut check = false;
    let mut dry_run = false;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--check" => check = true,
            "--dry-run" => dry_run = true,
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other if other.starts_with('-') => anyhow::bail!("unknown flag `{other}`\n{USAGE}"),
            other => {
                if config_path.is_some() {
                    anyhow::bail!("multiple configuration files given\n{USAGE}");
                }
                config_path = Some(PathBuf::from(other));
            }
        }
    }

    Ok(Args {
        config_path: config_path.unwrap_or_else(|| PathBuf::from("config.json")),
        check,
        dry_run,
    })
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(logging.level.clone()))
    };
    let json = logging.format == "json";

    match &logging.file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            if json {
                tracing_subscriber::fmt()
                    .with_env_filter(filter())
                    .json()
                    .with_writer(file)
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(filter())
                    .with_ansi(false)
                    .with_writer(file)
                    .init();
            }
        }
        None => {
            if json {
                tracing_subscriber::fmt().with_env_filter(filter()).json().init();
            } else {
                tracing_subscriber::fmt().with_env_filter(filter()).init();
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let args = parse_args()?;
    let mut config = Config::load(&args.config_path)?;
    if args.dry_run {
        config.options.dry_run = true;
    }
    init_logging(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config_path.display(),
        tasks = config.upload_tasks.len(),
        "starting stower"
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(execute(config, args.check))
}

async fn execute(config: Config, check: bool) -> anyhow::Result<ExitCode> {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
    if !config.options.dry_run {
        warn!("no network transport configured in this build, executing against the in-memory store");
    }

    if check {
        for bucket in config.buckets() {
            store
                .head_bucket(bucket)
                .await
                .with_context(|| format!("bucket `{bucket}` is not accessible"))?;
            info!(bucket = %bucket, "bucket accessible");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let tracker = Arc::new(ProgressTracker::new(0, 0));
    let progress_stop = CancellationToken::new();
    let progress_task = tokio::spawn(progress_loop(
        Arc::clone(&tracker),
        progress_stop.clone(),
    ));

    let runner = TaskRunner::new(store, config.options, config.upload_tasks, cancel)?
        .with_progress(tracker);
    let report = runner.run().await;

    progress_stop.cancel();
    let _ = progress_task.await;

    print!("{}", report::render(&report));
    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Logs a progress line at a fixed cadence while tasks run.
async fn progress_loop(tracker: Arc<ProgressTracker>, stop: CancellationToken) {
    const INTERVAL: Duration = Duration::from_secs(30);
    let mut ticker = tokio::time::interval(INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let stats = tracker.snapshot();
                if stats.completed() > 0 {
                    info!(
                        processed = stats.processed_files,
                        failed = stats.failed_files,
                        skipped = stats.skipped_files,
                        bytes_processed = stats.processed_bytes,
                        rate_mbps = format_args!("{:.2}", stats.bytes_per_sec / (1024.0 * 1024.0)),
                        "upload progress"
                    );
                }
            }
        }
    }
}
