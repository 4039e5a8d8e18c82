//! Text rendering of the run report.

use std::fmt::Write;
use std::time::Duration;

use stower_upload::RunReport;

/// Failed files listed per task before truncating.
const MAX_FAILED_LINES: usize = 5;

/// Renders the report as a plain-text summary.
pub fn render(report: &RunReport) -> String {
    let mut out = String::new();
    let rule = "=".repeat(60);

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "UPLOAD RUN REPORT");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "Mode: {}",
        if report.dry_run { "DRY RUN (no files were uploaded)" } else { "LIVE" }
    );
    let _ = writeln!(out, "Duration: {}", format_duration(report.duration));
    let _ = writeln!(
        out,
        "Started: {}",
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(
        out,
        "Finished: {}",
        report.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Tasks: {} total, {} succeeded, {} failed, {} skipped",
        report.total_tasks, report.success_tasks, report.failed_tasks, report.skipped_tasks
    );

    for (i, task) in report.tasks.iter().enumerate() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}. {}", i + 1, task.name);
        let _ = writeln!(out, "   Duration: {}", format_duration(task.duration));
        let _ = writeln!(
            out,
            "   Files: {} total ({} success, {} failed, {} skipped)",
            task.total_files, task.success_files, task.failed_files, task.skipped_files
        );
        let _ = writeln!(out, "   Transferred: {}", format_bytes(task.total_bytes));

        if let Some(error) = &task.error {
            let _ = writeln!(out, "   Error: {error}");
        }

        if task.failed_files > 0 {
            let _ = writeln!(out, "   Failed files:");
            let mut listed = 0;
            for result in &task.results {
                if result.success {
                    continue;
                }
                let _ = writeln!(
                    out,
                    "     - {}: {}",
                    result.source.display(),
                    result.error.as_deref().unwrap_or("unknown error")
                );
                listed += 1;
                if listed >= MAX_FAILED_LINES && task.failed_files > MAX_FAILED_LINES {
                    let _ = writeln!(
                        out,
                        "     ... and {} more",
                        task.failed_files - MAX_FAILED_LINES
                    );
                    break;
                }
            }
        }
    }

    let _ = writeln!(out, "{rule}");
    out
}

/// `1536 -> "1.50 KB"`, and so on up through GB.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// `95s -> "1m35s"`, `3700s -> "1h1m"`.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    if total < 60 {
        format!("{total}s")
    } else if total < 3600 {
        format!("{}m{}s", total / 60, total % 60)
    } else {
        format!("{}h{}m", total / 3600, (total % 3600) / 60)
    }
}
