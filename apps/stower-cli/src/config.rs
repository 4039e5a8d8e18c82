//! Task manifest loading and validation.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;

use stower_upload::{TaskSpec, UploadOptions};

/// Log sink configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace` | `debug` | `info` | `warn` | `error`.
    pub level: String,
    /// `text` (default) or `json`.
    pub format: String,
    /// Log file path; stderr when unset.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            file: None,
        }
    }
}

/// The whole manifest: logging, upload options and the task list.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub options: UploadOptions,
    #[serde(default)]
    pub upload_tasks: Vec<TaskSpec>,
}

impl Config {
    /// Loads and validates a manifest from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path.display()))?;
        let config: Config = serde_json::from_str(&data)
            .with_context(|| format!("parsing configuration file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.options.parallel_uploads < 1 {
            bail!("options.parallel_uploads must be at least 1");
        }
        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => bail!("logging.format must be `text` or `json`, got `{other}`"),
        }
        for task in &self.upload_tasks {
            if task.name.is_empty() {
                bail!("every upload task needs a name");
            }
            if task.bucket.is_empty() {
                bail!("task `{}` has no bucket", task.name);
            }
            if task.source.as_os_str().is_empty() {
                bail!("task `{}` has no source", task.name);
            }
        }
        Ok(())
    }

    /// Distinct buckets referenced by enabled tasks, for `--check`.
    pub fn buckets(&self) -> Vec<&str> {
        let mut buckets: Vec<&str> = self
            .upload_tasks
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.bucket.as_str())
            .collect();
        buckets.sort_unstable();
        buckets.dedup();
        buckets
    }
}
