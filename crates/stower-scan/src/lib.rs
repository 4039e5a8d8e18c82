//! Directory scanning with pattern-based exclusion.
//!
//! [`Scanner::scan`] walks a directory tree and yields one [`FileRef`] per
//! regular file, pruning anything the exclusion patterns match. Per-entry
//! I/O errors are logged and skipped so one unreadable entry cannot abort
//! a bulk upload.

mod pattern;
mod scanner;

pub use pattern::ExcludePatterns;
pub use scanner::Scanner;

use std::path::PathBuf;

/// An identified source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Canonical absolute path.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Path relative to the scanned root, `/`-separated.
    pub relative_path: String,
}

/// Errors produced while scanning.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("not a file: {0}")]
    NotAFile(PathBuf),

    #[error("invalid exclude pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
