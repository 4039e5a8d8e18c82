//! Filesystem walking.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::{ExcludePatterns, FileRef, ScanError};

/// Walks directories and stats single files, applying exclusion patterns.
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    exclude: ExcludePatterns,
}

impl Scanner {
    pub fn new(exclude: ExcludePatterns) -> Self {
        Self { exclude }
    }

    /// Scans `root` and returns one [`FileRef`] per regular file found.
    ///
    /// `root` must be an existing directory. In non-recursive mode only
    /// its immediate regular-file children are produced. Excluded
    /// directories are pruned without descending; entries that fail to
    /// stat are logged and skipped.
    pub fn scan(&self, root: &Path, recursive: bool) -> Result<Vec<FileRef>, ScanError> {
        let meta = fs::metadata(root).map_err(|e| ScanError::io(root, e))?;
        if !meta.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }
        let root = root.canonicalize().map_err(|e| ScanError::io(root, e))?;

        let mut files = Vec::new();
        if recursive {
            self.walk(&root, &root, &mut files);
        } else {
            self.scan_flat(&root, &mut files);
        }
        debug!(
            root = %root.display(),
            files = files.len(),
            recursive,
            "scan complete"
        );
        Ok(files)
    }

    /// Stats a single regular file.
    pub fn stat(&self, path: &Path) -> Result<FileRef, ScanError> {
        let meta = fs::metadata(path).map_err(|e| ScanError::io(path, e))?;
        if meta.is_dir() {
            return Err(ScanError::NotAFile(path.to_path_buf()));
        }
        let path = path.canonicalize().map_err(|e| ScanError::io(path, e))?;
        let relative_path = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(FileRef {
            path,
            size: meta.len(),
            relative_path,
        })
    }

    fn walk(&self, root: &Path, dir: &Path, files: &mut Vec<FileRef>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "skipping unreadable directory");
                return;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping entry without metadata");
                    continue;
                }
            };

            if meta.is_dir() {
                if self.exclude.matches(&path) {
                    debug!(path = %path.display(), "pruning excluded directory");
                    continue;
                }
                self.walk(root, &path, files);
            } else if meta.is_file() {
                if self.exclude.matches(&path) {
                    debug!(path = %path.display(), "excluding file");
                    continue;
                }
                if let Some(file) = make_file_ref(root, &path, meta.len()) {
                    files.push(file);
                }
            }
        }
    }

    fn scan_flat(&self, root: &Path, files: &mut Vec<FileRef>) {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %root.display(), error = %e, "skipping unreadable directory");
                return;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(path = %root.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping entry without metadata");
                    continue;
                }
            };
            if !meta.is_file() || self.exclude.matches(&path) {
                continue;
            }
            if let Some(file) = make_file_ref(root, &path, meta.len()) {
                files.push(file);
            }
        }
    }
}

fn make_file_ref(root: &Path, path: &Path, size: u64) -> Option<FileRef> {
    let relative = match path.strip_prefix(root) {
        Ok(rel) => rel,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "entry outside scan root");
            return None;
        }
    };
    let relative_path = relative.to_string_lossy().replace('\\', "/");
    Some(FileRef {
        path: path.to_path_buf(),
        size,
        relative_path,
    })
}
