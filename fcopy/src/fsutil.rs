//! Filesystem helpers shared by the copy algorithms and the worker

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Total byte size of a file, or the recursive sum of regular files under a
/// directory. Symlinks are not followed.
pub fn calculate_total_size(path: &Path) -> io::Result<u64> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_file() {
        return Ok(meta.len());
    }

    let mut total = 0u64;
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(io::Error::other)?.len();
        }
    }
    debug!(?path, total, "calculate_total_size: directory walked");
    Ok(total)
}

/// Create a directory and any missing parents
pub fn ensure_dir_exists(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Remove a partially written destination file.
///
/// A missing file is not an error; anything else is logged and swallowed so
/// cleanup never masks the original failure.
pub fn remove_incomplete(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(?path, "remove_incomplete: removed partial file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(?path, error = %e, "remove_incomplete: failed to remove partial file"),
    }
}
