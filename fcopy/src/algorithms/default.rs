//! Fast copy path: kernel range copy with a chunked read/write fallback

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::copy_file_range;
use tracing::{debug, warn};

use crate::algorithm::{AlgorithmDescriptor, CopyAlgorithm, ProgressTracker};
use crate::error::{CopyError, Result};
use crate::fsutil;
use crate::observer::ProgressObserver;

/// Fixed buffer size for the chunked fallback path
pub const CHUNK_SIZE: usize = 512 * 1024;

const DEST_MODE: u32 = 0o644;

enum RangeCopy {
    Done,
    Fallback,
}

/// Errnos that mean the kernel range copy is unusable for this pair of
/// descriptors rather than a real I/O failure
fn range_should_fall_back(errno: Errno) -> bool {
    matches!(errno, Errno::ENOSYS | Errno::EXDEV | Errno::EINVAL | Errno::EBADF)
}

/// Two-tier copy algorithm: `copy_file_range` first, 512 KiB chunked
/// read/write when the kernel path is rejected.
pub struct DefaultAlgorithm {
    tracker: ProgressTracker,
    range_enabled: bool,
}

impl Default for DefaultAlgorithm {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultAlgorithm {
    pub fn new() -> Self {
        Self {
            tracker: ProgressTracker::default(),
            range_enabled: true,
        }
    }

    /// Skip the kernel range path entirely; every file goes through the
    /// chunked loop. Used on filesystems that misreport range-copy support
    /// and by tests exercising the fallback.
    pub fn chunked_only() -> Self {
        Self {
            tracker: ProgressTracker::default(),
            range_enabled: false,
        }
    }

    /// Registry entry for the task manager
    pub fn descriptor() -> AlgorithmDescriptor {
        AlgorithmDescriptor {
            name: "default".to_string(),
            supports_pause: true,
            factory: std::sync::Arc::new(|| Box::new(DefaultAlgorithm::new())),
        }
    }

    fn copy_file_internal(&mut self, source: &Path, dest: &Path, observer: &dyn ProgressObserver) -> Result<()> {
        if observer.should_stop() {
            return Err(CopyError::Stopped);
        }

        observer.on_file_start(source);
        if observer.should_stop() {
            return Err(CopyError::Stopped);
        }

        let result = self.copy_once(source, dest, observer);
        match &result {
            Ok(()) => observer.on_file_complete(source),
            Err(CopyError::Stopped) => {}
            Err(e) => observer.on_error(&format!(
                "Failed to copy {} to {}: {}",
                source.display(),
                dest.display(),
                e
            )),
        }
        result
    }

    fn copy_once(&mut self, source: &Path, dest: &Path, observer: &dyn ProgressObserver) -> Result<()> {
        if self.range_enabled {
            match self.copy_range(source, dest, observer)? {
                RangeCopy::Done => return Ok(()),
                RangeCopy::Fallback => {
                    debug!(?source, "copy_file_range rejected, falling back to chunked copy");
                }
            }
        }
        self.copy_chunked(source, dest, observer)
    }

    fn copy_range(&mut self, source: &Path, dest: &Path, observer: &dyn ProgressObserver) -> Result<RangeCopy> {
        // Open failures here are not final: the chunked path retries the
        // opens and reports the real error with context.
        let Ok(src) = File::open(source) else {
            return Ok(RangeCopy::Fallback);
        };
        let dst = match OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(DEST_MODE)
            .open(dest)
        {
            Ok(f) => f,
            Err(_) => return Ok(RangeCopy::Fallback),
        };
        let Ok(meta) = src.metadata() else {
            return Ok(RangeCopy::Fallback);
        };

        let total = meta.len();
        let mut copied = 0u64;

        while copied < total {
            if observer.should_pause() {
                observer.wait_while_paused();
            }
            if observer.should_stop() {
                return Err(CopyError::Stopped);
            }

            let remaining = (total - copied) as usize;
            match copy_file_range(&src, None, &dst, None, remaining) {
                Ok(0) => {
                    // Source shrank under us
                    drop(dst);
                    fsutil::remove_incomplete(dest);
                    return Err(CopyError::io(
                        source,
                        io::Error::new(io::ErrorKind::UnexpectedEof, "source truncated during copy"),
                    ));
                }
                Ok(n) => {
                    copied += n as u64;
                    self.tracker.advance(n as u64, observer);
                }
                // Only a first-call rejection may fall back: once bytes have
                // flowed, restarting the file would double-count progress.
                Err(errno) if copied == 0 && range_should_fall_back(errno) => {
                    drop(dst);
                    fsutil::remove_incomplete(dest);
                    return Ok(RangeCopy::Fallback);
                }
                Err(errno) => {
                    warn!(?source, %errno, "copy_file_range failed permanently");
                    drop(dst);
                    fsutil::remove_incomplete(dest);
                    return Err(CopyError::io(dest, io::Error::from(errno)));
                }
            }
        }

        Ok(RangeCopy::Done)
    }

    fn copy_chunked(&mut self, source: &Path, dest: &Path, observer: &dyn ProgressObserver) -> Result<()> {
        let mut src = File::open(source).map_err(|e| CopyError::io(source, e))?;
        let mut dst = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(DEST_MODE)
            .open(dest)
            .map_err(|e| CopyError::io(dest, e))?;

        let total = src.metadata().map_err(|e| CopyError::io(source, e))?.len();
        let mut copied = 0u64;
        let mut buf = vec![0u8; CHUNK_SIZE];

        while copied < total {
            if observer.should_pause() {
                observer.wait_while_paused();
            }
            if observer.should_stop() {
                return Err(CopyError::Stopped);
            }

            let want = CHUNK_SIZE.min((total - copied) as usize);
            let n = match src.read(&mut buf[..want]) {
                Ok(0) => {
                    drop(dst);
                    fsutil::remove_incomplete(dest);
                    return Err(CopyError::io(
                        source,
                        io::Error::new(io::ErrorKind::UnexpectedEof, "source truncated during copy"),
                    ));
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    drop(dst);
                    fsutil::remove_incomplete(dest);
                    return Err(CopyError::io(source, e));
                }
            };

            let mut written = 0usize;
            while written < n {
                if observer.should_stop() {
                    return Err(CopyError::Stopped);
                }
                match dst.write(&buf[written..n]) {
                    Ok(w) => written += w,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        drop(dst);
                        fsutil::remove_incomplete(dest);
                        return Err(CopyError::io(dest, e));
                    }
                }
            }

            copied += n as u64;
            self.tracker.advance(n as u64, observer);
        }

        Ok(())
    }

    fn copy_dir_recursive(&mut self, source: &Path, dest: &Path, observer: &dyn ProgressObserver) -> Result<()> {
        let mut entries: Vec<_> = std::fs::read_dir(source)
            .map_err(|e| CopyError::io(source, e))?
            .collect::<io::Result<_>>()
            .map_err(|e| CopyError::io(source, e))?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            if observer.should_stop() {
                return Err(CopyError::Stopped);
            }

            let src_path = entry.path();
            let dst_path = dest.join(entry.file_name());
            let ftype = entry.file_type().map_err(|e| CopyError::io(&src_path, e))?;

            if ftype.is_file() {
                self.copy_file_internal(&src_path, &dst_path, observer)?;
            } else if ftype.is_dir() {
                fsutil::ensure_dir_exists(&dst_path).map_err(|e| {
                    observer.on_error(&format!("Failed to create directory: {}", dst_path.display()));
                    CopyError::io(&dst_path, e)
                })?;
                self.copy_dir_recursive(&src_path, &dst_path, observer)?;
            }
            // Other entry kinds (symlinks, sockets) are skipped
        }
        Ok(())
    }
}

impl CopyAlgorithm for DefaultAlgorithm {
    fn copy_file(&mut self, source: &Path, dest: &Path, observer: &dyn ProgressObserver) -> Result<()> {
        if observer.should_stop() {
            return Err(CopyError::Stopped);
        }
        let size = fsutil::calculate_total_size(source).map_err(|e| CopyError::io(source, e))?;
        self.tracker.begin_file(size);
        self.copy_file_internal(source, dest, observer)
    }

    fn copy_directory(&mut self, source: &Path, dest: &Path, observer: &dyn ProgressObserver) -> Result<()> {
        if observer.should_stop() {
            return Err(CopyError::Stopped);
        }

        let total = fsutil::calculate_total_size(source).map_err(|e| {
            observer.on_error("Failed to calculate directory size");
            CopyError::io(source, e)
        })?;
        self.tracker.begin_tree(total);

        let result = fsutil::ensure_dir_exists(dest)
            .map_err(|e| {
                observer.on_error("Failed to create directory structure");
                CopyError::io(dest, e)
            })
            .and_then(|()| self.copy_dir_recursive(source, dest, observer));

        self.tracker.end_tree();
        result
    }

    fn calculate_total_size(&self, path: &Path) -> Result<u64> {
        fsutil::calculate_total_size(path).map_err(|e| CopyError::io(path, e))
    }

    fn supports_pause(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "default"
    }
}
