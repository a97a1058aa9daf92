//! Durability-biased copy path: synchronous writes and dynamic chunk sizing
//!
//! The destination is opened with `O_SYNC` so every write reaches the device
//! before the next chunk is read, and the chunk size is picked per file from
//! the configured tier table. Pausing flushes and closes the destination and
//! reopens it in append mode on resume, so a crash while paused leaves a
//! fully synced prefix on disk.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::fcntl::OFlag;
use nix::unistd::syncfs;
use tracing::{debug, warn};

use crate::algorithm::{AlgorithmDescriptor, CopyAlgorithm, ProgressTracker};
use crate::config::ChunkTiers;
use crate::error::{CopyError, Result};
use crate::fsutil;
use crate::observer::ProgressObserver;

const DEST_MODE: u32 = 0o644;

/// Synchronous-write copy algorithm with tiered chunk sizes
pub struct SyncAlgorithm {
    tracker: ProgressTracker,
    tiers: ChunkTiers,
}

impl Default for SyncAlgorithm {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncAlgorithm {
    pub fn new() -> Self {
        Self::with_tiers(ChunkTiers::default())
    }

    pub fn with_tiers(tiers: ChunkTiers) -> Self {
        Self {
            tracker: ProgressTracker::default(),
            tiers,
        }
    }

    /// Registry entry for the task manager
    pub fn descriptor() -> AlgorithmDescriptor {
        AlgorithmDescriptor {
            name: "sync".to_string(),
            supports_pause: true,
            factory: std::sync::Arc::new(|| Box::new(SyncAlgorithm::new())),
        }
    }

    fn open_dest(dest: &Path, append: bool) -> io::Result<File> {
        let mut opts = OpenOptions::new();
        opts.write(true).custom_flags(OFlag::O_SYNC.bits()).mode(DEST_MODE);
        if append {
            opts.append(true);
        } else {
            opts.create(true).truncate(true);
        }
        opts.open(dest)
    }

    /// Flush the filesystem holding `file` to stable storage
    fn sync_to_disk(file: &File, path: &Path) {
        if let Err(errno) = syncfs(file) {
            warn!(?path, %errno, "syncfs failed");
        }
    }

    /// Sync the destination after a completed file or directory
    fn sync_path(path: &Path) {
        if let Ok(file) = File::open(path) {
            Self::sync_to_disk(&file, path);
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

        let result = self.copy_chunked(source, dest, observer);
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

    fn copy_chunked(&mut self, source: &Path, dest: &Path, observer: &dyn ProgressObserver) -> Result<()> {
        let mut src = File::open(source).map_err(|e| CopyError::io(source, e))?;
        let mut dst = Self::open_dest(dest, false).map_err(|e| CopyError::io(dest, e))?;

        let total = src.metadata().map_err(|e| CopyError::io(source, e))?.len();
        let chunk_size = self.tiers.chunk_size_for(total);
        debug!(?source, total, chunk_size, "sync copy starting");

        let mut copied = 0u64;
        let mut buf = vec![0u8; chunk_size];

        while copied < total {
            if observer.should_pause() {
                // Flush what we have, release the descriptor for the pause,
                // then continue where the synced prefix ends.
                Self::sync_to_disk(&dst, dest);
                drop(dst);
                observer.wait_while_paused();
                if observer.should_stop() {
                    return Err(CopyError::Stopped);
                }
                dst = Self::open_dest(dest, true).map_err(|e| CopyError::io(dest, e))?;
            }
            if observer.should_stop() {
                return Err(CopyError::Stopped);
            }

            let want = chunk_size.min((total - copied) as usize);
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
        }
        Ok(())
    }
}

impl CopyAlgorithm for SyncAlgorithm {
    fn copy_file(&mut self, source: &Path, dest: &Path, observer: &dyn ProgressObserver) -> Result<()> {
        if observer.should_stop() {
            return Err(CopyError::Stopped);
        }
        let size = fsutil::calculate_total_size(source).map_err(|e| CopyError::io(source, e))?;
        self.tracker.begin_file(size);

        let result = self.copy_file_internal(source, dest, observer);
        if result.is_ok() {
            Self::sync_path(dest);
        }
        result
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
        if result.is_ok() {
            Self::sync_path(dest);
        }
        result
    }

    fn calculate_total_size(&self, path: &Path) -> Result<u64> {
        fsutil::calculate_total_size(path).map_err(|e| CopyError::io(path, e))
    }

    fn supports_pause(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "sync"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NullObserver;
    use crate::observer::test_support::RecordingObserver;
    use std::fs;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn write_patterned(path: &Path, len: usize) {
        let data: Vec<u8> = (0..len).map(|i| (i % 113) as u8).collect();
        fs::write(path, data).unwrap();
    }

    #[test]
    fn test_sync_copy_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.bin");
        let dst = tmp.path().join("dst.bin");
        write_patterned(&src, 200_000);

        let mut algo = SyncAlgorithm::new();
        algo.copy_file(&src, &dst, &NullObserver).unwrap();

        assert_eq!(fs::read(&src).unwrap(), fs::read(&dst).unwrap());
    }

    #[test]
    fn test_sync_copy_directory() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(src.join("nested")).unwrap();
        write_patterned(&src.join("a"), 5_000);
        write_patterned(&src.join("nested/b"), 7_000);

        let obs = RecordingObserver::new();
        let mut algo = SyncAlgorithm::new();
        algo.copy_directory(&src, &dst, &obs).unwrap();

        assert_eq!(fs::read(dst.join("a")).unwrap(), fs::read(src.join("a")).unwrap());
        assert_eq!(fs::read(dst.join("nested/b")).unwrap(), fs::read(src.join("nested/b")).unwrap());
        assert_eq!(*obs.progress.lock().unwrap().last().unwrap(), (12_000, 12_000));
    }

    /// Pause observer that pauses exactly once, mid-file, and records that
    /// the wait actually happened.
    #[derive(Default)]
    struct PauseOnceObserver {
        progress_seen: AtomicUsize,
        paused: AtomicBool,
        waits: AtomicUsize,
    }

    impl ProgressObserver for PauseOnceObserver {
        fn on_progress(&self, _copied: u64, _total: u64) {
            if self.progress_seen.fetch_add(1, Ordering::SeqCst) == 0 {
                self.paused.store(true, Ordering::SeqCst);
            }
        }
        fn on_file_start(&self, _path: &Path) {}
        fn on_file_complete(&self, _path: &Path) {}
        fn on_error(&self, _message: &str) {}
        fn should_stop(&self) -> bool {
            false
        }
        fn should_pause(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
        }
        fn wait_while_paused(&self) {
            self.waits.fetch_add(1, Ordering::SeqCst);
            self.paused.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_pause_reopens_in_append_mode_and_data_survives() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.bin");
        let dst = tmp.path().join("dst.bin");
        // Several small-tier chunks so the pause lands mid-file
        write_patterned(&src, 300_000);

        let obs = PauseOnceObserver::default();
        let mut algo = SyncAlgorithm::new();
        algo.copy_file(&src, &dst, &obs).unwrap();

        assert_eq!(obs.waits.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read(&src).unwrap(), fs::read(&dst).unwrap());
    }

    #[test]
    fn test_stop_mid_file_leaves_partial_for_worker_cleanup() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.bin");
        let dst = tmp.path().join("dst.bin");
        write_patterned(&src, 500_000);

        let obs = RecordingObserver::stop_after(1);
        let mut algo = SyncAlgorithm::new();
        let err = algo.copy_file(&src, &dst, &obs).unwrap_err();

        assert!(err.is_stopped());
        assert!(dst.exists());
        let partial = fs::metadata(&dst).unwrap().len();
        assert!(partial < 500_000);
    }

    #[test]
    fn test_chunk_size_follows_tiers() {
        let tiers = ChunkTiers::default();
        // Small file gets the small chunk
        assert_eq!(tiers.chunk_size_for(1_000_000), 64 * 1024);
    }

    #[test]
    fn test_supports_pause_and_name() {
        let algo = SyncAlgorithm::new();
        assert!(algo.supports_pause());
        assert_eq!(algo.name(), "sync");
    }
}
