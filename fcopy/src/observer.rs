//! Observer contract between copy algorithms and their driver
//!
//! Algorithms report progress and per-file lifecycle through this trait and
//! sample it for pause/stop requests at every chunk boundary. The worker
//! implements it on top of its pause latch; library users copying without a
//! task can pass [`NullObserver`].

use std::path::Path;

/// Receives progress callbacks from a running algorithm and answers its
/// pause/stop queries.
///
/// `copied` is cumulative for the whole operation: during a directory copy it
/// accumulates across the entire tree, not per file.
pub trait ProgressObserver: Send + Sync {
    /// Overall progress update after a successful chunk or range step
    fn on_progress(&self, copied: u64, total: u64);

    /// Copying of one file is about to begin
    fn on_file_start(&self, path: &Path);

    /// One file finished successfully
    fn on_file_complete(&self, path: &Path);

    /// Terminal error for the current file; the algorithm returns failure
    fn on_error(&self, message: &str);

    /// Sampled at every chunk boundary and between files
    fn should_stop(&self) -> bool;

    /// Sampled at every chunk boundary and between files
    fn should_pause(&self) -> bool;

    /// Block the calling thread until resume or stop; must return promptly
    /// once the state becomes stopped
    fn wait_while_paused(&self);
}

/// Observer that ignores every callback and never pauses or stops
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ProgressObserver for NullObserver {
    fn on_progress(&self, _copied: u64, _total: u64) {}
    fn on_file_start(&self, _path: &Path) {}
    fn on_file_complete(&self, _path: &Path) {}
    fn on_error(&self, _message: &str) {}

    fn should_stop(&self) -> bool {
        false
    }

    fn should_pause(&self) -> bool {
        false
    }

    fn wait_while_paused(&self) {}
}
