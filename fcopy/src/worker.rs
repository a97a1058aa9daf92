//! Worker-thread driver for a single copy operation
//!
//! The worker owns the pause/stop latch that algorithms sample through the
//! [`ProgressObserver`] interface and forwards algorithm callbacks to a
//! [`WorkerEvents`] sink owned by the task. The worker never blocks in I/O
//! indefinitely; cancellation is detected at the next chunk boundary.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

use tracing::debug;

use crate::algorithm::CopyAlgorithm;
use crate::error::CopyError;
use crate::fsutil;
use crate::observer::ProgressObserver;

/// Execution state of a copy worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Paused,
    Stopped,
}

/// Mutex + condition-variable pair gating the algorithm's chunk loop.
///
/// `stop` wins over `pause`: a stopped latch wakes any paused waiter and
/// stays stopped.
#[derive(Debug)]
pub struct PauseLatch {
    state: Mutex<WorkerState>,
    cond: Condvar,
}

impl Default for PauseLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseLatch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState::Running),
            cond: Condvar::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap()
    }

    /// Request a pause; only effective while running
    pub fn pause(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state == WorkerState::Running {
            *state = WorkerState::Paused;
            true
        } else {
            false
        }
    }

    /// Resume from a pause; only effective while paused
    pub fn resume(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state == WorkerState::Paused {
            *state = WorkerState::Running;
            self.cond.notify_all();
            true
        } else {
            false
        }
    }

    /// Request a stop; wakes a paused worker
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        *state = WorkerState::Stopped;
        self.cond.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.state() == WorkerState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == WorkerState::Stopped
    }

    /// Block while paused; returns promptly when resumed or stopped
    pub fn wait_while_paused(&self) {
        let mut state = self.state.lock().unwrap();
        while *state == WorkerState::Paused {
            state = self.cond.wait(state).unwrap();
        }
    }
}

/// Callback sink for worker events, implemented by the owning task.
///
/// Calls arrive on the worker thread; exactly one of `completed`, `stopped`
/// or `failed` terminates a run.
pub trait WorkerEvents: Send + Sync {
    fn progress(&self, copied: u64, total: u64, current: &Path);
    fn file_started(&self, path: &Path);
    fn file_completed(&self, path: &Path);
    fn completed(&self);
    fn stopped(&self);
    fn failed(&self, message: &str);
}

/// Runs one algorithm invocation on the current thread and mediates between
/// the latch, the algorithm and the event sink.
pub struct CopyWorker {
    latch: Arc<PauseLatch>,
    sink: Arc<dyn WorkerEvents>,
    /// Source path of the file currently in flight; cleared on completion so
    /// stop cleanup never touches a finished file
    current_source: Mutex<Option<PathBuf>>,
    error_message: Mutex<Option<String>>,
}

impl CopyWorker {
    pub fn new(latch: Arc<PauseLatch>, sink: Arc<dyn WorkerEvents>) -> Self {
        Self {
            latch,
            sink,
            current_source: Mutex::new(None),
            error_message: Mutex::new(None),
        }
    }

    /// Copy `source` to `dest` with the given algorithm and emit the final
    /// outcome. Chooses file vs directory by inspecting the source.
    pub fn run(&self, source: &Path, dest: &Path, algorithm: &mut dyn CopyAlgorithm) {
        debug!(?source, ?dest, algorithm = algorithm.name(), "CopyWorker::run");

        let meta = match fs::symlink_metadata(source) {
            Ok(meta) => meta,
            Err(e) => {
                self.sink.failed(&CopyError::io(source, e).to_string());
                return;
            }
        };

        let result = if meta.is_file() {
            algorithm.copy_file(source, dest, self)
        } else if meta.is_dir() {
            algorithm.copy_directory(source, dest, self)
        } else {
            self.sink.failed(&CopyError::InvalidSource(source.to_path_buf()).to_string());
            return;
        };

        if self.latch.is_stopped() || matches!(result, Err(CopyError::Stopped)) {
            self.cleanup_incomplete(source, dest);
            self.sink.stopped();
            return;
        }

        match result {
            Ok(()) => self.sink.completed(),
            Err(e) => {
                // Prefer the algorithm's own error text when it reported one
                let message = self
                    .error_message
                    .lock()
                    .unwrap()
                    .take()
                    .unwrap_or_else(|| e.to_string());
                self.sink.failed(&message);
            }
        }
    }

    /// Remove the partially written destination of the in-flight file, if any
    fn cleanup_incomplete(&self, source_root: &Path, dest_root: &Path) {
        let current = self.current_source.lock().unwrap().clone();
        let Some(current) = current else { return };

        let dest = if current == source_root {
            dest_root.to_path_buf()
        } else if let Ok(rel) = current.strip_prefix(source_root) {
            dest_root.join(rel)
        } else {
            return;
        };
        fsutil::remove_incomplete(&dest);
    }
}

impl ProgressObserver for CopyWorker {
    fn on_progress(&self, copied: u64, total: u64) {
        let current = self.current_source.lock().unwrap().clone().unwrap_or_default();
        self.sink.progress(copied, total, &current);
    }

    fn on_file_start(&self, path: &Path) {
        // Honor a pause that landed between files before announcing the next
        self.latch.wait_while_paused();
        if self.latch.is_stopped() {
            return;
        }
        *self.current_source.lock().unwrap() = Some(path.to_path_buf());
        self.sink.file_started(path);
    }

    fn on_file_complete(&self, path: &Path) {
        *self.current_source.lock().unwrap() = None;
        self.sink.file_completed(path);
    }

    fn on_error(&self, message: &str) {
        *self.error_message.lock().unwrap() = Some(message.to_string());
    }

    fn should_stop(&self) -> bool {
        self.latch.is_stopped()
    }

    fn should_pause(&self) -> bool {
        self.latch.is_paused()
    }

    fn wait_while_paused(&self) {
        self.latch.wait_while_paused();
    }
}
