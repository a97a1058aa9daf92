//! Copy algorithm contract and shared progress accounting

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::observer::ProgressObserver;

/// A concrete strategy for moving bytes from source to destination.
///
/// Algorithms are stateful: one instance serves one task, accumulating
/// tree-wide progress during a directory copy. They never mutate task state;
/// they only report through the observer and return success or failure.
pub trait CopyAlgorithm: Send {
    /// Copy a single file. Outside of a directory copy this resets progress
    /// accounting to the size of this one file.
    fn copy_file(&mut self, source: &Path, dest: &Path, observer: &dyn ProgressObserver) -> Result<()>;

    /// Recursively copy a directory tree. The destination directory is
    /// created first; progress accumulates across the whole tree.
    fn copy_directory(&mut self, source: &Path, dest: &Path, observer: &dyn ProgressObserver) -> Result<()>;

    /// Total bytes the operation will move
    fn calculate_total_size(&self, path: &Path) -> Result<u64>;

    /// Whether pause/resume is honored mid-file
    fn supports_pause(&self) -> bool;

    /// Human-readable algorithm name
    fn name(&self) -> &str;
}

/// Constructor for a registered algorithm; each task gets a fresh instance
pub type AlgorithmFactory = Arc<dyn Fn() -> Box<dyn CopyAlgorithm> + Send + Sync>;

/// Registry entry describing an algorithm
#[derive(Clone)]
pub struct AlgorithmDescriptor {
    pub name: String,
    pub supports_pause: bool,
    pub factory: AlgorithmFactory,
}

impl std::fmt::Debug for AlgorithmDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmDescriptor")
            .field("name", &self.name)
            .field("supports_pause", &self.supports_pause)
            .finish()
    }
}

/// Cumulative byte accounting shared by the concrete algorithms.
///
/// In tree mode `copied` spans the whole directory; for a standalone file it
/// is reset to that file's size.
#[derive(Debug, Default)]
pub(crate) struct ProgressTracker {
    total: u64,
    copied: u64,
    tree_mode: bool,
}

impl ProgressTracker {
    /// Reset accounting for a standalone file copy
    pub fn begin_file(&mut self, total: u64) {
        if !self.tree_mode {
            self.total = total;
            self.copied = 0;
        }
    }

    /// Enter tree mode with the pre-computed tree total
    pub fn begin_tree(&mut self, total: u64) {
        self.tree_mode = true;
        self.total = total;
        self.copied = 0;
    }

    pub fn end_tree(&mut self) {
        self.tree_mode = false;
    }

    /// Record `n` freshly copied bytes and report to the observer
    pub fn advance(&mut self, n: u64, observer: &dyn ProgressObserver) {
        self.copied += n;
        observer.on_progress(self.copied, self.total);
    }
}
