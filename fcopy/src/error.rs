//! Error types for the copy engine

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by copy algorithms, workers and the task manager
#[derive(Debug, Error)]
pub enum CopyError {
    /// I/O failure on a specific path
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The copy was stopped cooperatively; not a failure of the data path
    #[error("copy stopped")]
    Stopped,

    /// Another task is already active
    #[error("another task is already active")]
    Busy,

    /// No algorithm registered under this name
    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    /// The source path is neither a regular file nor a directory
    #[error("source is neither a file nor a directory: {0}")]
    InvalidSource(PathBuf),

    /// The task is not managed by this manager
    #[error("task is not registered with this manager")]
    UnknownTask,
}

impl CopyError {
    /// Attach a path to a raw I/O error
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the error represents cooperative cancellation
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, CopyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_carries_path() {
        let err = CopyError::io("/tmp/foo", std::io::Error::other("boom"));
        let text = err.to_string();
        assert!(text.contains("/tmp/foo"));
        assert!(!err.is_stopped());
    }

    #[test]
    fn test_stopped_is_stopped() {
        assert!(CopyError::Stopped.is_stopped());
        assert!(!CopyError::Busy.is_stopped());
    }
}
