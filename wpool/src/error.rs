//! Error types for the worker pool

use thiserror::Error;

use crate::commands::ErrorKind;

/// Errors produced by connections, the scheduler and jobs
#[derive(Debug, Error)]
pub enum PoolError {
    /// A job-level error with its stable wire kind
    #[error("{kind:?}: {message}")]
    Job { kind: ErrorKind, message: String },

    /// Inbound frame exceeded the payload guard
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(u64),

    /// Peer sent a command code outside the contract
    #[error("unknown command code: {0}")]
    UnknownCommand(u16),

    /// The connection is closed
    #[error("connection closed")]
    Disconnected,

    /// Worker process could not be launched or never connected back
    #[error("worker launch failed: {0}")]
    Launch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("payload decode failed: {0}")]
    Payload(#[from] serde_json::Error),
}

impl PoolError {
    pub fn job(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Job {
            kind,
            message: message.into(),
        }
    }

    /// The wire error kind this error maps to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Job { kind, .. } => *kind,
            Self::Disconnected => ErrorKind::CannotConnect,
            Self::Launch(_) => ErrorKind::CannotConnect,
            Self::UnknownCommand(_) => ErrorKind::UnsupportedAction,
            Self::Io(e) => ErrorKind::from(e),
            Self::FrameTooLarge(_) | Self::Payload(_) => ErrorKind::Unknown,
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_kind_preserved() {
        let err = PoolError::job(ErrorKind::WorkerDied, "gone");
        assert_eq!(err.kind(), ErrorKind::WorkerDied);
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_io_error_classified() {
        let err = PoolError::from(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no"));
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[test]
    fn test_disconnected_maps_to_cannot_connect() {
        assert_eq!(PoolError::Disconnected.kind(), ErrorKind::CannotConnect);
    }
}
