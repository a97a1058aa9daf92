//! Optional lifecycle callbacks for copy tasks
//!
//! Hooks run on the thread that drives the transition: start/pause/resume on
//! the caller's thread, complete/error on the worker thread. Implementations
//! must not block.

use tracing::info;

/// Lifecycle callbacks; every method defaults to a no-op
pub trait TaskHooks: Send + Sync {
    fn on_task_start(&self) {}
    fn on_task_pause(&self) {}
    fn on_task_resume(&self) {}
    fn on_task_complete(&self) {}
    fn on_task_error(&self, _message: &str) {}
}

/// Hooks implementation that logs each lifecycle edge
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl TaskHooks for LoggingHooks {
    fn on_task_start(&self) {
        info!("task started");
    }

    fn on_task_pause(&self) {
        info!("task paused");
    }

    fn on_task_resume(&self) {
        info!("task resumed");
    }

    fn on_task_complete(&self) {
        info!("task completed");
    }

    fn on_task_error(&self, message: &str) {
        info!(message, "task failed");
    }
}
