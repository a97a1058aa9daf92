//! Task executors run inside a slave
//!
//! The slave looks up an executor by the task's `task_type`; execution is
//! async and reports progress through a [`ProgressSink`]. Two executors ship
//! built in: a copy executor driving the fcopy engine, and a sleep executor
//! for demos and tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, bail, eyre};
use fcopy::CopyAlgorithm;
use tracing::debug;

use crate::protocol::TaskSpec;

/// Progress reporting callback handed to executors; percent is in [0, 100]
pub type ProgressFn = dyn Fn(f64, &str) + Send + Sync;

/// Progress channel from an executor back to the slave runtime
#[derive(Clone)]
pub struct ProgressSink {
    report: Arc<ProgressFn>,
}

impl ProgressSink {
    pub fn new(report: Arc<ProgressFn>) -> Self {
        Self { report }
    }

    /// Sink that drops every report
    pub fn discard() -> Self {
        Self {
            report: Arc::new(|_, _| {}),
        }
    }

    pub fn report(&self, percent: f64, detail: &str) {
        (self.report)(percent.clamp(0.0, 100.0), detail);
    }
}

/// A unit of executable work, registered per task type
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// The task type this executor serves
    fn task_type(&self) -> &str;

    /// Run the task; the returned string becomes the completion detail
    async fn execute(&self, spec: &TaskSpec, progress: &ProgressSink) -> Result<String>;
}

/// Executor lookup by task type
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in executors
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FileCopyExecutor));
        registry.register(Arc::new(SleepExecutor));
        registry
    }

    pub fn register(&mut self, executor: Arc<dyn TaskExecutor>) {
        self.executors.insert(executor.task_type().to_string(), executor);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(task_type).cloned()
    }

    /// Registered task types; these become the slave's capability set
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }
}

/// Copies a file or directory with the fcopy engine.
///
/// Parameters: `source`, `dest`, optional `algorithm` ("default" or "sync").
pub struct FileCopyExecutor;

#[async_trait]
impl TaskExecutor for FileCopyExecutor {
    fn task_type(&self) -> &str {
        "FileCopy"
    }

    async fn execute(&self, spec: &TaskSpec, progress: &ProgressSink) -> Result<String> {
        let source = spec
            .parameters
            .get("source")
            .ok_or_else(|| eyre!("missing parameter: source"))?
            .clone();
        let dest = spec
            .parameters
            .get("dest")
            .ok_or_else(|| eyre!("missing parameter: dest"))?
            .clone();
        let algorithm = spec.parameters.get("algorithm").map(String::as_str).unwrap_or("default");

        let mut algo: Box<dyn CopyAlgorithm> = match algorithm {
            "default" => Box::new(fcopy::DefaultAlgorithm::new()),
            "sync" => Box::new(fcopy::SyncAlgorithm::new()),
            other => bail!("unknown copy algorithm: {other}"),
        };

        debug!(%source, %dest, algorithm, "copy task starting");
        let progress = progress.clone();
        let copied = tokio::task::spawn_blocking(move || -> Result<u64> {
            struct SinkObserver {
                progress: ProgressSink,
            }

            impl fcopy::ProgressObserver for SinkObserver {
                fn on_progress(&self, copied: u64, total: u64) {
                    if total > 0 {
                        let percent = copied as f64 * 100.0 / total as f64;
                        self.progress.report(percent, "copying");
                    }
                }
                fn on_file_start(&self, _path: &std::path::Path) {}
                fn on_file_complete(&self, _path: &std::path::Path) {}
                fn on_error(&self, _message: &str) {}
                fn should_stop(&self) -> bool {
                    false
                }
                fn should_pause(&self) -> bool {
                    false
                }
                fn wait_while_paused(&self) {}
            }

            let source = std::path::Path::new(&source);
            let dest = std::path::Path::new(&dest);
            let observer = SinkObserver { progress };

            let meta = std::fs::symlink_metadata(source)?;
            if meta.is_dir() {
                algo.copy_directory(source, dest, &observer)?;
            } else {
                algo.copy_file(source, dest, &observer)?;
            }
            Ok(algo.calculate_total_size(dest)?)
        })
        .await??;

        Ok(format!("copied {copied} bytes"))
    }
}

/// Sleeps for `duration_ms`, reporting progress in ten steps
pub struct SleepExecutor;

#[async_trait]
impl TaskExecutor for SleepExecutor {
    fn task_type(&self) -> &str {
        "Sleep"
    }

    async fn execute(&self, spec: &TaskSpec, progress: &ProgressSink) -> Result<String> {
        let duration_ms: u64 = spec
            .parameters
            .get("duration_ms")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(1_000);

        let step = Duration::from_millis(duration_ms / 10);
        for i in 1..=10u32 {
            tokio::time::sleep(step).await;
            progress.report(i as f64 * 10.0, "sleeping");
        }
        Ok(format!("slept {duration_ms} ms"))
    }
}
