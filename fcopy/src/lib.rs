//! fcopy - streaming file copy engine with pause/resume
//!
//! A two-tier copy pipeline for file-manager style workloads: a fast path
//! built on the kernel's range copy with a chunked fallback, and a
//! durability-biased path using synchronous writes with dynamic chunk sizes.
//! Copies run on dedicated worker threads behind a strict task state machine
//! with cooperative pause, resume and stop.
//!
//! # Modules
//!
//! - [`algorithm`] - the `CopyAlgorithm` contract and registry types
//! - [`algorithms`] - the default and sync implementations
//! - [`observer`] - progress/pause/stop observer contract
//! - [`worker`] - worker-thread driver and pause latch
//! - [`task`] - task state machine and events
//! - [`manager`] - algorithm registry and task lifecycle
//! - [`hooks`] - optional task lifecycle callbacks

pub mod algorithm;
pub mod algorithms;
pub mod cli;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod hooks;
pub mod manager;
pub mod observer;
pub mod task;
pub mod worker;

// Re-export commonly used types
pub use algorithm::{AlgorithmDescriptor, AlgorithmFactory, CopyAlgorithm};
pub use algorithms::{CHUNK_SIZE, DefaultAlgorithm, SyncAlgorithm};
pub use config::{ChunkTiers, CopyConfig};
pub use error::{CopyError, Result};
pub use hooks::{LoggingHooks, TaskHooks};
pub use manager::TaskManager;
pub use observer::{NullObserver, ProgressObserver};
pub use task::{CopyProgress, CopyTask, TaskEvent, TaskState, is_valid_transition};
pub use worker::{CopyWorker, PauseLatch, WorkerEvents, WorkerState};
