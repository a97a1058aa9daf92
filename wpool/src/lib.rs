//! wpool - per-protocol worker pools over framed local IPC
//!
//! An application-side scheduler manages pools of worker processes, one pool
//! per protocol scheme, each worker speaking a length-prefixed command
//! protocol over a private Unix socket. Jobs are single protocol operations
//! (stat, get, put, listdir, ...) assigned to pooled workers under
//! per-protocol and per-host concurrency caps, with hold/resume keeping a
//! session warm for a follow-up URL and graceful failure when a worker dies
//! mid-job.
//!
//! # Modules
//!
//! - [`frame`] - 10-byte-header length-prefixed framing
//! - [`connection`] - framed stream with suspend/resume and listener mode
//! - [`commands`] - stable command/error/flag codes
//! - [`payload`] - typed frame payloads
//! - [`worker`] - pool-side worker handle and launcher
//! - [`scheduler`] - protocol pools, host queues, job driving
//! - [`job`] - the SimpleJob operation family
//! - [`runtime`] - worker-process dispatch loop
//! - [`protocols`] - built-in protocol handlers

pub mod cli;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod job;
pub mod payload;
pub mod protocols;
pub mod runtime;
pub mod scheduler;
pub mod worker;

// Re-export commonly used types
pub use commands::{Command, ErrorKind, JobFlags};
pub use config::PoolConfig;
pub use connection::{Connection, ConnectionListener, endpoint_dir};
pub use error::{PoolError, Result};
pub use frame::{FrameDecoder, HEADER_SIZE, MAX_PAYLOAD, WireTask, encode};
pub use job::{JobResult, SimpleJob};
pub use payload::{DirEntry, DuResult, FileStat, HostPayload};
pub use protocols::FileProtocol;
pub use runtime::{ProtocolHandler, serve, serve_connection};
pub use scheduler::Scheduler;
pub use worker::{JobId, ProcessLauncher, Worker, WorkerId, WorkerLauncher, WorkerLifecycle};
