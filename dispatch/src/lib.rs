//! dispatch - master/worker task dispatcher over a local socket
//!
//! A single master process accepts worker (slave) connections, routes typed
//! task messages to capable slaves, detects dead slaves via heartbeat
//! timeouts and redistributes their tasks with bounded retries. Slaves
//! register a capability set derived from their executor registry and report
//! task status as they go.
//!
//! # Modules
//!
//! - [`protocol`] - message sum type and wire records
//! - [`wire`] - length-prefixed framing with version check
//! - [`master`] - registry, pending queue, health loop, assignment
//! - [`slave`] - slave runtime: register/heartbeat/dispatch/reconnect
//! - [`executor`] - task executor trait and built-ins
//! - [`resource`] - best-effort host resource sampling
//! - [`config`] - timing and endpoint configuration

pub mod cli;
pub mod config;
pub mod executor;
pub mod master;
pub mod protocol;
pub mod resource;
pub mod slave;
pub mod wire;

// Re-export commonly used types
pub use config::{MasterConfig, SlaveConfig, default_endpoint};
pub use executor::{ExecutorRegistry, FileCopyExecutor, ProgressSink, SleepExecutor, TaskExecutor};
pub use master::{Master, MasterEvent, MasterHandle, MasterMetrics, MasterRequest, run_listener};
pub use protocol::{
    Envelope, HeartbeatReport, MessageType, MwMessage, PROTOCOL_VERSION, SlaveDescriptor, TaskSpec, TaskStatus,
    TaskStatusReport,
};
pub use slave::SlaveRuntime;
pub use wire::{WireError, read_message, write_message};
