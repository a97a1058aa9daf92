//! Dispatcher message protocol
//!
//! One tagged sum type carries every message, with the common header as an
//! ordinary struct field. The numeric type tags and the schema version are
//! the stable wire contract; bodies are serde-encoded.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire schema version, checked on decode
pub const PROTOCOL_VERSION: u8 = 1;

/// Numeric message tags (stable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum MessageType {
    Register = 0,
    Heartbeat = 1,
    Shutdown = 2,
    TaskAssign = 3,
    TaskStatus = 4,
    TaskResult = 5,
    ResourceUsage = 6,
    ErrorReport = 7,
}

impl From<MessageType> for u16 {
    fn from(t: MessageType) -> u16 {
        t as u16
    }
}

impl TryFrom<u16> for MessageType {
    type Error = u16;

    fn try_from(code: u16) -> Result<Self, u16> {
        Ok(match code {
            0 => Self::Register,
            1 => Self::Heartbeat,
            2 => Self::Shutdown,
            3 => Self::TaskAssign,
            4 => Self::TaskStatus,
            5 => Self::TaskResult,
            6 => Self::ResourceUsage,
            7 => Self::ErrorReport,
            other => return Err(other),
        })
    }
}

/// Common message header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u8,
    pub message_id: Uuid,
    pub timestamp_ms: i64,
}

impl Envelope {
    pub fn new() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message_id: Uuid::new_v4(),
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}

/// Slave self-description sent at registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveDescriptor {
    pub slave_id: Uuid,
    pub hostname: String,
    pub cores: u32,
    pub total_memory: u64,
    pub capabilities: Vec<String>,
}

/// Periodic liveness report with resource usage and running tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatReport {
    pub slave_id: Uuid,
    pub cpu_usage: f64,
    pub memory_usage: u64,
    pub running_tasks: Vec<Uuid>,
}

fn default_max_retries() -> u32 {
    3
}

/// A unit of work routed by the master; the payload is opaque parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: Uuid,
    pub task_type: String,
    pub priority: i32,
    pub deadline_ms: Option<i64>,
    pub parameters: HashMap<String, String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl TaskSpec {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            task_type: task_type.into(),
            priority: 0,
            deadline_ms: None,
            parameters: HashMap::new(),
            max_retries: default_max_retries(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Execution state of an assigned task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Accepted,
    Running,
    Completed,
    Failed,
    Timeout,
}

/// Status update for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusReport {
    pub task_id: Uuid,
    pub slave_id: Uuid,
    pub status: TaskStatus,
    /// Completion percentage in [0, 100]
    pub progress: f64,
    pub detail: String,
}

/// Final output of a completed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResultReport {
    pub task_id: Uuid,
    pub slave_id: Uuid,
    pub success: bool,
    pub output: String,
}

/// Standalone resource usage report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub slave_id: Uuid,
    pub cpu_usage: f64,
    pub memory_usage: u64,
}

/// Out-of-band error report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub slave_id: Uuid,
    pub message: String,
}

/// Every message on the wire, tagged by type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MwMessage {
    Register { header: Envelope, slave: SlaveDescriptor },
    Heartbeat { header: Envelope, beat: HeartbeatReport },
    Shutdown { header: Envelope },
    TaskAssign { header: Envelope, task: TaskSpec },
    TaskStatus { header: Envelope, report: TaskStatusReport },
    TaskResult { header: Envelope, result: TaskResultReport },
    ResourceUsage { header: Envelope, usage: ResourceReport },
    ErrorReport { header: Envelope, error: ErrorDetail },
}

impl MwMessage {
    pub fn register(slave: SlaveDescriptor) -> Self {
        Self::Register {
            header: Envelope::new(),
            slave,
        }
    }

    pub fn heartbeat(beat: HeartbeatReport) -> Self {
        Self::Heartbeat {
            header: Envelope::new(),
            beat,
        }
    }

    pub fn shutdown() -> Self {
        Self::Shutdown {
            header: Envelope::new(),
        }
    }

    pub fn task_assign(task: TaskSpec) -> Self {
        Self::TaskAssign {
            header: Envelope::new(),
            task,
        }
    }

    pub fn task_status(report: TaskStatusReport) -> Self {
        Self::TaskStatus {
            header: Envelope::new(),
            report,
        }
    }

    pub fn task_result(result: TaskResultReport) -> Self {
        Self::TaskResult {
            header: Envelope::new(),
            result,
        }
    }

    pub fn header(&self) -> &Envelope {
        match self {
            Self::Register { header, .. }
            | Self::Heartbeat { header, .. }
            | Self::Shutdown { header }
            | Self::TaskAssign { header, .. }
            | Self::TaskStatus { header, .. }
            | Self::TaskResult { header, .. }
            | Self::ResourceUsage { header, .. }
            | Self::ErrorReport { header, .. } => header,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Register { .. } => MessageType::Register,
            Self::Heartbeat { .. } => MessageType::Heartbeat,
            Self::Shutdown { .. } => MessageType::Shutdown,
            Self::TaskAssign { .. } => MessageType::TaskAssign,
            Self::TaskStatus { .. } => MessageType::TaskStatus,
            Self::TaskResult { .. } => MessageType::TaskResult,
            Self::ResourceUsage { .. } => MessageType::ResourceUsage,
            Self::ErrorReport { .. } => MessageType::ErrorReport,
        }
    }
}
