//! Wire command set, error kinds and job flags
//!
//! The numeric codes are the stable wire contract between the application
//! and worker processes; they never change meaning across versions.

use serde::{Deserialize, Serialize};

/// Commands exchanged over a worker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum Command {
    // Base commands
    None = 0,
    Host = 1,
    Connect = 2,
    Disconnect = 3,
    Config = 4,

    // Operation commands
    Get = 100,
    Put = 101,
    Stat = 102,
    ListDir = 103,
    Mkdir = 104,
    Rename = 105,
    Copy = 106,
    Del = 107,
    Chmod = 108,
    Special = 109,
    Truncate = 110,

    // Disk usage
    Du = 200,
    DuRecursive = 201,

    // Worker responses
    Data = 500,
    Error = 501,
    Finished = 502,
    StatEntry = 503,
    ListEntries = 504,

    // Special events
    MessageBoxAnswer = 600,
    ResumeAnswer = 601,
    HostInfo = 602,
}

impl Command {
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl From<Command> for u16 {
    fn from(cmd: Command) -> u16 {
        cmd as u16
    }
}

impl TryFrom<u16> for Command {
    type Error = u16;

    fn try_from(code: u16) -> Result<Self, u16> {
        let cmd = match code {
            0 => Self::None,
            1 => Self::Host,
            2 => Self::Connect,
            3 => Self::Disconnect,
            4 => Self::Config,
            100 => Self::Get,
            101 => Self::Put,
            102 => Self::Stat,
            103 => Self::ListDir,
            104 => Self::Mkdir,
            105 => Self::Rename,
            106 => Self::Copy,
            107 => Self::Del,
            108 => Self::Chmod,
            109 => Self::Special,
            110 => Self::Truncate,
            200 => Self::Du,
            201 => Self::DuRecursive,
            500 => Self::Data,
            501 => Self::Error,
            502 => Self::Finished,
            503 => Self::StatEntry,
            504 => Self::ListEntries,
            600 => Self::MessageBoxAnswer,
            601 => Self::ResumeAnswer,
            602 => Self::HostInfo,
            other => return Err(other),
        };
        Ok(cmd)
    }
}

/// Stable error kinds reported by jobs and workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorKind {
    None = 0,
    CannotConnect = 1,
    CannotAuthenticate = 2,
    WorkerDied = 3,
    CannotEnterDirectory = 4,
    AccessDenied = 5,
    Unknown = 6,
    WorkerTimeout = 7,
    UnsupportedAction = 8,
    DiskFull = 9,
    FileAlreadyExist = 10,
}

impl ErrorKind {
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl From<ErrorKind> for u16 {
    fn from(kind: ErrorKind) -> u16 {
        kind as u16
    }
}

impl TryFrom<u16> for ErrorKind {
    type Error = u16;

    fn try_from(code: u16) -> Result<Self, u16> {
        let kind = match code {
            0 => Self::None,
            1 => Self::CannotConnect,
            2 => Self::CannotAuthenticate,
            3 => Self::WorkerDied,
            4 => Self::CannotEnterDirectory,
            5 => Self::AccessDenied,
            6 => Self::Unknown,
            7 => Self::WorkerTimeout,
            8 => Self::UnsupportedAction,
            9 => Self::DiskFull,
            10 => Self::FileAlreadyExist,
            other => return Err(other),
        };
        Ok(kind)
    }
}

/// Classify an I/O error into a wire error kind
impl From<&std::io::Error> for ErrorKind {
    fn from(e: &std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;
        match e.kind() {
            IoKind::PermissionDenied => Self::AccessDenied,
            IoKind::NotFound => Self::CannotEnterDirectory,
            IoKind::AlreadyExists => Self::FileAlreadyExist,
            IoKind::StorageFull => Self::DiskFull,
            _ => Self::Unknown,
        }
    }
}

/// Combinable job flags (OVERWRITE | RESUME | RECURSIVE)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobFlags(u32);

impl JobFlags {
    pub const NONE: JobFlags = JobFlags(0);
    pub const OVERWRITE: JobFlags = JobFlags(1);
    pub const RESUME: JobFlags = JobFlags(2);
    pub const RECURSIVE: JobFlags = JobFlags(4);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits & 0b111)
    }

    pub fn contains(self, other: JobFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for JobFlags {
    type Output = JobFlags;

    fn bitor(self, rhs: JobFlags) -> JobFlags {
        JobFlags(self.0 | rhs.0)
    }
}
