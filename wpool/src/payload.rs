//! Typed payloads carried inside command frames
//!
//! Frames are opaque at the transport layer; these are the serde shapes the
//! jobs and the worker runtime agree on for each command.

use serde::{Deserialize, Serialize};

use crate::commands::{ErrorKind, JobFlags};
use crate::error::Result;

/// Host binding for a worker session (CMD 1)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPayload {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

/// Per-protocol configuration map (CMD 4)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPayload {
    pub entries: std::collections::HashMap<String, String>,
}

/// Error report from a worker (CMD 501)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorKind,
    pub message: String,
}

/// Stat result for one filesystem object (CMD 503)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub mode: u32,
    pub mtime_ms: i64,
}

/// One directory listing entry (part of CMD 504)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// Directory listing (CMD 504)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntriesPayload {
    pub entries: Vec<DirEntry>,
}

/// Disk usage result, carried as a DATA payload for DU commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuResult {
    pub bytes: u64,
    pub files: u64,
    pub dirs: u64,
}

/// Single-path operation arguments (STAT, GET, LISTDIR, MKDIR)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathArgs {
    pub path: String,
}

/// PUT arguments; file bytes follow as DATA frames terminated by an empty one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutArgs {
    pub path: String,
    pub flags: JobFlags,
}

/// Two-path operation arguments (RENAME, COPY)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrcDestArgs {
    pub src: String,
    pub dest: String,
    pub flags: JobFlags,
}

/// DEL arguments; `is_file` distinguishes file delete from rmdir
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelArgs {
    pub path: String,
    pub is_file: bool,
}

/// CHMOD arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChmodArgs {
    pub path: String,
    pub mode: u32,
}

/// TRUNCATE arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncateArgs {
    pub path: String,
    pub length: u64,
}

/// Redirect notification (CMD 602); replaces the job URL when redirection
/// handling is enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfoPayload {
    #[serde(default)]
    pub redirect: Option<String>,
}

/// Serialize a payload for a frame
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Parse a frame payload
pub fn from_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}
