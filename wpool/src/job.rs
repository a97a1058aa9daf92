//! Command-oriented jobs executed by pooled workers
//!
//! A [`SimpleJob`] is one protocol operation: it serializes its arguments
//! into a single command frame, is assigned a worker by the scheduler, and
//! terminates on the first `FINISHED` or `ERROR` frame. Jobs emit at most
//! one terminal outcome.

use url::Url;

use crate::commands::{Command, ErrorKind, JobFlags};
use crate::error::Result;
use crate::payload::{
    self, ChmodArgs, DelArgs, DirEntry, DuResult, FileStat, PathArgs, PutArgs, SrcDestArgs, TruncateArgs,
};
use crate::worker::WorkerId;

/// Everything a finished job can carry back to the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobResult {
    /// Raw data frames (GET contents, SPECIAL replies)
    pub data: Vec<u8>,
    /// Stat entry (STAT)
    pub stat: Option<FileStat>,
    /// Directory listing (LISTDIR)
    pub entries: Vec<DirEntry>,
    /// Disk usage summary (DU / DU_RECURSIVE)
    pub du: Option<DuResult>,
    /// Redirect surfaced to the caller when redirection handling is disabled
    pub redirect: Option<Url>,
}

/// One protocol operation bound to a URL
#[derive(Debug)]
pub struct SimpleJob {
    url: Url,
    command: Command,
    payload: Vec<u8>,
    flags: JobFlags,
    /// Extra bytes streamed as DATA frames after the command (PUT)
    attached_data: Option<Vec<u8>>,
    redirection_handling: bool,
    running: bool,
    error: Option<(ErrorKind, String)>,
    worker: Option<WorkerId>,
    last_worker: Option<WorkerId>,
}

impl SimpleJob {
    fn new(url: Url, command: Command, payload: Vec<u8>, flags: JobFlags) -> Self {
        Self {
            url,
            command,
            payload,
            flags,
            attached_data: None,
            redirection_handling: true,
            running: false,
            error: None,
            worker: None,
            last_worker: None,
        }
    }

    // === constructors, one per operation ===

    pub fn stat(url: Url) -> Result<Self> {
        let payload = payload::to_bytes(&PathArgs {
            path: url.path().to_string(),
        })?;
        Ok(Self::new(url, Command::Stat, payload, JobFlags::NONE))
    }

    pub fn get(url: Url) -> Result<Self> {
        let payload = payload::to_bytes(&PathArgs {
            path: url.path().to_string(),
        })?;
        Ok(Self::new(url, Command::Get, payload, JobFlags::NONE))
    }

    pub fn put(url: Url, data: Vec<u8>, flags: JobFlags) -> Result<Self> {
        let payload = payload::to_bytes(&PutArgs {
            path: url.path().to_string(),
            flags,
        })?;
        let mut job = Self::new(url, Command::Put, payload, flags);
        job.attached_data = Some(data);
        Ok(job)
    }

    pub fn listdir(url: Url) -> Result<Self> {
        let payload = payload::to_bytes(&PathArgs {
            path: url.path().to_string(),
        })?;
        Ok(Self::new(url, Command::ListDir, payload, JobFlags::NONE))
    }

    pub fn mkdir(url: Url) -> Result<Self> {
        let payload = payload::to_bytes(&PathArgs {
            path: url.path().to_string(),
        })?;
        Ok(Self::new(url, Command::Mkdir, payload, JobFlags::NONE))
    }

    pub fn rename(src: Url, dest: Url, flags: JobFlags) -> Result<Self> {
        let payload = payload::to_bytes(&SrcDestArgs {
            src: src.path().to_string(),
            dest: dest.path().to_string(),
            flags,
        })?;
        Ok(Self::new(src, Command::Rename, payload, flags))
    }

    pub fn copy(src: Url, dest: Url, flags: JobFlags) -> Result<Self> {
        let payload = payload::to_bytes(&SrcDestArgs {
            src: src.path().to_string(),
            dest: dest.path().to_string(),
            flags,
        })?;
        Ok(Self::new(src, Command::Copy, payload, flags))
    }

    /// Delete a file
    pub fn file_delete(url: Url, flags: JobFlags) -> Result<Self> {
        let payload = payload::to_bytes(&DelArgs {
            path: url.path().to_string(),
            is_file: true,
        })?;
        Ok(Self::new(url, Command::Del, payload, flags))
    }

    /// Remove a directory
    pub fn rmdir(url: Url) -> Result<Self> {
        let payload = payload::to_bytes(&DelArgs {
            path: url.path().to_string(),
            is_file: false,
        })?;
        Ok(Self::new(url, Command::Del, payload, JobFlags::NONE))
    }

    pub fn chmod(url: Url, mode: u32) -> Result<Self> {
        let payload = payload::to_bytes(&ChmodArgs {
            path: url.path().to_string(),
            mode,
        })?;
        Ok(Self::new(url, Command::Chmod, payload, JobFlags::NONE))
    }

    pub fn truncate(url: Url, length: u64) -> Result<Self> {
        let payload = payload::to_bytes(&TruncateArgs {
            path: url.path().to_string(),
            length,
        })?;
        Ok(Self::new(url, Command::Truncate, payload, JobFlags::NONE))
    }

    pub fn du(url: Url, recursive: bool) -> Result<Self> {
        let command = if recursive { Command::DuRecursive } else { Command::Du };
        let payload = payload::to_bytes(&PathArgs {
            path: url.path().to_string(),
        })?;
        Ok(Self::new(url, command, payload, JobFlags::NONE))
    }

    /// Protocol-specific escape hatch: raw payload, raw reply data
    pub fn special(url: Url, data: Vec<u8>, flags: JobFlags) -> Result<Self> {
        Ok(Self::new(url, Command::Special, data, flags))
    }

    // === accessors ===

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn set_url(&mut self, url: Url) {
        self.url = url;
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn flags(&self) -> JobFlags {
        self.flags
    }

    pub fn attached_data(&self) -> Option<&[u8]> {
        self.attached_data.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Error kind after a failed run; `None` until then
    pub fn error(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|(kind, _)| *kind)
    }

    pub fn error_text(&self) -> Option<&str> {
        self.error.as_ref().map(|(_, text)| text.as_str())
    }

    pub(crate) fn set_error(&mut self, kind: ErrorKind, text: &str) {
        // First terminal error wins
        if self.error.is_none() {
            self.error = Some((kind, text.to_string()));
        }
    }

    pub fn worker(&self) -> Option<WorkerId> {
        self.worker
    }

    pub(crate) fn set_worker(&mut self, worker: Option<WorkerId>) {
        if let Some(id) = worker {
            self.last_worker = Some(id);
        }
        self.worker = worker;
    }

    /// Worker that served the most recent run; survives job completion so a
    /// follow-up can park it on hold
    pub fn last_worker(&self) -> Option<WorkerId> {
        self.last_worker
    }

    pub fn redirection_handling_enabled(&self) -> bool {
        self.redirection_handling
    }

    /// Opt out to surface redirects to the caller instead of following them
    pub fn set_redirection_handling(&mut self, enabled: bool) {
        self.redirection_handling = enabled;
    }
}
