//! Pool-side worker handle
//!
//! A `Worker` represents one child process speaking the framed protocol for
//! a single protocol scheme. The pool tracks its lifecycle (`Idle ->
//! Launching -> Running -> Idle | Failed`), a ref-count that drives idle
//! tracking, and the hold flag used to keep a session warm for a follow-up
//! URL.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Child;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{PoolError, Result};
use crate::payload::HostPayload;

/// Arena handle for a worker owned by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

/// Arena handle for a job tracked by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u32);

/// Worker lifecycle; `Failed` is terminal, the scheduler replaces the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerLifecycle {
    Idle,
    Launching,
    Running,
    Failed,
}

/// Starts worker processes. Abstracted so tests can run workers in-process.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Start a worker for `protocol` that connects back to `endpoint`.
    /// Returns the child process handle when one was spawned.
    async fn spawn(&self, protocol: &str, endpoint: &Path) -> Result<Option<Child>>;
}

/// Launches `<exe> serve <protocol> <endpoint>` as a detached child process
pub struct ProcessLauncher {
    command: Option<std::path::PathBuf>,
}

impl ProcessLauncher {
    pub fn new(command: Option<std::path::PathBuf>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn spawn(&self, protocol: &str, endpoint: &Path) -> Result<Option<Child>> {
        let exe = match &self.command {
            Some(path) => path.clone(),
            None => std::env::current_exe().map_err(|e| PoolError::Launch(format!("cannot resolve executable: {e}")))?,
        };

        debug!(?exe, protocol, ?endpoint, "spawning worker process");
        let child = tokio::process::Command::new(&exe)
            .arg("serve")
            .arg(protocol)
            .arg(endpoint)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PoolError::Launch(format!("cannot start {}: {e}", exe.display())))?;
        Ok(Some(child))
    }
}

/// One pooled worker with its transport and bookkeeping
#[derive(Debug)]
pub struct Worker {
    protocol: String,
    state: WorkerLifecycle,
    host: Option<HostPayload>,
    connection: Option<Connection>,
    job: Option<JobId>,
    ref_count: u32,
    idle_since: Option<Instant>,
    on_hold: bool,
    child: Option<Child>,
}

impl Worker {
    /// Slot reservation while the real worker is still launching
    pub fn placeholder(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            state: WorkerLifecycle::Launching,
            host: None,
            connection: None,
            job: None,
            ref_count: 0,
            idle_since: None,
            on_hold: false,
            child: None,
        }
    }

    /// Launch a worker: listen, spawn the child, wait for it to connect back
    pub async fn launch(protocol: &str, launcher: &dyn WorkerLauncher, timeout: Duration) -> Result<Self> {
        let listener = Connection::listen_for_remote()?;
        let child = launcher.spawn(protocol, listener.endpoint()).await?;

        let connection = match tokio::time::timeout(timeout, listener.accept_next()).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(PoolError::Launch(format!(
                    "worker for '{protocol}' did not connect within {timeout:?}"
                )));
            }
        };

        let mut worker = Self::placeholder(protocol);
        worker.bind(connection, child);
        Ok(worker)
    }

    /// Bind the accepted child connection; the worker becomes running+idle
    pub fn bind(&mut self, connection: Connection, child: Option<Child>) {
        self.connection = Some(connection);
        self.child = child;
        self.state = WorkerLifecycle::Running;
        self.idle_since = Some(Instant::now());
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn state(&self) -> WorkerLifecycle {
        self.state
    }

    pub fn mark_failed(&mut self) {
        self.state = WorkerLifecycle::Failed;
    }

    pub fn is_alive(&self) -> bool {
        self.state == WorkerLifecycle::Running && self.connection.as_ref().is_some_and(|c| c.is_connected())
    }

    // === host binding ===

    pub fn set_host(&mut self, host: HostPayload) {
        self.host = Some(host);
    }

    pub fn reset_host(&mut self) {
        self.host = None;
    }

    pub fn host(&self) -> Option<&HostPayload> {
        self.host.as_ref()
    }

    /// Host name this worker is bound to, empty when unbound
    pub fn host_name(&self) -> &str {
        self.host.as_ref().map(|h| h.host.as_str()).unwrap_or("")
    }

    // === job binding ===

    pub fn job(&self) -> Option<JobId> {
        self.job
    }

    pub fn set_job(&mut self, job: Option<JobId>) {
        self.job = job;
    }

    // === ref counting and idle tracking ===

    pub fn ref_add(&mut self) {
        self.ref_count += 1;
        self.idle_since = None;
    }

    pub fn ref_release(&mut self) {
        self.ref_count = self.ref_count.saturating_sub(1);
        if self.ref_count == 0 {
            self.idle_since = Some(Instant::now());
        }
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn is_idle(&self) -> bool {
        self.ref_count == 0 && self.idle_since.is_some()
    }

    /// How long this worker has been idle; zero while in use
    pub fn idle_time(&self) -> Duration {
        self.idle_since.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }

    // === hold semantics ===

    /// Park the worker: keep the session warm, do not hand it out
    pub fn hold(&mut self) {
        debug!(protocol = %self.protocol, "Worker::hold");
        self.on_hold = true;
        if let Some(connection) = &mut self.connection {
            connection.suspend();
        }
    }

    /// Release the hold. The connection stays suspended until the next
    /// checkout resumes it, which flushes anything queued in order.
    pub fn unhold(&mut self) {
        debug!(protocol = %self.protocol, "Worker::unhold");
        self.on_hold = false;
    }

    pub fn on_hold(&self) -> bool {
        self.on_hold
    }

    // === transport checkout ===

    /// Take the connection for the duration of a job; the worker stays
    /// booked until [`restore_connection`](Self::restore_connection).
    pub fn take_connection(&mut self) -> Option<Connection> {
        self.connection.take()
    }

    pub fn restore_connection(&mut self, connection: Connection) {
        self.connection = Some(connection);
    }

    pub fn connection_mut(&mut self) -> Option<&mut Connection> {
        self.connection.as_mut()
    }

    /// Terminate the child process, if any
    pub async fn shutdown(&mut self) {
        if let Some(connection) = &mut self.connection {
            connection.close().await;
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(protocol = %self.protocol, error = %e, "failed to kill worker child");
            }
        }
        self.state = WorkerLifecycle::Idle;
    }
}
