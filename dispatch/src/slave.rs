//! Slave runtime: register, heartbeat, execute, reconnect
//!
//! Connects to the master endpoint, registers its capabilities, heartbeats
//! every few seconds and dispatches task assignments to executors. A lost
//! connection triggers reconnects with a fixed backoff; heartbeats are
//! suppressed while disconnected but in-flight executors keep running and
//! their status reports are buffered until the link returns.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use eyre::{Context, Result};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SlaveConfig;
use crate::executor::{ExecutorRegistry, ProgressSink};
use crate::protocol::{
    HeartbeatReport, MwMessage, SlaveDescriptor, TaskSpec, TaskStatus, TaskStatusReport,
};
use crate::resource;
use crate::wire::{read_message, write_message};

/// One dispatcher slave process
pub struct SlaveRuntime {
    config: SlaveConfig,
    slave_id: Uuid,
    executors: Arc<ExecutorRegistry>,
    running: Arc<Mutex<HashSet<Uuid>>>,
    /// Status messages waiting for a live connection
    outbox_tx: mpsc::UnboundedSender<MwMessage>,
    outbox_rx: mpsc::UnboundedReceiver<MwMessage>,
}

impl SlaveRuntime {
    pub fn new(config: SlaveConfig, executors: ExecutorRegistry) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        Self {
            config,
            slave_id: Uuid::new_v4(),
            executors: Arc::new(executors),
            running: Arc::new(Mutex::new(HashSet::new())),
            outbox_tx,
            outbox_rx,
        }
    }

    pub fn slave_id(&self) -> Uuid {
        self.slave_id
    }

    fn descriptor(&self) -> SlaveDescriptor {
        SlaveDescriptor {
            slave_id: self.slave_id,
            hostname: resource::hostname(),
            cores: resource::core_count(),
            total_memory: resource::total_memory(),
            capabilities: self.executors.task_types(),
        }
    }

    /// Run until the master orders a shutdown. Reconnects with backoff on
    /// connection loss.
    pub async fn run(mut self) -> Result<()> {
        let endpoint = self.config.endpoint();
        info!(slave_id = %self.slave_id, endpoint = %endpoint.display(), "slave starting");

        loop {
            match UnixStream::connect(&endpoint).await {
                Ok(stream) => match self.session(stream).await {
                    Ok(SessionEnd::Shutdown) => {
                        info!(slave_id = %self.slave_id, "shutdown requested, exiting");
                        return Ok(());
                    }
                    Ok(SessionEnd::Disconnected) => {
                        warn!(slave_id = %self.slave_id, "lost connection to master");
                    }
                    Err(e) => {
                        warn!(slave_id = %self.slave_id, error = %e, "session failed");
                    }
                },
                Err(e) => {
                    debug!(endpoint = %endpoint.display(), error = %e, "cannot reach master");
                }
            }

            tokio::time::sleep(self.config.reconnect_backoff()).await;
        }
    }

    /// One connected session: register, heartbeat, dispatch until the link
    /// drops or the master says shutdown
    async fn session(&mut self, stream: UnixStream) -> Result<SessionEnd> {
        let (mut reader, mut writer) = stream.into_split();

        write_message(&mut writer, &MwMessage::register(self.descriptor()))
            .await
            .context("failed to register")?;
        info!(slave_id = %self.slave_id, "registered with master");

        // Reads happen on their own task so a mid-frame read is never
        // cancelled by the select below
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<MwMessage>(16);
        let reader_task = tokio::spawn(async move {
            loop {
                match read_message(&mut reader).await {
                    Ok(message) => {
                        if inbound_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let end = loop {
            tokio::select! {
                inbound = inbound_rx.recv() => match inbound {
                    Some(MwMessage::TaskAssign { task, .. }) => self.dispatch(task),
                    Some(MwMessage::Shutdown { .. }) => break SessionEnd::Shutdown,
                    Some(other) => debug!(message_type = ?other.message_type(), "ignoring message"),
                    None => break SessionEnd::Disconnected,
                },

                Some(status) = self.outbox_rx.recv() => {
                    if write_message(&mut writer, &status).await.is_err() {
                        break SessionEnd::Disconnected;
                    }
                }

                _ = heartbeat.tick() => {
                    let beat = MwMessage::heartbeat(HeartbeatReport {
                        slave_id: self.slave_id,
                        cpu_usage: resource::cpu_usage(),
                        memory_usage: resource::memory_usage(),
                        running_tasks: self.running.lock().unwrap().iter().copied().collect(),
                    });
                    if write_message(&mut writer, &beat).await.is_err() {
                        break SessionEnd::Disconnected;
                    }
                }
            }
        };

        reader_task.abort();
        Ok(end)
    }

    /// Hand a task to its executor; unsupported types fail immediately
    fn dispatch(&self, task: TaskSpec) {
        let task_id = task.task_id;
        debug!(%task_id, task_type = %task.task_type, "task assigned");

        let Some(executor) = self.executors.get(&task.task_type) else {
            warn!(%task_id, task_type = %task.task_type, "unsupported task type");
            self.push_status(task_id, TaskStatus::Failed, 0.0, "Unsupported task type");
            return;
        };

        self.push_status(task_id, TaskStatus::Accepted, 0.0, "");
        self.running.lock().unwrap().insert(task_id);

        let slave_id = self.slave_id;
        let outbox = self.outbox_tx.clone();
        let running = self.running.clone();

        let progress_outbox = outbox.clone();
        let progress = ProgressSink::new(Arc::new(move |percent, detail: &str| {
            let _ = progress_outbox.send(status_message(slave_id, task_id, TaskStatus::Running, percent, detail));
        }));

        tokio::spawn(async move {
            let outcome = executor.execute(&task, &progress).await;
            running.lock().unwrap().remove(&task_id);

            let status = match outcome {
                Ok(detail) => {
                    info!(%task_id, "task completed");
                    status_message(slave_id, task_id, TaskStatus::Completed, 100.0, &detail)
                }
                Err(e) => {
                    warn!(%task_id, error = %e, "task failed");
                    status_message(slave_id, task_id, TaskStatus::Failed, 0.0, &e.to_string())
                }
            };
            let _ = outbox.send(status);
        });
    }

    fn push_status(&self, task_id: Uuid, status: TaskStatus, progress: f64, detail: &str) {
        let _ = self
            .outbox_tx
            .send(status_message(self.slave_id, task_id, status, progress, detail));
    }
}

fn status_message(slave_id: Uuid, task_id: Uuid, status: TaskStatus, progress: f64, detail: &str) -> MwMessage {
    MwMessage::task_status(TaskStatusReport {
        task_id,
        slave_id,
        status,
        progress,
        detail: detail.to_string(),
    })
}

enum SessionEnd {
    Shutdown,
    Disconnected,
}
