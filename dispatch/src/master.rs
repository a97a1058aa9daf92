//! Master: worker registry, pending queue, health detection and assignment
//!
//! The master runs as a single actor task owning all dispatcher state, so
//! the pending queue, the task map and the slave registry are always mutated
//! together and never show a partial view. Socket handling lives in small
//! per-connection tasks that translate frames into [`MasterRequest`]s.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Instant;

use eyre::{Context, Result};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MasterConfig;
use crate::protocol::{HeartbeatReport, MwMessage, SlaveDescriptor, TaskSpec, TaskStatus, TaskStatusReport};
use crate::wire::{read_message, write_message};

/// Notifications published by the master for UIs and tests
#[derive(Debug, Clone)]
pub enum MasterEvent {
    SlaveRegistered { slave_id: Uuid },
    SlaveUnhealthy { slave_id: Uuid },
    SlaveRecovered { slave_id: Uuid },
    TaskAssigned { task_id: Uuid, slave_id: Uuid },
    TaskQueued { task_id: Uuid },
    TaskCompleted { task_id: Uuid, detail: String },
    TaskFailed { task_id: Uuid, message: String },
}

/// Requests handled by the master actor
#[derive(Debug)]
pub enum MasterRequest {
    /// Submit a task for dispatch
    Submit { task: TaskSpec },
    /// A new socket connected; `tx` is its outbound message queue
    Connected { conn_id: u64, tx: mpsc::Sender<MwMessage> },
    /// A message arrived on a connection
    Inbound { conn_id: u64, message: MwMessage },
    /// A connection dropped
    Disconnected { conn_id: u64 },
    /// Periodic health sweep
    HealthTick,
    GetMetrics { reply_tx: oneshot::Sender<MasterMetrics> },
    Shutdown,
}

/// Aggregate counters, mostly for tests and status output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterMetrics {
    pub registered_slaves: usize,
    pub healthy_slaves: usize,
    pub pending_tasks: usize,
    pub assigned_tasks: usize,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
}

/// Master-side record of one live slave
struct SlaveEntry {
    descriptor: SlaveDescriptor,
    conn_id: u64,
    tx: mpsc::Sender<MwMessage>,
    last_heartbeat: Instant,
    healthy: bool,
    running: HashSet<Uuid>,
}

impl SlaveEntry {
    fn can_accept(&self, task_type: &str) -> bool {
        self.healthy && self.descriptor.capabilities.iter().any(|c| c == task_type)
    }
}

/// Assigned-task bookkeeping; the original spec is preserved for requeueing
pub struct TaskInfo {
    pub slave_id: Uuid,
    pub started: Instant,
    pub retry_count: u32,
    pub spec: TaskSpec,
}

/// A task waiting for a capable healthy slave
struct PendingTask {
    spec: TaskSpec,
    retry_count: u32,
}

/// Cheap handle for talking to a running master actor
#[derive(Clone)]
pub struct MasterHandle {
    tx: mpsc::Sender<MasterRequest>,
    events: broadcast::Sender<MasterEvent>,
}

impl MasterHandle {
    pub async fn submit_task(&self, task: TaskSpec) -> Result<()> {
        self.tx
            .send(MasterRequest::Submit { task })
            .await
            .map_err(|_| eyre::eyre!("Master actor is gone"))
    }

    pub async fn metrics(&self) -> Result<MasterMetrics> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(MasterRequest::GetMetrics { reply_tx })
            .await
            .map_err(|_| eyre::eyre!("Master actor is gone"))?;
        reply_rx.await.context("Master actor dropped the reply")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(MasterRequest::Shutdown)
            .await
            .map_err(|_| eyre::eyre!("Master actor is gone"))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MasterEvent> {
        self.events.subscribe()
    }

    /// Raw request injection; used by the socket tasks and by tests
    pub fn sender(&self) -> mpsc::Sender<MasterRequest> {
        self.tx.clone()
    }
}

/// The coordinator of the dispatcher: accepts slaves, routes tasks,
/// redistributes on failure
pub struct Master {
    config: MasterConfig,
    tx: mpsc::Sender<MasterRequest>,
    rx: mpsc::Receiver<MasterRequest>,
    events: broadcast::Sender<MasterEvent>,
}

impl Master {
    pub fn new(config: MasterConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_buffer);
        let (events, _) = broadcast::channel(256);
        Self { config, tx, rx, events }
    }

    pub fn handle(&self) -> MasterHandle {
        MasterHandle {
            tx: self.tx.clone(),
            events: self.events.clone(),
        }
    }

    /// Run the actor until shutdown
    pub async fn run(mut self) {
        let mut state = MasterState {
            slaves: HashMap::new(),
            slave_order: Vec::new(),
            conn_index: HashMap::new(),
            unregistered: HashMap::new(),
            tasks: HashMap::new(),
            pending: VecDeque::new(),
            completed_tasks: 0,
            failed_tasks: 0,
            events: self.events.clone(),
        };

        let mut health = tokio::time::interval(self.config.health_check_interval());
        health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("Master started");
        loop {
            let request = tokio::select! {
                request = self.rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
                _ = health.tick() => MasterRequest::HealthTick,
            };

            match request {
                MasterRequest::Submit { task } => state.submit(task),
                MasterRequest::Connected { conn_id, tx } => {
                    debug!(conn_id, "connection established");
                    state.unregistered.insert(conn_id, tx);
                }
                MasterRequest::Inbound { conn_id, message } => state.inbound(conn_id, message),
                MasterRequest::Disconnected { conn_id } => state.disconnected(conn_id),
                MasterRequest::HealthTick => state.health_sweep(self.config.heartbeat_timeout()),
                MasterRequest::GetMetrics { reply_tx } => {
                    let _ = reply_tx.send(state.metrics());
                }
                MasterRequest::Shutdown => {
                    info!("Master shutting down");
                    for slave in state.slaves.values() {
                        let _ = slave.tx.try_send(MwMessage::shutdown());
                    }
                    break;
                }
            }
        }
        info!("Master stopped");
    }
}

struct MasterState {
    slaves: HashMap<Uuid, SlaveEntry>,
    /// Insertion order for the first-fit assignment scan
    slave_order: Vec<Uuid>,
    conn_index: HashMap<u64, Uuid>,
    unregistered: HashMap<u64, mpsc::Sender<MwMessage>>,
    tasks: HashMap<Uuid, TaskInfo>,
    pending: VecDeque<PendingTask>,
    completed_tasks: u64,
    failed_tasks: u64,
    events: broadcast::Sender<MasterEvent>,
}

impl MasterState {
    fn emit(&self, event: MasterEvent) {
        let _ = self.events.send(event);
    }

    fn metrics(&self) -> MasterMetrics {
        MasterMetrics {
            registered_slaves: self.slaves.len(),
            healthy_slaves: self.slaves.values().filter(|s| s.healthy).count(),
            pending_tasks: self.pending.len(),
            assigned_tasks: self.tasks.len(),
            completed_tasks: self.completed_tasks,
            failed_tasks: self.failed_tasks,
        }
    }

    fn submit(&mut self, task: TaskSpec) {
        debug!(task_id = %task.task_id, task_type = %task.task_type, "task submitted");
        self.dispatch(PendingTask {
            spec: task,
            retry_count: 0,
        });
    }

    /// Assign to the first healthy capable slave, else enqueue
    fn dispatch(&mut self, task: PendingTask) {
        let slave_id = self
            .slave_order
            .iter()
            .find(|id| {
                self.slaves
                    .get(id)
                    .is_some_and(|s| s.can_accept(&task.spec.task_type))
            })
            .copied();

        match slave_id {
            Some(slave_id) => self.assign(task, slave_id),
            None => {
                debug!(task_id = %task.spec.task_id, "no capable healthy slave, queueing");
                self.emit(MasterEvent::TaskQueued {
                    task_id: task.spec.task_id,
                });
                self.pending.push_back(task);
            }
        }
    }

    fn assign(&mut self, task: PendingTask, slave_id: Uuid) {
        let Some(slave) = self.slaves.get(&slave_id) else {
            self.pending.push_back(task);
            return;
        };

        let message = MwMessage::task_assign(task.spec.clone());
        if slave.tx.try_send(message).is_err() {
            warn!(%slave_id, "slave channel full or closed, queueing task");
            self.pending.push_back(task);
            return;
        }

        let task_id = task.spec.task_id;
        info!(%task_id, %slave_id, "task assigned");
        self.tasks.insert(
            task_id,
            TaskInfo {
                slave_id,
                started: Instant::now(),
                retry_count: task.retry_count,
                spec: task.spec,
            },
        );
        self.emit(MasterEvent::TaskAssigned { task_id, slave_id });
    }

    /// Hand queued tasks to one slave until it rejects one
    fn drain_pending_for(&mut self, slave_id: Uuid) {
        while let Some(front) = self.pending.front() {
            let accepted = self
                .slaves
                .get(&slave_id)
                .is_some_and(|s| s.can_accept(&front.spec.task_type));
            if !accepted {
                break;
            }
            let task = self.pending.pop_front().expect("front exists");
            self.assign(task, slave_id);
        }
    }

    fn inbound(&mut self, conn_id: u64, message: MwMessage) {
        match message {
            MwMessage::Register { slave, .. } => self.register(conn_id, slave),
            MwMessage::Heartbeat { beat, .. } => self.heartbeat(beat),
            MwMessage::TaskStatus { report, .. } => self.task_status(report),
            MwMessage::TaskResult { result, .. } => {
                debug!(task_id = %result.task_id, success = result.success, "task result received");
            }
            MwMessage::ResourceUsage { usage, .. } => {
                debug!(slave_id = %usage.slave_id, cpu = usage.cpu_usage, "resource usage");
            }
            MwMessage::ErrorReport { error, .. } => {
                warn!(slave_id = %error.slave_id, message = %error.message, "slave error report");
            }
            other => {
                warn!(conn_id, message_type = ?other.message_type(), "unexpected message from slave");
            }
        }
    }

    fn register(&mut self, conn_id: u64, descriptor: SlaveDescriptor) {
        let Some(tx) = self.unregistered.remove(&conn_id) else {
            warn!(conn_id, "register from unknown connection");
            return;
        };

        let slave_id = descriptor.slave_id;
        info!(%slave_id, hostname = %descriptor.hostname, capabilities = ?descriptor.capabilities, "slave registered");

        self.conn_index.insert(conn_id, slave_id);
        if !self.slave_order.contains(&slave_id) {
            self.slave_order.push(slave_id);
        }
        self.slaves.insert(
            slave_id,
            SlaveEntry {
                descriptor,
                conn_id,
                tx,
                last_heartbeat: Instant::now(),
                healthy: true,
                running: HashSet::new(),
            },
        );
        self.emit(MasterEvent::SlaveRegistered { slave_id });
        self.drain_pending_for(slave_id);
    }

    fn heartbeat(&mut self, beat: HeartbeatReport) {
        let slave_id = beat.slave_id;
        let Some(slave) = self.slaves.get_mut(&slave_id) else {
            return;
        };

        slave.last_heartbeat = Instant::now();
        slave.running = beat.running_tasks.into_iter().collect();
        debug!(%slave_id, running = slave.running.len(), "heartbeat");

        if !slave.healthy {
            info!(%slave_id, "slave recovered");
            slave.healthy = true;
            self.emit(MasterEvent::SlaveRecovered { slave_id });
        }

        // A heartbeat is an offer of capacity: drain what this slave can take
        self.drain_pending_for(slave_id);
    }

    fn task_status(&mut self, report: TaskStatusReport) {
        let task_id = report.task_id;
        if !self.tasks.contains_key(&task_id) {
            return;
        }

        match report.status {
            TaskStatus::Completed => {
                info!(%task_id, "task completed");
                self.tasks.remove(&task_id);
                self.completed_tasks += 1;
                self.emit(MasterEvent::TaskCompleted {
                    task_id,
                    detail: report.detail,
                });
            }
            TaskStatus::Failed | TaskStatus::Timeout => {
                let info = self.tasks.remove(&task_id).expect("checked above");
                if info.retry_count < info.spec.max_retries {
                    info!(%task_id, retry = info.retry_count + 1, "task failed, requeueing");
                    self.pending.push_back(PendingTask {
                        retry_count: info.retry_count + 1,
                        spec: info.spec,
                    });
                } else {
                    warn!(%task_id, retries = info.retry_count, "task failed permanently");
                    self.failed_tasks += 1;
                    self.emit(MasterEvent::TaskFailed {
                        task_id,
                        message: report.detail,
                    });
                }
            }
            TaskStatus::Accepted | TaskStatus::Running => {
                debug!(%task_id, status = ?report.status, progress = report.progress, "task progress");
            }
        }
    }

    fn disconnected(&mut self, conn_id: u64) {
        self.unregistered.remove(&conn_id);
        if let Some(slave_id) = self.conn_index.remove(&conn_id) {
            // Only react if this connection still owns the slave entry (a
            // reconnect may have replaced it)
            let owns = self.slaves.get(&slave_id).is_some_and(|s| s.conn_id == conn_id);
            if owns {
                warn!(%slave_id, "slave disconnected");
                self.mark_unhealthy(slave_id);
            }
        }
    }

    fn health_sweep(&mut self, timeout: std::time::Duration) {
        let expired: Vec<Uuid> = self
            .slaves
            .iter()
            .filter(|(_, s)| s.healthy && s.last_heartbeat.elapsed() > timeout)
            .map(|(id, _)| *id)
            .collect();

        for slave_id in expired {
            warn!(%slave_id, "heartbeat timeout");
            self.mark_unhealthy(slave_id);
        }
    }

    /// Flip to unhealthy and move every task assigned to this slave back to
    /// pending in one step, preserving the original specs
    fn mark_unhealthy(&mut self, slave_id: Uuid) {
        let Some(slave) = self.slaves.get_mut(&slave_id) else {
            return;
        };
        if !slave.healthy {
            return;
        }
        slave.healthy = false;
        self.emit(MasterEvent::SlaveUnhealthy { slave_id });

        let orphaned: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|(_, info)| info.slave_id == slave_id)
            .map(|(id, _)| *id)
            .collect();

        for task_id in orphaned {
            let info = self.tasks.remove(&task_id).expect("listed above");
            debug!(%task_id, %slave_id, "redistributing task");
            self.emit(MasterEvent::TaskQueued { task_id });
            self.pending.push_back(PendingTask {
                retry_count: info.retry_count,
                spec: info.spec,
            });
        }
    }
}

/// Accept loop: bind the endpoint and bridge sockets to the actor
pub async fn run_listener(endpoint: PathBuf, handle: MasterHandle) -> Result<()> {
    if let Some(parent) = endpoint.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }
    if endpoint.exists() {
        std::fs::remove_file(&endpoint).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(&endpoint).with_context(|| format!("Failed to bind {}", endpoint.display()))?;
    info!(endpoint = %endpoint.display(), "Master listening");

    let mut next_conn: u64 = 0;
    loop {
        let (stream, _) = listener.accept().await.context("accept failed")?;
        let conn_id = next_conn;
        next_conn += 1;
        tokio::spawn(connection_task(conn_id, stream, handle.sender()));
    }
}

/// Bridge one slave socket: frames in, queued messages out
async fn connection_task(conn_id: u64, stream: UnixStream, tx: mpsc::Sender<MasterRequest>) {
    let (mut reader, mut writer) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::channel::<MwMessage>(64);

    if tx.send(MasterRequest::Connected { conn_id, tx: out_tx }).await.is_err() {
        return;
    }

    let writer_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if write_message(&mut writer, &message).await.is_err() {
                break;
            }
        }
    });

    loop {
        match read_message(&mut reader).await {
            Ok(message) => {
                if tx.send(MasterRequest::Inbound { conn_id, message }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                if !e.is_disconnect() {
                    warn!(conn_id, error = %e, "protocol error, dropping connection");
                }
                break;
            }
        }
    }

    let _ = tx.send(MasterRequest::Disconnected { conn_id }).await;
    writer_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TaskStatus;
    use std::time::Duration;

    fn test_config() -> MasterConfig {
        MasterConfig {
            health_check_interval_ms: 20,
            heartbeat_timeout_ms: 80,
            ..MasterConfig::default()
        }
    }

    fn descriptor(slave_id: Uuid, capabilities: &[&str]) -> SlaveDescriptor {
        SlaveDescriptor {
            slave_id,
            hostname: "test-host".to_string(),
            cores: 4,
            total_memory: 8 << 30,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Register a fake slave over a raw request channel and return its
    /// outbound message queue
    async fn connect_slave(
        handle: &MasterHandle,
        conn_id: u64,
        slave_id: Uuid,
        capabilities: &[&str],
    ) -> mpsc::Receiver<MwMessage> {
        let (tx, rx) = mpsc::channel(16);
        handle
            .sender()
            .send(MasterRequest::Connected { conn_id, tx })
            .await
            .unwrap();
        handle
            .sender()
            .send(MasterRequest::Inbound {
                conn_id,
                message: MwMessage::register(descriptor(slave_id, capabilities)),
            })
            .await
            .unwrap();
        rx
    }

    async fn send_heartbeat(handle: &MasterHandle, conn_id: u64, slave_id: Uuid, running: Vec<Uuid>) {
        handle
            .sender()
            .send(MasterRequest::Inbound {
                conn_id,
                message: MwMessage::heartbeat(HeartbeatReport {
                    slave_id,
                    cpu_usage: 1.0,
                    memory_usage: 100,
                    running_tasks: running,
                }),
            })
            .await
            .unwrap();
    }

    async fn send_status(handle: &MasterHandle, conn_id: u64, slave_id: Uuid, task_id: Uuid, status: TaskStatus) {
        handle
            .sender()
            .send(MasterRequest::Inbound {
                conn_id,
                message: MwMessage::task_status(TaskStatusReport {
                    task_id,
                    slave_id,
                    status,
                    progress: 0.0,
                    detail: "test".to_string(),
                }),
            })
            .await
            .unwrap();
    }

    async fn recv_assignment(rx: &mut mpsc::Receiver<MwMessage>) -> TaskSpec {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(MwMessage::TaskAssign { task, .. })) => return task,
                Ok(Some(_)) => {}
                Ok(None) => panic!("slave channel closed"),
                Err(_) => panic!("timed out waiting for assignment"),
            }
        }
    }

    #[tokio::test]
    async fn test_submit_assigns_to_capable_slave() {
        let master = Master::new(test_config());
        let handle = master.handle();
        let actor = tokio::spawn(master.run());

        let slave_id = Uuid::new_v4();
        let mut rx = connect_slave(&handle, 0, slave_id, &["ImageProcessing"]).await;

        let task = TaskSpec::new("ImageProcessing");
        let task_id = task.task_id;
        handle.submit_task(task).await.unwrap();

        let assigned = recv_assignment(&mut rx).await;
        assert_eq!(assigned.task_id, task_id);

        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.assigned_tasks, 1);
        assert_eq!(metrics.pending_tasks, 0);

        handle.shutdown().await.unwrap();
        actor.await.unwrap();
    }

    #[tokio::test]
    async fn test_unmatched_task_queues_until_capable_slave_registers() {
        let master = Master::new(test_config());
        let handle = master.handle();
        let actor = tokio::spawn(master.run());

        // A slave without the needed capability
        let other_id = Uuid::new_v4();
        let _other_rx = connect_slave(&handle, 0, other_id, &["DataAnalysis"]).await;

        handle.submit_task(TaskSpec::new("ImageProcessing")).await.unwrap();
        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.pending_tasks, 1);
        assert_eq!(metrics.assigned_tasks, 0);

        // Registration drains the queue
        let capable_id = Uuid::new_v4();
        let mut capable_rx = connect_slave(&handle, 1, capable_id, &["ImageProcessing"]).await;
        recv_assignment(&mut capable_rx).await;

        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.pending_tasks, 0);
        assert_eq!(metrics.assigned_tasks, 1);

        handle.shutdown().await.unwrap();
        actor.await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeats_are_idempotent() {
        let master = Master::new(test_config());
        let handle = master.handle();
        let actor = tokio::spawn(master.run());

        let slave_id = Uuid::new_v4();
        let _rx = connect_slave(&handle, 0, slave_id, &["Sleep"]).await;
        let before = handle.metrics().await.unwrap();

        for _ in 0..10 {
            send_heartbeat(&handle, 0, slave_id, vec![]).await;
        }

        let after = handle.metrics().await.unwrap();
        assert_eq!(before, after);
        assert_eq!(after.registered_slaves, 1);
        assert_eq!(after.healthy_slaves, 1);

        handle.shutdown().await.unwrap();
        actor.await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_redistributes_every_assigned_task() {
        let master = Master::new(test_config());
        let handle = master.handle();
        let actor = tokio::spawn(master.run());

        let slave_id = Uuid::new_v4();
        let mut rx = connect_slave(&handle, 0, slave_id, &["Sleep"]).await;

        handle.submit_task(TaskSpec::new("Sleep")).await.unwrap();
        handle.submit_task(TaskSpec::new("Sleep")).await.unwrap();
        recv_assignment(&mut rx).await;
        recv_assignment(&mut rx).await;
        assert_eq!(handle.metrics().await.unwrap().assigned_tasks, 2);

        handle
            .sender()
            .send(MasterRequest::Disconnected { conn_id: 0 })
            .await
            .unwrap();

        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.assigned_tasks, 0, "no task stays bound to the lost slave");
        assert_eq!(metrics.pending_tasks, 2);
        assert_eq!(metrics.healthy_slaves, 0);

        handle.shutdown().await.unwrap();
        actor.await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_cap_drops_task_after_max_retries_plus_one_failures() {
        let master = Master::new(test_config());
        let handle = master.handle();
        let actor = tokio::spawn(master.run());
        let mut events = handle.subscribe();

        let slave_id = Uuid::new_v4();
        let mut rx = connect_slave(&handle, 0, slave_id, &["Flaky"]).await;

        let task = TaskSpec::new("Flaky").with_max_retries(2);
        let task_id = task.task_id;
        handle.submit_task(task).await.unwrap();

        // Three failures: two requeues, then a permanent drop
        for round in 0..3 {
            let assigned = recv_assignment(&mut rx).await;
            assert_eq!(assigned.task_id, task_id, "round {round}");
            send_status(&handle, 0, slave_id, task_id, TaskStatus::Failed).await;
            // A heartbeat gives the slave its next attempt
            send_heartbeat(&handle, 0, slave_id, vec![]).await;
        }

        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.pending_tasks, 0);
        assert_eq!(metrics.assigned_tasks, 0);
        assert_eq!(metrics.failed_tasks, 1);

        // Exactly one terminal failure event
        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, MasterEvent::TaskFailed { task_id: id, .. } if id == task_id) {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);

        handle.shutdown().await.unwrap();
        actor.await.unwrap();
    }

    #[tokio::test]
    async fn test_completed_task_is_forgotten() {
        let master = Master::new(test_config());
        let handle = master.handle();
        let actor = tokio::spawn(master.run());

        let slave_id = Uuid::new_v4();
        let mut rx = connect_slave(&handle, 0, slave_id, &["Sleep"]).await;

        let task = TaskSpec::new("Sleep");
        let task_id = task.task_id;
        handle.submit_task(task).await.unwrap();
        recv_assignment(&mut rx).await;

        send_status(&handle, 0, slave_id, task_id, TaskStatus::Completed).await;

        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.assigned_tasks, 0);
        assert_eq!(metrics.pending_tasks, 0);
        assert_eq!(metrics.completed_tasks, 1);

        // A duplicate completion report is ignored
        send_status(&handle, 0, slave_id, task_id, TaskStatus::Completed).await;
        assert_eq!(handle.metrics().await.unwrap().completed_tasks, 1);

        handle.shutdown().await.unwrap();
        actor.await.unwrap();
    }

    #[tokio::test]
    async fn test_failover_reassigns_after_heartbeat_loss() {
        // Scenario: two capable slaves; the assignee stops heartbeating and
        // the task moves to the survivor on its next heartbeat.
        let master = Master::new(test_config());
        let handle = master.handle();
        let actor = tokio::spawn(master.run());

        let a_id = Uuid::new_v4();
        let b_id = Uuid::new_v4();
        let mut a_rx = connect_slave(&handle, 0, a_id, &["ImageProcessing"]).await;
        let mut b_rx = connect_slave(&handle, 1, b_id, &["ImageProcessing"]).await;

        let task = TaskSpec::new("ImageProcessing");
        let task_id = task.task_id;
        handle.submit_task(task).await.unwrap();

        // First-fit assignment goes to A (registered first)
        let assigned = recv_assignment(&mut a_rx).await;
        assert_eq!(assigned.task_id, task_id);

        // A goes silent; keep B heartbeating until it inherits the task
        let reassigned = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                send_heartbeat(&handle, 1, b_id, vec![]).await;
                tokio::select! {
                    Some(MwMessage::TaskAssign { task, .. }) = b_rx.recv() => break task,
                    _ = tokio::time::sleep(Duration::from_millis(20)) => {}
                }
            }
        })
        .await
        .expect("task was never reassigned to the survivor");
        assert_eq!(reassigned.task_id, task_id);

        // B completes it; nothing pending or assigned remains
        send_status(&handle, 1, b_id, task_id, TaskStatus::Completed).await;
        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.pending_tasks, 0);
        assert_eq!(metrics.assigned_tasks, 0);
        assert_eq!(metrics.completed_tasks, 1);

        handle.shutdown().await.unwrap();
        actor.await.unwrap();
    }
}
