//! Scheduler: per-protocol worker pools with per-host concurrency limits
//!
//! Workers and jobs are tracked through arena handles ([`WorkerId`],
//! [`JobId`]); the pool state lives behind one mutex, and all socket I/O
//! happens on checked-out connections outside the lock. Idle workers are
//! reused first-in-first-out before new ones launch; a worker parked on hold
//! keeps its session warm for the next job against the same URL.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, warn};
use url::Url;

use crate::commands::{Command, ErrorKind};
use crate::config::PoolConfig;
use crate::connection::Connection;
use crate::error::{PoolError, Result};
use crate::job::{JobResult, SimpleJob};
use crate::payload::{self, ErrorPayload, HostInfoPayload, HostPayload, ListEntriesPayload};
use crate::worker::{JobId, ProcessLauncher, Worker, WorkerId, WorkerLauncher};

/// Per-host bookkeeping within a protocol pool
#[derive(Debug, Default)]
struct HostQueue {
    workers: Vec<WorkerId>,
    jobs: HashSet<JobId>,
    running_jobs: usize,
}

/// Per-protocol pool of workers with concurrency caps
struct ProtoQueue {
    max_workers: usize,
    max_workers_per_host: usize,
    hosts: HashMap<String, HostQueue>,
    idle: VecDeque<WorkerId>,
    all: Vec<WorkerId>,
}

impl ProtoQueue {
    fn new(config: &PoolConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            max_workers_per_host: config.max_workers_per_host,
            hosts: HashMap::new(),
            idle: VecDeque::new(),
            all: Vec::new(),
        }
    }
}

struct State {
    workers: HashMap<WorkerId, Worker>,
    protocols: HashMap<String, ProtoQueue>,
    next_worker: u32,
    next_job: u32,
    url_on_hold: Option<Url>,
    worker_on_hold: Option<WorkerId>,
}

impl State {
    fn alloc_worker_id(&mut self) -> WorkerId {
        let id = WorkerId(self.next_worker);
        self.next_worker += 1;
        id
    }

    fn alloc_job_id(&mut self) -> JobId {
        let id = JobId(self.next_job);
        self.next_job += 1;
        id
    }

    /// Bind worker and job together and update the host queue counters
    fn bind(&mut self, wid: WorkerId, jid: JobId, proto: &str, host: &str, url: &Url) {
        if let Some(worker) = self.workers.get_mut(&wid) {
            worker.set_job(Some(jid));
            worker.ref_add();
            if host.is_empty() {
                worker.reset_host();
            } else {
                worker.set_host(HostPayload {
                    host: host.to_string(),
                    port: url.port().unwrap_or(0),
                    user: url.username().to_string(),
                    password: url.password().unwrap_or("").to_string(),
                });
            }
        }

        if !host.is_empty()
            && let Some(pq) = self.protocols.get_mut(proto)
        {
            let hq = pq.hosts.entry(host.to_string()).or_default();
            hq.jobs.insert(jid);
            hq.running_jobs += 1;
            if !hq.workers.contains(&wid) {
                hq.workers.push(wid);
            }
        }
    }
}

enum Plan {
    Assigned(WorkerId, JobId),
    NeedsLaunch(WorkerId),
    Busy,
}

/// Per-protocol worker pool scheduler.
///
/// Constructible and injectable; a process-wide default instance is
/// available through [`Scheduler::global`].
pub struct Scheduler {
    state: Mutex<State>,
    capacity_freed: Notify,
    launcher: Arc<dyn WorkerLauncher>,
    config: PoolConfig,
}

static GLOBAL: OnceLock<Arc<Scheduler>> = OnceLock::new();

impl Scheduler {
    pub fn new(config: PoolConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            state: Mutex::new(State {
                workers: HashMap::new(),
                protocols: HashMap::new(),
                next_worker: 0,
                next_job: 0,
                url_on_hold: None,
                worker_on_hold: None,
            }),
            capacity_freed: Notify::new(),
            launcher,
            config,
        }
    }

    /// Process-wide default scheduler, created on first use
    pub fn global() -> Arc<Scheduler> {
        GLOBAL
            .get_or_init(|| {
                let config = PoolConfig::default();
                let launcher = Arc::new(ProcessLauncher::new(config.worker_command.clone()));
                Arc::new(Scheduler::new(config, launcher))
            })
            .clone()
    }

    /// Assign a worker to the job, launching one if the pool allows.
    /// Waits while the protocol pool or the target host is saturated.
    pub async fn do_job(&self, job: &mut SimpleJob) -> Result<(WorkerId, JobId)> {
        let proto = job.url().scheme().to_string();
        let host = job.url().host_str().unwrap_or("").to_string();

        loop {
            let plan = self.plan_assignment(&proto, &host, job.url());
            match plan {
                Plan::Assigned(wid, jid) => {
                    debug!(?wid, ?jid, proto, host, "job assigned to pooled worker");
                    job.set_worker(Some(wid));
                    return Ok((wid, jid));
                }
                Plan::NeedsLaunch(placeholder) => {
                    match Worker::launch(&proto, self.launcher.as_ref(), self.config.launch_timeout()).await {
                        Ok(worker) => {
                            let mut st = self.state.lock().unwrap();
                            st.workers.insert(placeholder, worker);
                            let jid = st.alloc_job_id();
                            st.bind(placeholder, jid, &proto, &host, job.url());
                            drop(st);
                            debug!(?placeholder, proto, "launched fresh worker");
                            job.set_worker(Some(placeholder));
                            return Ok((placeholder, jid));
                        }
                        Err(e) => {
                            let mut st = self.state.lock().unwrap();
                            st.workers.remove(&placeholder);
                            if let Some(pq) = st.protocols.get_mut(&proto) {
                                pq.all.retain(|id| *id != placeholder);
                            }
                            drop(st);
                            self.capacity_freed.notify_waiters();
                            return Err(e);
                        }
                    }
                }
                Plan::Busy => {
                    tokio::select! {
                        _ = self.capacity_freed.notified() => {}
                        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                    }
                }
            }
        }
    }

    fn plan_assignment(&self, proto: &str, host: &str, url: &Url) -> Plan {
        let mut st = self.state.lock().unwrap();

        if !st.protocols.contains_key(proto) {
            let pq = ProtoQueue::new(&self.config);
            st.protocols.insert(proto.to_string(), pq);
        }

        // Per-host admission
        if !host.is_empty() {
            let pq = &st.protocols[proto];
            if let Some(hq) = pq.hosts.get(host)
                && hq.running_jobs >= pq.max_workers_per_host
            {
                return Plan::Busy;
            }
        }

        // A worker held for exactly this URL resumes for it
        if st.url_on_hold.as_ref() == Some(url)
            && let Some(wid) = st.worker_on_hold
        {
            st.url_on_hold = None;
            st.worker_on_hold = None;
            if let Some(worker) = st.workers.get_mut(&wid) {
                worker.unhold();
                let jid = st.alloc_job_id();
                st.bind(wid, jid, proto, host, url);
                return Plan::Assigned(wid, jid);
            }
        }

        // Discard idle workers that died while parked
        let dead: Vec<WorkerId> = st.protocols[proto]
            .idle
            .iter()
            .copied()
            .filter(|wid| !st.workers.get(wid).is_some_and(|w| w.is_alive()))
            .collect();
        for wid in dead {
            debug!(?wid, proto, "dropping dead idle worker");
            st.workers.remove(&wid);
            if let Some(pq) = st.protocols.get_mut(proto) {
                pq.idle.retain(|id| *id != wid);
                pq.all.retain(|id| *id != wid);
            }
        }

        // Reuse the first idle worker already bound to this host (or bound
        // to none); workers keep their session with a host warm, so a
        // different host prefers a fresh worker while the pool has room
        let matching = st.protocols[proto].idle.iter().position(|wid| {
            st.workers
                .get(wid)
                .is_some_and(|w| w.host_name() == host || w.host().is_none())
        });
        if let Some(position) = matching {
            let wid = st
                .protocols
                .get_mut(proto)
                .and_then(|pq| pq.idle.remove(position))
                .expect("indexed idle worker exists");
            let jid = st.alloc_job_id();
            st.bind(wid, jid, proto, host, url);
            return Plan::Assigned(wid, jid);
        }

        // Launch a new worker if the pool has room
        let max_workers = st.protocols[proto].max_workers;
        if st.protocols[proto].all.len() < max_workers {
            let wid = st.alloc_worker_id();
            st.workers.insert(wid, Worker::placeholder(proto));
            st.protocols.get_mut(proto).expect("queue exists").all.push(wid);
            return Plan::NeedsLaunch(wid);
        }

        // At capacity: rebind any idle worker to the new host
        if let Some(wid) = st.protocols.get_mut(proto).and_then(|pq| pq.idle.pop_front()) {
            let jid = st.alloc_job_id();
            st.bind(wid, jid, proto, host, url);
            return Plan::Assigned(wid, jid);
        }

        Plan::Busy
    }

    /// Detach a job from its worker and return the worker to the idle pool.
    /// Safe to call when the job was never assigned.
    pub fn cancel_job(&self, job: &mut SimpleJob) {
        let Some(wid) = job.worker() else { return };
        let jid = {
            let st = self.state.lock().unwrap();
            st.workers.get(&wid).and_then(|w| w.job())
        };
        if let Some(jid) = jid {
            self.finish_internal(jid, wid, None);
        }
        job.set_worker(None);
    }

    /// Release a job's worker back to the pool. Idempotent; jobs driven by
    /// [`run_job`](Self::run_job) are finished automatically.
    pub fn job_finished(&self, job: &mut SimpleJob) {
        self.cancel_job(job);
    }

    /// Run a job to completion: assign a worker, stream the command, pump
    /// replies, and return the worker to the pool. Follows redirects when
    /// the job has redirection handling enabled.
    pub async fn run_job(&self, job: &mut SimpleJob) -> Result<JobResult> {
        loop {
            let (wid, jid) = self.do_job(job).await.map_err(|e| {
                let kind = e.kind();
                job.set_error(kind, &e.to_string());
                e
            })?;

            let connection = {
                let mut st = self.state.lock().unwrap();
                st.workers.get_mut(&wid).and_then(|w| w.take_connection())
            };
            let Some(mut connection) = connection else {
                let message = "worker has no transport".to_string();
                job.set_error(ErrorKind::WorkerDied, &message);
                self.worker_died_internal(Some(jid), wid);
                job.set_worker(None);
                return Err(PoolError::job(ErrorKind::WorkerDied, message));
            };
            if connection.is_suspended()
                && let Err(e) = connection.resume().await
            {
                let message = format!("worker process died: {e}");
                job.set_error(ErrorKind::WorkerDied, &message);
                self.worker_died_internal(Some(jid), wid);
                job.set_worker(None);
                return Err(PoolError::job(ErrorKind::WorkerDied, message));
            }

            job.set_running(true);
            let outcome = drive(&mut connection, job).await;
            job.set_running(false);

            match outcome {
                Ok(DriveOutcome::Finished(result)) => {
                    self.finish_internal(jid, wid, Some(connection));
                    job.set_worker(None);
                    return Ok(result);
                }
                Ok(DriveOutcome::Redirect(url)) => {
                    self.finish_internal(jid, wid, Some(connection));
                    job.set_worker(None);
                    if job.redirection_handling_enabled() {
                        debug!(%url, "following redirect");
                        job.set_url(url);
                        continue;
                    }
                    return Ok(JobResult {
                        redirect: Some(url),
                        ..JobResult::default()
                    });
                }
                Ok(DriveOutcome::Error(kind, message)) => {
                    job.set_error(kind, &message);
                    self.finish_internal(jid, wid, Some(connection));
                    job.set_worker(None);
                    return Err(PoolError::job(kind, message));
                }
                Err(e) => {
                    // Transport failure mid-job: the worker is gone
                    warn!(?wid, error = %e, "worker died mid-job");
                    let message = format!("worker process died: {e}");
                    job.set_error(ErrorKind::WorkerDied, &message);
                    self.worker_died_internal(Some(jid), wid);
                    job.set_worker(None);
                    return Err(PoolError::job(ErrorKind::WorkerDied, message));
                }
            }
        }
    }

    /// Return a worker to the idle pool once its job is done. Idempotent.
    fn finish_internal(&self, jid: JobId, wid: WorkerId, connection: Option<Connection>) {
        let mut st = self.state.lock().unwrap();

        if let Some(worker) = st.workers.get_mut(&wid) {
            if let Some(connection) = connection {
                worker.restore_connection(connection);
            }
            if worker.job() == Some(jid) {
                worker.set_job(None);
                worker.ref_release();
            }
        }

        let proto = st.workers.get(&wid).map(|w| w.protocol().to_string());
        let alive_and_free = st
            .workers
            .get(&wid)
            .is_some_and(|w| w.is_alive() && !w.on_hold() && w.job().is_none());
        if let Some(proto) = proto
            && let Some(pq) = st.protocols.get_mut(&proto)
        {
            for hq in pq.hosts.values_mut() {
                if hq.jobs.remove(&jid) {
                    hq.running_jobs = hq.running_jobs.saturating_sub(1);
                }
            }
            if alive_and_free && !pq.idle.contains(&wid) {
                pq.idle.push_back(wid);
            }
        }

        drop(st);
        self.capacity_freed.notify_waiters();
    }

    /// Remove a worker from every pool and fail its job, if any
    pub fn worker_died(&self, wid: WorkerId) {
        self.worker_died_internal(None, wid);
    }

    fn worker_died_internal(&self, jid: Option<JobId>, wid: WorkerId) {
        let mut st = self.state.lock().unwrap();

        let Some(mut worker) = st.workers.remove(&wid) else {
            return;
        };
        worker.mark_failed();
        let jid = jid.or(worker.job());
        let proto = worker.protocol().to_string();

        if let Some(pq) = st.protocols.get_mut(&proto) {
            pq.all.retain(|id| *id != wid);
            pq.idle.retain(|id| *id != wid);
            for hq in pq.hosts.values_mut() {
                hq.workers.retain(|id| *id != wid);
                if let Some(jid) = jid
                    && hq.jobs.remove(&jid)
                {
                    hq.running_jobs = hq.running_jobs.saturating_sub(1);
                }
            }
        }

        if st.worker_on_hold == Some(wid) {
            st.worker_on_hold = None;
            st.url_on_hold = None;
        }

        drop(st);
        self.capacity_freed.notify_waiters();
    }

    /// Park the job's worker with its session warm, remembered for `url`.
    /// The next job against the same URL reuses it.
    pub fn put_worker_on_hold(&self, job: &SimpleJob, url: Url) {
        let Some(wid) = job.worker().or(job.last_worker()) else {
            return;
        };

        let mut st = self.state.lock().unwrap();
        let Some(worker) = st.workers.get_mut(&wid) else {
            return;
        };
        if worker.job().is_some() {
            warn!(?wid, "refusing to hold a worker with an active job");
            return;
        }
        debug!(?wid, %url, "parking worker on hold");
        worker.hold();
        let proto = worker.protocol().to_string();
        if let Some(pq) = st.protocols.get_mut(&proto) {
            pq.idle.retain(|id| *id != wid);
        }
        st.url_on_hold = Some(url);
        st.worker_on_hold = Some(wid);
    }

    /// Whether a worker is parked for exactly this URL
    pub fn is_worker_on_hold_for(&self, url: &Url) -> bool {
        let st = self.state.lock().unwrap();
        st.worker_on_hold.is_some() && st.url_on_hold.as_ref() == Some(url)
    }

    /// Release the parked worker back into the idle pool
    pub fn remove_worker_on_hold(&self) {
        let mut st = self.state.lock().unwrap();
        let Some(wid) = st.worker_on_hold.take() else {
            return;
        };
        st.url_on_hold = None;

        if let Some(worker) = st.workers.get_mut(&wid) {
            worker.unhold();
            let proto = worker.protocol().to_string();
            let alive = worker.is_alive();
            if alive
                && let Some(pq) = st.protocols.get_mut(&proto)
                && !pq.idle.contains(&wid)
            {
                pq.idle.push_back(wid);
            }
        }
        drop(st);
        self.capacity_freed.notify_waiters();
    }

    /// Drop idle workers that have been unused for at least `max_idle`
    pub fn reap_idle(&self, max_idle: Duration) -> usize {
        let mut st = self.state.lock().unwrap();
        let mut reaped = 0;

        let expired: Vec<WorkerId> = st
            .workers
            .iter()
            .filter(|(_, w)| w.is_idle() && !w.on_hold() && w.idle_time() >= max_idle)
            .map(|(id, _)| *id)
            .collect();

        for wid in expired {
            if let Some(worker) = st.workers.remove(&wid) {
                let proto = worker.protocol().to_string();
                if let Some(pq) = st.protocols.get_mut(&proto) {
                    pq.all.retain(|id| *id != wid);
                    pq.idle.retain(|id| *id != wid);
                    for hq in pq.hosts.values_mut() {
                        hq.workers.retain(|id| *id != wid);
                    }
                }
                reaped += 1;
            }
        }
        reaped
    }

    /// Terminate every worker and clear the pools
    pub async fn shutdown(&self) {
        let workers: Vec<Worker> = {
            let mut st = self.state.lock().unwrap();
            st.protocols.clear();
            st.worker_on_hold = None;
            st.url_on_hold = None;
            st.workers.drain().map(|(_, w)| w).collect()
        };
        for mut worker in workers {
            worker.shutdown().await;
        }
    }

    // === introspection (tests, CLI status output) ===

    pub fn worker_count(&self, protocol: &str) -> usize {
        let st = self.state.lock().unwrap();
        st.protocols.get(protocol).map_or(0, |pq| pq.all.len())
    }

    pub fn idle_count(&self, protocol: &str) -> usize {
        let st = self.state.lock().unwrap();
        st.protocols.get(protocol).map_or(0, |pq| pq.idle.len())
    }

    pub fn running_jobs(&self, protocol: &str, host: &str) -> usize {
        let st = self.state.lock().unwrap();
        st.protocols
            .get(protocol)
            .and_then(|pq| pq.hosts.get(host))
            .map_or(0, |hq| hq.running_jobs)
    }
}

enum DriveOutcome {
    Finished(JobResult),
    Redirect(Url),
    Error(ErrorKind, String),
}

/// Stream the job's command to the worker and pump replies until terminal
async fn drive(connection: &mut Connection, job: &SimpleJob) -> Result<DriveOutcome> {
    // Bind the host first when the URL names one
    if let Some(host) = job.url().host_str() {
        let host_payload = payload::to_bytes(&HostPayload {
            host: host.to_string(),
            port: job.url().port().unwrap_or(0),
            user: job.url().username().to_string(),
            password: job.url().password().unwrap_or("").to_string(),
        })?;
        connection.send(Command::Host.code(), &host_payload).await?;
    }

    connection.send(job.command().code(), job.payload()).await?;

    // PUT-style jobs stream their bytes as DATA frames, empty frame = EOF
    if let Some(data) = job.attached_data() {
        for chunk in data.chunks(64 * 1024) {
            connection.send(Command::Data.code(), chunk).await?;
        }
        connection.send(Command::Data.code(), b"").await?;
    }

    let mut result = JobResult::default();
    loop {
        let task = connection.next_command().await?;
        match Command::try_from(task.cmd) {
            Ok(Command::Data) => {
                if matches!(job.command(), Command::Du | Command::DuRecursive) {
                    result.du = Some(payload::from_bytes(&task.payload)?);
                } else {
                    result.data.extend_from_slice(&task.payload);
                }
            }
            Ok(Command::StatEntry) => {
                result.stat = Some(payload::from_bytes(&task.payload)?);
            }
            Ok(Command::ListEntries) => {
                let list: ListEntriesPayload = payload::from_bytes(&task.payload)?;
                result.entries = list.entries;
            }
            Ok(Command::Finished) => return Ok(DriveOutcome::Finished(result)),
            Ok(Command::Error) => {
                let err: ErrorPayload = payload::from_bytes(&task.payload)?;
                return Ok(DriveOutcome::Error(err.code, err.message));
            }
            Ok(Command::HostInfo) => {
                let info: HostInfoPayload = payload::from_bytes(&task.payload)?;
                if let Some(target) = info.redirect
                    && let Ok(url) = Url::parse(&target)
                {
                    return Ok(DriveOutcome::Redirect(url));
                }
            }
            Ok(other) => {
                warn!(?other, "unexpected reply command, ignoring");
            }
            Err(code) => return Err(PoolError::UnknownCommand(code)),
        }
    }
}
