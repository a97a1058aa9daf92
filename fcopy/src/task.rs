//! Copy task: state machine, worker thread ownership and event fan-out
//!
//! A [`CopyTask`] spawns its worker thread on construction and tears it down
//! on drop. Control flows through the pause latch; results flow back as
//! [`TaskEvent`]s on a channel. Illegal state transitions are silently
//! ignored and terminal states emit exactly one [`TaskEvent::Finished`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::algorithm::CopyAlgorithm;
use crate::hooks::TaskHooks;
use crate::worker::{CopyWorker, PauseLatch, WorkerEvents};

/// Lifecycle state of a copy task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Running,
    Paused,
    Completed,
    Stopped,
    Error,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Error)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Legal state transitions; everything else is ignored
pub fn is_valid_transition(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;
    match from {
        Created => matches!(to, Running),
        Running => matches!(to, Paused | Completed | Stopped | Error),
        Paused => matches!(to, Running | Stopped),
        Completed | Stopped | Error => false,
    }
}

/// Byte-level progress of a task; percentage is undefined while total is zero
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyProgress {
    pub total_bytes: u64,
    pub copied_bytes: u64,
    pub current_file: Option<PathBuf>,
}

impl CopyProgress {
    pub fn percent(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            None
        } else {
            Some(self.copied_bytes as f64 * 100.0 / self.total_bytes as f64)
        }
    }
}

/// Notifications delivered to the task's subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    StateChanged(TaskState),
    ProgressChanged(CopyProgress),
    ErrorOccurred(String),
    Finished,
}

struct TaskInner {
    state: Mutex<TaskState>,
    progress: Mutex<CopyProgress>,
    error: Mutex<Option<String>>,
    latch: Arc<PauseLatch>,
    hooks: Option<Arc<dyn TaskHooks>>,
    events: Sender<TaskEvent>,
    finished_emitted: AtomicBool,
}

impl TaskInner {
    /// Apply a transition if legal; emits `StateChanged` and returns whether
    /// the state changed.
    fn transition(&self, to: TaskState) -> bool {
        let mut state = self.state.lock().unwrap();
        if !is_valid_transition(*state, to) {
            debug!(from = %*state, to = %to, "ignoring illegal state transition");
            return false;
        }
        *state = to;
        drop(state);
        let _ = self.events.send(TaskEvent::StateChanged(to));
        true
    }

    /// Emit the single terminal notification
    fn emit_finished(&self) {
        if !self.finished_emitted.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(TaskEvent::Finished);
        }
    }

    fn send_progress(&self) {
        let snapshot = self.progress.lock().unwrap().clone();
        let _ = self.events.send(TaskEvent::ProgressChanged(snapshot));
    }
}

impl WorkerEvents for TaskInner {
    fn progress(&self, copied: u64, total: u64, _current: &Path) {
        {
            let mut progress = self.progress.lock().unwrap();
            progress.copied_bytes = copied;
            progress.total_bytes = total;
        }
        self.send_progress();
    }

    fn file_started(&self, path: &Path) {
        self.progress.lock().unwrap().current_file = Some(path.to_path_buf());
        self.send_progress();
    }

    fn file_completed(&self, _path: &Path) {
        self.send_progress();
    }

    fn completed(&self) {
        // A pause request can land between the final chunk and this call;
        // the copy is already done, so undo the pause and complete.
        let done = self.transition(TaskState::Completed)
            || (self.transition(TaskState::Running) && self.transition(TaskState::Completed));
        if done {
            if let Some(hooks) = &self.hooks {
                hooks.on_task_complete();
            }
            self.emit_finished();
        }
    }

    fn stopped(&self) {
        // The owner usually set Stopped already; the worker confirmation
        // still owns the terminal notification.
        self.transition(TaskState::Stopped);
        self.emit_finished();
    }

    fn failed(&self, message: &str) {
        *self.error.lock().unwrap() = Some(message.to_string());
        // Same late-pause window as `completed`
        let done = self.transition(TaskState::Error)
            || (self.transition(TaskState::Running) && self.transition(TaskState::Error));
        if done {
            if let Some(hooks) = &self.hooks {
                hooks.on_task_error(message);
            }
            let _ = self.events.send(TaskEvent::ErrorOccurred(message.to_string()));
            self.emit_finished();
        } else {
            warn!(message, "worker error after terminal state");
        }
    }
}

/// A copy operation with a lifecycle state machine and its own worker thread
pub struct CopyTask {
    source: PathBuf,
    dest: PathBuf,
    algorithm_name: String,
    inner: Arc<TaskInner>,
    start_tx: Mutex<Option<Sender<()>>>,
    events_rx: Mutex<Option<Receiver<TaskEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CopyTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyTask")
            .field("source", &self.source)
            .field("dest", &self.dest)
            .field("algorithm_name", &self.algorithm_name)
            .finish()
    }
}

impl CopyTask {
    /// Create the task and spawn its worker thread. The worker idles until
    /// [`start`](Self::start) is called.
    pub fn new(
        source: impl Into<PathBuf>,
        dest: impl Into<PathBuf>,
        algorithm: Box<dyn CopyAlgorithm>,
        hooks: Option<Arc<dyn TaskHooks>>,
    ) -> Self {
        let source = source.into();
        let dest = dest.into();
        let algorithm_name = algorithm.name().to_string();

        let (events_tx, events_rx) = channel();
        let inner = Arc::new(TaskInner {
            state: Mutex::new(TaskState::Created),
            progress: Mutex::new(CopyProgress::default()),
            error: Mutex::new(None),
            latch: Arc::new(PauseLatch::new()),
            hooks,
            events: events_tx,
            finished_emitted: AtomicBool::new(false),
        });

        let (start_tx, start_rx) = channel::<()>();
        let worker = {
            let inner = inner.clone();
            let source = source.clone();
            let dest = dest.clone();
            let mut algorithm = algorithm;
            std::thread::spawn(move || {
                // Wait for the start signal; a dropped sender means the task
                // was dropped before starting.
                if start_rx.recv().is_err() {
                    return;
                }
                let worker = CopyWorker::new(inner.latch.clone(), inner.clone());
                worker.run(&source, &dest, &mut *algorithm);
            })
        };

        Self {
            source,
            dest,
            algorithm_name,
            inner,
            start_tx: Mutex::new(Some(start_tx)),
            events_rx: Mutex::new(Some(events_rx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    pub fn algorithm_name(&self) -> &str {
        &self.algorithm_name
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        *self.inner.state.lock().unwrap()
    }

    /// Progress snapshot
    pub fn progress(&self) -> CopyProgress {
        self.inner.progress.lock().unwrap().clone()
    }

    /// Last error message, if the task failed
    pub fn error_message(&self) -> Option<String> {
        self.inner.error.lock().unwrap().clone()
    }

    /// Take the event receiver; only the first caller gets it
    pub fn events(&self) -> Option<Receiver<TaskEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    /// Begin copying. Ignored unless the task is freshly created.
    pub fn start(&self) {
        if self.state() != TaskState::Created || !self.inner.transition(TaskState::Running) {
            return;
        }
        if let Some(hooks) = &self.inner.hooks {
            hooks.on_task_start();
        }
        if let Some(tx) = self.start_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    /// Pause a running task; takes effect at the next chunk boundary
    pub fn pause(&self) {
        if !self.inner.transition(TaskState::Paused) {
            return;
        }
        self.inner.latch.pause();
        if let Some(hooks) = &self.inner.hooks {
            hooks.on_task_pause();
        }
    }

    /// Resume a paused task
    pub fn resume(&self) {
        let state = self.state();
        if state != TaskState::Paused || !self.inner.transition(TaskState::Running) {
            return;
        }
        self.inner.latch.resume();
        if let Some(hooks) = &self.inner.hooks {
            hooks.on_task_resume();
        }
    }

    /// Request a cooperative stop
    pub fn stop(&self) {
        if !self.inner.transition(TaskState::Stopped) {
            return;
        }
        self.inner.latch.stop();
    }
}

impl Drop for CopyTask {
    fn drop(&mut self) {
        self.inner.latch.stop();
        // Unblock a worker that never got a start signal
        self.start_tx.lock().unwrap().take();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{CHUNK_SIZE, DefaultAlgorithm};
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    fn new_task(source: &Path, dest: &Path) -> CopyTask {
        CopyTask::new(source, dest, Box::new(DefaultAlgorithm::chunked_only()), None)
    }

    /// Drain events until Finished (or time out), returning everything seen
    fn wait_for_finished(rx: &Receiver<TaskEvent>) -> Vec<TaskEvent> {
        let mut seen = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(event) => {
                    let done = event == TaskEvent::Finished;
                    seen.push(event);
                    if done {
                        return seen;
                    }
                }
                Err(_) => panic!("timed out waiting for Finished; saw {seen:?}"),
            }
        }
    }

    #[test]
    fn test_transition_table_matches_contract() {
        use TaskState::*;
        let all = [Created, Running, Paused, Completed, Stopped, Error];

        let legal = [
            (Created, Running),
            (Running, Paused),
            (Running, Completed),
            (Running, Stopped),
            (Running, Error),
            (Paused, Running),
            (Paused, Stopped),
        ];

        for from in all {
            for to in all {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    is_valid_transition(from, to),
                    expected,
                    "transition {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Stopped.is_terminal());
        assert!(TaskState::Error.is_terminal());
        assert!(!TaskState::Created.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Paused.is_terminal());
    }

    #[test]
    fn test_percent_undefined_for_zero_total() {
        let progress = CopyProgress::default();
        assert_eq!(progress.percent(), None);

        let progress = CopyProgress {
            total_bytes: 200,
            copied_bytes: 50,
            current_file: None,
        };
        assert_eq!(progress.percent(), Some(25.0));
    }

    #[test]
    fn test_task_runs_to_completion_with_single_finished() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::write(&src, vec![5u8; 20_000]).unwrap();

        let task = new_task(&src, &dst);
        let rx = task.events().unwrap();
        assert_eq!(task.state(), TaskState::Created);

        task.start();
        let events = wait_for_finished(&rx);

        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(fs::read(&dst).unwrap().len(), 20_000);

        let finished = events.iter().filter(|e| **e == TaskEvent::Finished).count();
        assert_eq!(finished, 1);
        assert!(events.contains(&TaskEvent::StateChanged(TaskState::Running)));
        assert!(events.contains(&TaskEvent::StateChanged(TaskState::Completed)));

        // No further terminal events arrive afterwards
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_illegal_transitions_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::write(&src, b"data").unwrap();

        let task = new_task(&src, &tmp.path().join("dst"));

        // Pause/resume/stop before start are all illegal from Created
        task.pause();
        assert_eq!(task.state(), TaskState::Created);
        task.resume();
        assert_eq!(task.state(), TaskState::Created);
        task.stop();
        assert_eq!(task.state(), TaskState::Created);
    }

    #[test]
    fn test_start_after_completion_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::write(&src, b"data").unwrap();

        let task = new_task(&src, &tmp.path().join("dst"));
        let rx = task.events().unwrap();
        task.start();
        wait_for_finished(&rx);

        task.start();
        assert_eq!(task.state(), TaskState::Completed);
    }

    #[test]
    fn test_stop_mid_copy_reaches_stopped_and_removes_partial() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::write(&src, vec![1u8; CHUNK_SIZE * 8]).unwrap();

        let task = new_task(&src, &dst);
        let rx = task.events().unwrap();
        task.start();

        // Stop as soon as the first progress event shows up
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                TaskEvent::ProgressChanged(p) if p.copied_bytes > 0 => break,
                TaskEvent::Finished => panic!("finished before stop"),
                _ => {}
            }
        }
        task.stop();
        let events = wait_for_finished(&rx);

        assert_eq!(task.state(), TaskState::Stopped);
        assert!(!dst.exists());
        assert_eq!(events.iter().filter(|e| **e == TaskEvent::Finished).count(), 1);
    }

    #[test]
    fn test_error_transitions_and_reports_message() {
        let tmp = TempDir::new().unwrap();

        #[derive(Default)]
        struct CountingHooks {
            errors: AtomicUsize,
        }
        impl TaskHooks for CountingHooks {
            fn on_task_error(&self, _message: &str) {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
        }

        let hooks = Arc::new(CountingHooks::default());
        let task = CopyTask::new(
            tmp.path().join("missing"),
            tmp.path().join("dst"),
            Box::new(DefaultAlgorithm::new()),
            Some(hooks.clone()),
        );
        let rx = task.events().unwrap();
        task.start();
        let events = wait_for_finished(&rx);

        assert_eq!(task.state(), TaskState::Error);
        assert!(task.error_message().is_some());
        assert_eq!(hooks.errors.load(Ordering::SeqCst), 1);
        assert!(events.iter().any(|e| matches!(e, TaskEvent::ErrorOccurred(_))));
    }

    #[test]
    fn test_pause_then_resume_completes() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::write(&src, vec![2u8; CHUNK_SIZE * 4]).unwrap();

        let task = new_task(&src, &dst);
        let rx = task.events().unwrap();
        task.start();

        // Pause after the first progress event, then resume shortly after
        loop {
            match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
                TaskEvent::ProgressChanged(p) if p.copied_bytes > 0 => break,
                TaskEvent::Finished => panic!("finished before pause"),
                _ => {}
            }
        }
        task.pause();
        assert_eq!(task.state(), TaskState::Paused);
        std::thread::sleep(Duration::from_millis(50));
        task.resume();

        wait_for_finished(&rx);
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(fs::read(&dst).unwrap(), fs::read(&src).unwrap());
    }

    #[test]
    fn test_drop_unstarted_task_joins_cleanly() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::write(&src, b"x").unwrap();
        let task = new_task(&src, &tmp.path().join("dst"));
        drop(task);
    }

    #[test]
    fn test_events_receiver_taken_once() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::write(&src, b"x").unwrap();
        let task = new_task(&src, &tmp.path().join("dst"));

        assert!(task.events().is_some());
        assert!(task.events().is_none());
    }
}
