//! End-to-end dispatcher tests over real sockets
//!
//! A real master listener and real slave runtimes talk through a socket in a
//! tempdir; only the timers are shortened.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use dispatch::config::{MasterConfig, SlaveConfig};
use dispatch::executor::{ExecutorRegistry, ProgressSink, TaskExecutor};
use dispatch::master::{Master, MasterEvent, MasterHandle};
use dispatch::protocol::TaskSpec;
use dispatch::slave::SlaveRuntime;

struct QuickExecutor;

#[async_trait::async_trait]
impl TaskExecutor for QuickExecutor {
    fn task_type(&self) -> &str {
        "Quick"
    }

    async fn execute(&self, _spec: &TaskSpec, progress: &ProgressSink) -> eyre::Result<String> {
        progress.report(50.0, "working");
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok("done".to_string())
    }
}

fn start_master(tmp: &TempDir) -> (MasterHandle, std::path::PathBuf) {
    let endpoint = tmp.path().join("master.sock");
    let config = MasterConfig {
        endpoint: Some(endpoint.clone()),
        health_check_interval_ms: 50,
        heartbeat_timeout_ms: 200,
        ..MasterConfig::default()
    };

    let master = Master::new(config);
    let handle = master.handle();
    tokio::spawn(master.run());
    tokio::spawn(dispatch::master::run_listener(endpoint.clone(), handle.clone()));
    (handle, endpoint)
}

fn start_slave(endpoint: &std::path::Path) {
    let config = SlaveConfig {
        endpoint: Some(endpoint.to_path_buf()),
        heartbeat_interval_ms: 50,
        reconnect_backoff_ms: 100,
    };
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(QuickExecutor));
    let runtime = SlaveRuntime::new(config, registry);
    tokio::spawn(async move {
        let _ = runtime.run().await;
    });
}

async fn await_event<F>(handle: &MasterHandle, mut predicate: F, what: &str)
where
    F: FnMut(&MasterEvent) -> bool,
{
    let mut events = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if predicate(&event) {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn slave_registers_executes_and_completes_a_task() {
    let tmp = TempDir::new().unwrap();
    let (handle, endpoint) = start_master(&tmp);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Subscribe before acting so nothing is missed
    let mut events = handle.subscribe();
    start_slave(&endpoint);

    // Wait for registration, then submit
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let MasterEvent::SlaveRegistered { .. } = events.recv().await.unwrap() {
                break;
            }
        }
    })
    .await
    .expect("slave never registered");

    let task = TaskSpec::new("Quick");
    let task_id = task.task_id;
    handle.submit_task(task).await.unwrap();

    await_event(
        &handle,
        |e| matches!(e, MasterEvent::TaskCompleted { task_id: id, .. } if *id == task_id),
        "task completion",
    )
    .await;

    let metrics = handle.metrics().await.unwrap();
    assert_eq!(metrics.pending_tasks, 0);
    assert_eq!(metrics.assigned_tasks, 0);
    assert_eq!(metrics.completed_tasks, 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn task_without_a_capable_slave_stays_pending() {
    let tmp = TempDir::new().unwrap();
    let (handle, endpoint) = start_master(&tmp);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut events = handle.subscribe();
    start_slave(&endpoint);

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let MasterEvent::SlaveRegistered { .. } = events.recv().await.unwrap() {
                break;
            }
        }
    })
    .await
    .expect("slave never registered");

    // The slave only advertises "Quick"; a "Mystery" task has no taker
    let task = TaskSpec::new("Mystery").with_max_retries(1);
    let task_id = task.task_id;
    handle.submit_task(task).await.unwrap();

    let metrics = handle.metrics().await.unwrap();
    assert_eq!(metrics.pending_tasks, 1, "no capable slave, task queues");
    assert_eq!(metrics.assigned_tasks, 0);

    // Still queued after a few heartbeats
    tokio::time::sleep(Duration::from_millis(200)).await;
    let metrics = handle.metrics().await.unwrap();
    assert_eq!(metrics.pending_tasks, 1);
    let _ = task_id;

    handle.shutdown().await.unwrap();
}
