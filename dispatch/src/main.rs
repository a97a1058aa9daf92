//! dsp - CLI entry point for the dispatcher master and workers

use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{info, warn};

use dispatch::cli::{Cli, Command};
use dispatch::config::{MasterConfig, SlaveConfig};
use dispatch::executor::ExecutorRegistry;
use dispatch::master::{Master, MasterEvent};
use dispatch::protocol::TaskSpec;
use dispatch::slave::SlaveRuntime;

fn setup_logging(cli_log_level: Option<&str>) -> Result<()> {
    let filter = match cli_log_level {
        Some(level) => tracing_subscriber::EnvFilter::try_new(level).context("Invalid log level")?,
        None => tracing_subscriber::EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
    Ok(())
}

async fn run_master(config: MasterConfig, spawn: usize, demo: bool) -> Result<()> {
    let endpoint = config.endpoint();
    let master = Master::new(config);
    let handle = master.handle();
    let actor = tokio::spawn(master.run());
    let listener = tokio::spawn(dispatch::master::run_listener(endpoint.clone(), handle.clone()));

    // Spawn local worker children pointed at our endpoint
    let exe = std::env::current_exe().context("cannot resolve executable")?;
    let mut children = Vec::new();
    for _ in 0..spawn {
        let child = tokio::process::Command::new(&exe)
            .arg("worker")
            .arg("--endpoint")
            .arg(&endpoint)
            .spawn()
            .context("failed to spawn worker")?;
        children.push(child);
    }

    // Log master events as they happen
    let mut events = handle.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                MasterEvent::TaskCompleted { task_id, detail } => info!(%task_id, detail, "completed"),
                MasterEvent::TaskFailed { task_id, message } => warn!(%task_id, message, "failed"),
                other => info!(?other, "event"),
            }
        }
    });

    if demo {
        let demo_handle = handle.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(3));
            loop {
                tick.tick().await;
                let task = TaskSpec::new("Sleep").with_parameter("duration_ms", "1000");
                if demo_handle.submit_task(task).await.is_err() {
                    break;
                }
            }
        });
    }

    tokio::signal::ctrl_c().await.context("failed to wait for ctrl-c")?;
    info!("interrupt received, shutting down");
    handle.shutdown().await?;

    // Children that ignored the shutdown message get a SIGTERM
    for child in &mut children {
        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }
    for mut child in children {
        let _ = child.wait().await;
    }

    listener.abort();
    event_logger.abort();
    let _ = actor.await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref())?;

    match cli.command {
        Command::Master { endpoint, spawn, demo } => {
            let mut config = match &cli.config {
                Some(path) => MasterConfig::load(path)?,
                None => MasterConfig::default(),
            };
            if let Some(endpoint) = endpoint {
                config.endpoint = Some(endpoint);
            }
            run_master(config, spawn, demo).await
        }

        Command::Worker { endpoint } => {
            let mut config = match &cli.config {
                Some(path) => SlaveConfig::load(path)?,
                None => SlaveConfig::default(),
            };
            if let Some(endpoint) = endpoint {
                config.endpoint = Some(endpoint);
            }
            let runtime = SlaveRuntime::new(config, ExecutorRegistry::with_builtin());
            runtime.run().await
        }
    }
}
