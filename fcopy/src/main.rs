//! fcp - CLI entry point for the copy engine

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result, bail};
use tracing::info;

use fcopy::cli::{Cli, Command};
use fcopy::config::CopyConfig;
use fcopy::hooks::LoggingHooks;
use fcopy::manager::TaskManager;
use fcopy::task::{TaskEvent, TaskState};
use fcopy::{ChunkTiers, SyncAlgorithm, fsutil};

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

fn run_copy(config: &CopyConfig, source: &std::path::Path, dest: &std::path::Path, algorithm: Option<String>, quiet: bool) -> Result<()> {
    let manager = TaskManager::with_builtin_algorithms();
    manager.set_hooks(Arc::new(LoggingHooks));

    // Sync algorithm honors the configured chunk tiers
    if config.chunk_tiers != ChunkTiers::default() {
        let tiers = config.chunk_tiers.clone();
        manager.register_algorithm(fcopy::AlgorithmDescriptor {
            name: "sync".to_string(),
            supports_pause: true,
            factory: Arc::new(move || Box::new(SyncAlgorithm::with_tiers(tiers.clone()))),
        });
    }

    let name = algorithm
        .or_else(|| config.default_algorithm.clone())
        .unwrap_or_else(|| "default".to_string());
    info!(algorithm = %name, "starting copy");

    let task = manager.create_task(source, dest, &name)?;
    let events = task.events().expect("fresh task has its event channel");
    manager.start_task(&task)?;

    for event in events {
        match event {
            TaskEvent::ProgressChanged(progress) => {
                if !quiet && let Some(percent) = progress.percent() {
                    print!(
                        "\r{:>6.1}%  {} / {} bytes",
                        percent, progress.copied_bytes, progress.total_bytes
                    );
                    let _ = std::io::stdout().flush();
                }
            }
            TaskEvent::ErrorOccurred(message) => {
                if !quiet {
                    println!();
                }
                eprintln!("error: {message}");
            }
            TaskEvent::Finished => break,
            TaskEvent::StateChanged(_) => {}
        }
    }
    if !quiet {
        println!();
    }

    match task.state() {
        TaskState::Completed => Ok(()),
        TaskState::Stopped => bail!("copy stopped"),
        _ => bail!(task.error_message().unwrap_or_else(|| "copy failed".to_string())),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref())?;

    let config = match &cli.config {
        Some(path) => CopyConfig::load(path)?,
        None => CopyConfig::default(),
    };

    match cli.command {
        Command::Copy {
            source,
            dest,
            algorithm,
            quiet,
        } => run_copy(&config, &source, &dest, algorithm, quiet),

        Command::Algorithms => {
            let manager = TaskManager::with_builtin_algorithms();
            for name in manager.available_algorithms() {
                let descriptor = manager.algorithm_descriptor(&name).expect("listed algorithm exists");
                println!(
                    "{name}  (pause: {})",
                    if descriptor.supports_pause { "yes" } else { "no" }
                );
            }
            Ok(())
        }

        Command::Size { path } => {
            let total = fsutil::calculate_total_size(&path)
                .with_context(|| format!("Failed to measure {}", path.display()))?;
            println!("{total}");
            Ok(())
        }
    }
}
