//! wpool - CLI entry point: pool client commands and the worker process

use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result, bail};
use url::Url;

use wpool::cli::{Cli, Command};
use wpool::config::PoolConfig;
use wpool::job::SimpleJob;
use wpool::protocols::FileProtocol;
use wpool::scheduler::Scheduler;
use wpool::worker::ProcessLauncher;

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

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).with_context(|| format!("Invalid URL: {raw}"))
}

fn scheduler_from(config: PoolConfig) -> Scheduler {
    let launcher = Arc::new(ProcessLauncher::new(config.worker_command.clone()));
    Scheduler::new(config, launcher)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref())?;

    let config = match &cli.config {
        Some(path) => PoolConfig::load(path)?,
        None => PoolConfig::default(),
    };

    match cli.command {
        Command::Serve { protocol, endpoint } => {
            if protocol != "file" {
                bail!("unknown protocol: {protocol}");
            }
            wpool::runtime::serve(&endpoint, FileProtocol::new())
                .await
                .context("worker runtime failed")?;
            Ok(())
        }

        Command::Ls { url } => {
            let scheduler = scheduler_from(config);
            let mut job = SimpleJob::listdir(parse_url(&url)?)?;
            let result = scheduler.run_job(&mut job).await?;
            for entry in result.entries {
                let marker = if entry.is_dir { "/" } else { "" };
                println!("{:>12}  {}{}", entry.size, entry.name, marker);
            }
            scheduler.shutdown().await;
            Ok(())
        }

        Command::Stat { url } => {
            let scheduler = scheduler_from(config);
            let mut job = SimpleJob::stat(parse_url(&url)?)?;
            let result = scheduler.run_job(&mut job).await?;
            if let Some(stat) = result.stat {
                println!(
                    "{}  size={}  dir={}  mode={:o}",
                    stat.name, stat.size, stat.is_dir, stat.mode
                );
            }
            scheduler.shutdown().await;
            Ok(())
        }

        Command::Du { url, recursive } => {
            let scheduler = scheduler_from(config);
            let mut job = SimpleJob::du(parse_url(&url)?, recursive)?;
            let result = scheduler.run_job(&mut job).await?;
            if let Some(du) = result.du {
                println!("{} bytes in {} files, {} dirs", du.bytes, du.files, du.dirs);
            }
            scheduler.shutdown().await;
            Ok(())
        }

        Command::Rm { url } => {
            let scheduler = scheduler_from(config);
            let mut job = SimpleJob::file_delete(parse_url(&url)?, wpool::JobFlags::NONE)?;
            scheduler.run_job(&mut job).await?;
            scheduler.shutdown().await;
            Ok(())
        }
    }
}
