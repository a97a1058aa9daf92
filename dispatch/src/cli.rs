//! CLI command definitions for the dispatcher

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// dsp - master/worker task dispatcher
#[derive(Parser)]
#[command(name = "dsp", about = "Master/worker task dispatcher over a local socket", version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the master: listen for workers and dispatch tasks
    Master {
        /// Socket path (defaults to the well-known endpoint)
        #[arg(short, long)]
        endpoint: Option<PathBuf>,

        /// Spawn this many local worker processes
        #[arg(short, long, default_value = "0")]
        spawn: usize,

        /// Submit a demo sleep task every few seconds
        #[arg(long)]
        demo: bool,
    },

    /// Run a worker process connecting to the master
    Worker {
        /// Socket path (defaults to the well-known endpoint)
        #[arg(short, long)]
        endpoint: Option<PathBuf>,
    },
}
