//! CLI command definitions for the worker pool

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// wpool - worker-pool client and worker process entry
#[derive(Parser)]
#[command(name = "wpool", about = "Per-protocol worker pool over framed IPC", version)]
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
    /// Internal: run as a worker process connected to the given endpoint
    #[command(hide = true)]
    Serve {
        /// Protocol to serve (only "file" is built in)
        protocol: String,

        /// Endpoint socket path handed over by the pool
        endpoint: PathBuf,
    },

    /// List a directory through a pooled worker
    Ls {
        /// URL, e.g. file:///tmp
        url: String,
    },

    /// Stat a file or directory through a pooled worker
    Stat {
        /// URL, e.g. file:///tmp/x
        url: String,
    },

    /// Disk usage of a path through a pooled worker
    Du {
        /// URL, e.g. file:///tmp
        url: String,

        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Delete a file through a pooled worker
    Rm {
        /// URL, e.g. file:///tmp/x
        url: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_subcommand() {
        let cli = Cli::parse_from(["wpool", "serve", "file", "/run/x.sock"]);
        match cli.command {
            Command::Serve { protocol, endpoint } => {
                assert_eq!(protocol, "file");
                assert_eq!(endpoint, PathBuf::from("/run/x.sock"));
            }
            _ => panic!("expected serve subcommand"),
        }
    }
}
