//! CLI command definitions for the copy engine

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// fcp - streaming file copier with pause/resume
#[derive(Parser)]
#[command(name = "fcp", about = "Streaming file copier with pluggable algorithms", version)]
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
    /// Copy a file or directory
    Copy {
        /// Source file or directory
        source: PathBuf,

        /// Destination path
        dest: PathBuf,

        /// Algorithm to use (default, sync)
        #[arg(short, long)]
        algorithm: Option<String>,

        /// Suppress the progress line
        #[arg(short, long)]
        quiet: bool,
    },

    /// List registered algorithms
    Algorithms,

    /// Print the total size of a file or directory tree in bytes
    Size {
        /// Path to measure
        path: PathBuf,
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
    fn test_copy_subcommand_args() {
        let cli = Cli::parse_from(["fcp", "copy", "/a", "/b", "--algorithm", "sync"]);
        match cli.command {
            Command::Copy {
                source,
                dest,
                algorithm,
                quiet,
            } => {
                assert_eq!(source, PathBuf::from("/a"));
                assert_eq!(dest, PathBuf::from("/b"));
                assert_eq!(algorithm.as_deref(), Some("sync"));
                assert!(!quiet);
            }
            _ => panic!("expected copy subcommand"),
        }
    }
}
