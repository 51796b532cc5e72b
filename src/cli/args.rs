//! CLI argument definitions using clap
//!
//! Commands:
//! - snapstate scenario
//! - snapstate stress --readers N --writers M --iterations K [--config <path>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// snapstate - Snapshot-isolated state objects
#[derive(Parser, Debug)]
#[command(name = "snapstate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Walk through the apply, conflict and nesting scenarios
    Scenario,

    /// Run concurrent readers against concurrent writers
    Stress {
        /// Reader threads
        #[arg(long, default_value_t = 4)]
        readers: usize,

        /// Writer threads
        #[arg(long, default_value_t = 4)]
        writers: usize,

        /// Snapshots applied per writer
        #[arg(long, default_value_t = 1000)]
        iterations: usize,

        /// State pairs shared by all threads
        #[arg(long, default_value_t = 8)]
        objects: usize,

        /// Path to a runtime configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stress_defaults() {
        let cli = Cli::try_parse_from(["snapstate", "stress"]).unwrap();
        match cli.command {
            Command::Stress {
                readers,
                writers,
                iterations,
                objects,
                config,
            } => {
                assert_eq!(readers, 4);
                assert_eq!(writers, 4);
                assert_eq!(iterations, 1000);
                assert_eq!(objects, 8);
                assert!(config.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_scenario() {
        let cli = Cli::try_parse_from(["snapstate", "scenario"]).unwrap();
        assert!(matches!(cli.command, Command::Scenario));
    }
}
