//! CLI module for snapstate
//!
//! Provides a developer harness for:
//! - scenario: Narrated apply, conflict and nesting walkthrough
//! - stress: Concurrent readers and writers with a consistency check

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{run, run_command, scenario, stress, StressOptions};
pub use errors::{CliError, CliErrorCode, CliResult};
