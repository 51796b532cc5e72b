//! snapstate CLI entry point
//!
//! Parses arguments, installs logging and dispatches to `cli::run`.
//! Errors go to stderr with exit code 1.

use snapstate::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
