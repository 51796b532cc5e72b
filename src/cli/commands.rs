//! CLI command implementations
//!
//! `scenario` narrates the snapshot protocol step by step. `stress` runs
//! lock-free readers against conflicting writers and checks that every
//! read-only snapshot saw a consistent state.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use rand::Rng;
use tracing::info;

use crate::config::SnapshotConfig;
use crate::snapshot::{
    self, take_mutable_snapshot, take_readonly_snapshot, with_mutable_snapshot, ApplyResult,
};
use crate::state::{mutable_state_of, MutableState};

use super::args::Command;
use super::errors::{CliError, CliResult};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    crate::observability::init_logging();
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Scenario => scenario(),
        Command::Stress {
            readers,
            writers,
            iterations,
            objects,
            config,
        } => stress(
            StressOptions {
                readers,
                writers,
                iterations,
                objects,
            },
            config.as_deref(),
        ),
    }
}

fn expect(condition: bool, step: &str) -> CliResult<()> {
    if condition {
        println!("  ok   {}", step);
        Ok(())
    } else {
        Err(CliError::scenario_failed(step.to_string()))
    }
}

/// Walk through apply, conflict and nesting
pub fn scenario() -> CliResult<()> {
    println!("apply and conflict");
    let x = mutable_state_of(0i64);
    expect(*x.get()? == 0, "x created in the global snapshot with 0")?;

    let s1 = take_mutable_snapshot(None, None)?;
    x.set_in(&s1, 1)?;
    expect(*x.get()? == 0, "write in s1 is invisible outside s1")?;
    expect(s1.apply()?.is_success(), "s1 applies")?;

    let s2 = take_readonly_snapshot(None)?;
    expect(*x.get_in(&s2)? == 1, "fresh snapshot s2 reads 1")?;
    s2.dispose()?;

    let s3 = take_mutable_snapshot(None, None)?;
    let s4 = take_mutable_snapshot(None, None)?;
    x.set_in(&s3, 2)?;
    x.set_in(&s4, 3)?;
    expect(s3.apply()?.is_success(), "s3 writes 2 and applies")?;
    let result = s4.apply()?;
    expect(
        matches!(&result, ApplyResult::Failure { .. })
            && result.conflicting_ids() == vec![x.state_id()],
        "s4 writes 3 and conflicts on x",
    )?;
    s4.dispose()?;
    expect(*x.get()? == 2, "global state keeps 2")?;

    println!("nesting");
    let parent = take_mutable_snapshot(None, None)?;
    x.set_in(&parent, 5)?;
    let child = parent.take_nested_snapshot(None)?;
    expect(*x.get_in(&child)? == 5, "read-only child of the parent reads 5")?;
    x.set_in(&parent, 6)?;
    expect(*x.get_in(&child)? == 5, "child keeps 5 after the parent writes 6")?;
    child.dispose()?;
    parent.dispose()?;
    expect(*x.get()? == 2, "disposed parent leaves global state at 2")?;

    println!("{}", snapshot::metrics_json());
    Ok(())
}

/// Sizing for `stress`
#[derive(Debug, Clone, Copy)]
pub struct StressOptions {
    pub readers: usize,
    pub writers: usize,
    pub iterations: usize,
    pub objects: usize,
}

/// Two cells written together; a reader must always see them equal
struct Pair {
    left: MutableState<u64>,
    right: MutableState<u64>,
}

/// Concurrent readers and writers over shared pairs
pub fn stress(options: StressOptions, config_path: Option<&Path>) -> CliResult<()> {
    if let Some(path) = config_path {
        snapshot::configure(SnapshotConfig::load(path)?)?;
    }
    let pairs: Vec<Pair> = (0..options.objects.max(1))
        .map(|_| Pair {
            left: mutable_state_of(0),
            right: mutable_state_of(0),
        })
        .collect();
    let done = AtomicBool::new(false);
    let reads = AtomicU64::new(0);
    let conflicts = AtomicU64::new(0);

    let outcome: CliResult<()> = thread::scope(|scope| {
        let readers: Vec<_> = (0..options.readers)
            .map(|_| scope.spawn(|| read_loop(&pairs, &done, &reads)))
            .collect();
        let writers: Vec<_> = (0..options.writers)
            .map(|_| scope.spawn(|| write_loop(&pairs, options.iterations, &conflicts)))
            .collect();

        let mut result = Ok(());
        for writer in writers {
            let joined = writer.join().map_err(|_| CliError::worker_panicked("writer"));
            result = result.and(joined.and_then(|r| r));
        }
        done.store(true, Ordering::Release);
        for reader in readers {
            let joined = reader.join().map_err(|_| CliError::worker_panicked("reader"));
            result = result.and(joined.and_then(|r| r));
        }
        result
    });
    outcome?;

    info!(
        reads = reads.load(Ordering::Relaxed),
        conflicts = conflicts.load(Ordering::Relaxed),
        "stress run finished"
    );
    println!("{}", snapshot::metrics_json());
    Ok(())
}

fn read_loop(pairs: &[Pair], done: &AtomicBool, reads: &AtomicU64) -> CliResult<()> {
    while !done.load(Ordering::Acquire) {
        let snapshot = take_readonly_snapshot(None)?;
        for (index, pair) in pairs.iter().enumerate() {
            let left = *pair.left.get_in(&snapshot)?;
            let right = *pair.right.get_in(&snapshot)?;
            if left != right {
                return Err(CliError::inconsistent_read(format!(
                    "pair {} read ({}, {}) in snapshot {}",
                    index,
                    left,
                    right,
                    snapshot.id()
                )));
            }
        }
        snapshot.dispose()?;
        reads.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

fn write_loop(pairs: &[Pair], iterations: usize, conflicts: &AtomicU64) -> CliResult<()> {
    let mut rng = rand::thread_rng();
    for _ in 0..iterations {
        let pair = &pairs[rng.gen_range(0..pairs.len())];
        let result = with_mutable_snapshot(|| -> crate::snapshot::SnapshotResult<()> {
            let next = *pair.left.get()? + 1;
            pair.left.set(next)?;
            pair.right.set(next)?;
            Ok(())
        });
        match result {
            Ok(inner) => inner?,
            Err(e) if e.is_conflict() => {
                conflicts.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_passes() {
        scenario().unwrap();
    }

    #[test]
    fn test_small_stress_run_is_consistent() {
        stress(
            StressOptions {
                readers: 2,
                writers: 2,
                iterations: 50,
                objects: 2,
            },
            None,
        )
        .unwrap();
    }

    #[test]
    fn test_stress_rejects_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let err = stress(
            StressOptions {
                readers: 0,
                writers: 0,
                iterations: 0,
                objects: 1,
            },
            Some(&dir.path().join("missing.json")),
        )
        .unwrap_err();
        assert_eq!(err.code_str(), "SNAP_CLI_CONFIG_ERROR");
    }
}
