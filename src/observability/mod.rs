//! Observability for the snapshot runtime
//!
//! This module provides:
//! - Lifecycle event names
//! - Deterministic counters
//! - Subscriber installation for binaries
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No side effects on snapshot semantics
//! 3. No background threads
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! embedding program's choice.
//!
//! # Usage
//!
//! ```ignore
//! use snapstate::observability::{init_logging, Event};
//!
//! init_logging();
//! tracing::debug!(event = Event::SnapshotTaken.as_str(), snapshot_id = 7);
//! ```

mod events;
mod metrics;

pub use events::Event;
pub use metrics::{MetricsRegistry, MetricsSnapshot};

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls leave the first subscriber in
/// place.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
