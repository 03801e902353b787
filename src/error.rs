//! Crate-level error glue.
//!
//! Each component defines and returns its own error enum (see
//! `bus::BusError`, `context::ContextError`, `breakers::BreakerError`,
//! `loop_controller::LoopError`, `dependency::GraphError`,
//! `dispatch::DispatchError`, `flaky::FlakyError`,
//! `optimizer::OptimizerError`, `metrics::MetricsError`). No component
//! converts another component's error into its own; callers that need to
//! bridge two components convert explicitly at the call site. This type
//! exists only for the handful of crate-wide concerns (persistence I/O)
//! shared by every component's `save`/`load` pair.

use thiserror::Error;

/// Failure modes shared by every component's file-backed persistence.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The snapshot file could not be read or written.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot file's contents did not parse as the expected shape.
    #[error("invalid snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}
