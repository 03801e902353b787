//! # devctl-core - coordination core for an autonomous-development control plane
//!
//! This crate implements the eight subsystems that coordinate an automated
//! development loop driving one or more coding agents: a priority message
//! bus, tiered context memory, layered circuit breakers, an adaptive loop
//! controller, a feature dependency engine, a work-stealing task
//! dispatcher, a flaky-test quarantine engine, and a parameter
//! self-optimizer.
//!
//! The crate has no network listener, no CLI, and no subprocess
//! integration: it is a library that a host process (an agent runner, a
//! CLI, a CI hook) wires together and drives.
//!
//! ## Architecture
//!
//! Each component owns its state, its error type, and its own
//! `save`/`load` persistence to a JSON file. Components are independently
//! usable; the host process is responsible for wiring them together (for
//! example, feeding a circuit breaker's trip into the loop controller's
//! stop decision, or a dispatcher's task completion into the metrics
//! sink).

pub mod bus;
pub mod context;
pub mod breakers;
pub mod dependency;
pub mod dispatch;
pub mod domain_types;
pub mod error;
pub mod error_classifier;
pub mod flaky;
pub mod loop_controller;
pub mod metrics;
pub mod optimizer;
pub mod parsers;
pub mod persistence;
pub mod time_provider;
pub mod utils;

// Common imports, following the teacher's re-export-at-crate-root pattern
// so every module can `use crate::*;` for the ambient stack.
pub use ::tracing::{debug, error, info, instrument, warn};
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use std::collections::HashMap;
pub use std::time::Duration;
pub use thiserror::Error;
pub use tokio::time::timeout;
pub use uuid::Uuid;
