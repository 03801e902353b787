//! Shared domain primitives for the control plane core
//!
//! Strongly-typed identifiers and bounded scalars used across every
//! component, so invalid values (negative percentages, empty names,
//! malformed ids) are unrepresentable rather than checked ad hoc at each
//! call site.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an agent participating in the control plane.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct AgentId(Uuid);

impl AgentId {
    /// Creates a new random agent id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique identifier for a message published on the bus.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Unique identifier for a task submitted to the dispatcher.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new random task id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Identifier of a feature node in the dependency graph.
///
/// Features are caller-named (e.g. `"auth-service"`), not generated, so
/// this wraps a validated non-empty string rather than a UUID.
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct FeatureId(String);

/// Identifier of a checkpoint snapshot of context memory.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    TryFrom,
    Into
))]
pub struct CheckpointId(Uuid);

impl CheckpointId {
    /// Creates a new random checkpoint id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// A percentage clamped to `0..=100`, used for pressure, coverage and
/// threshold comparisons throughout the breakers and context memory.
#[nutype(
    validate(less_or_equal = 100),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 0
)]
pub struct Percentage(u8);

/// A non-negative token count, used by the token breaker and context
/// memory's pressure estimator.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    Default,
    TryFrom,
    Into
))]
pub struct TokenCount(u64);

/// A 1-indexed iteration counter for the loop controller.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    ),
    default = 1
)]
pub struct IterationCount(u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_ids_are_unique() {
        assert_ne!(AgentId::generate(), AgentId::generate());
    }

    #[test]
    fn feature_id_rejects_empty() {
        assert!(FeatureId::try_new(String::new()).is_err());
    }

    #[test]
    fn percentage_rejects_over_100() {
        assert!(Percentage::try_new(101).is_err());
        assert!(Percentage::try_new(100).is_ok());
    }
}
