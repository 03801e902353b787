//! Wall-clock time-budget circuit breaker.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{BreakerCheck, CircuitBreakerState};

/// Configuration for the time breaker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeConfig {
    /// Maximum session duration, in seconds.
    pub max_duration_seconds: u64,
    /// Percentage of the budget at which a warning is raised.
    pub warning_pct: u8,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            max_duration_seconds: 7_200,
            warning_pct: 80,
        }
    }
}

/// Tracks elapsed wall-clock time against a budget.
///
/// `started_at` is not serialized: a restored breaker restarts its clock
/// rather than resurrecting a stale `Instant`, which cannot be serialized
/// meaningfully across process restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBreaker {
    config: TimeConfig,
    #[serde(skip, default = "Instant::now")]
    started_at: Instant,
    elapsed_override: Option<u64>,
    state: CircuitBreakerState,
}

impl TimeBreaker {
    /// Builds a breaker whose clock starts now.
    #[must_use]
    pub fn new(config: TimeConfig) -> Self {
        Self {
            config,
            started_at: Instant::now(),
            elapsed_override: None,
            state: CircuitBreakerState::default(),
        }
    }

    /// The breaker's current state machine, without running a check.
    #[must_use]
    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }

    /// Overrides the elapsed-seconds reading, for deterministic tests.
    pub fn set_elapsed_seconds_for_test(&mut self, seconds: u64) {
        self.elapsed_override = Some(seconds);
    }

    fn elapsed_seconds(&self) -> u64 {
        self.elapsed_override
            .unwrap_or_else(|| self.started_at.elapsed().as_secs())
    }

    /// Remaining time in seconds before the budget is exhausted.
    #[must_use]
    pub fn remaining_seconds(&self) -> u64 {
        self.config
            .max_duration_seconds
            .saturating_sub(self.elapsed_seconds())
    }

    /// Checks elapsed time against the configured thresholds.
    pub fn check(&mut self) -> BreakerCheck {
        let elapsed = self.elapsed_seconds();
        let pct = elapsed.saturating_mul(100) / self.config.max_duration_seconds.max(1);
        if elapsed >= self.config.max_duration_seconds {
            self.state.open();
            return BreakerCheck::open(format!(
                "time budget exceeded: {elapsed}s / {}s",
                self.config.max_duration_seconds
            ));
        }
        if pct >= u64::from(self.config.warning_pct) {
            return BreakerCheck::closed_with_warning(format!(
                "time usage approaching budget: {pct}%, {}s remaining",
                self.remaining_seconds()
            ));
        }
        BreakerCheck::closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_past_budget() {
        let mut breaker = TimeBreaker::new(TimeConfig::default());
        breaker.set_elapsed_seconds_for_test(7_300);
        assert!(breaker.check().is_open());
    }

    #[test]
    fn warns_approaching_budget() {
        let mut breaker = TimeBreaker::new(TimeConfig::default());
        breaker.set_elapsed_seconds_for_test(6_000);
        let check = breaker.check();
        assert!(!check.is_open());
        assert!(check.warning.is_some());
    }
}
