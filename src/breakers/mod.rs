//! Layered circuit breakers: token budget, progress, quality, and wall
//! clock, combined into a single `MultiLevelCircuitBreaker` check.

mod progress;
mod quality;
mod time;
mod token;

pub use progress::{ProgressBreaker, ProgressConfig};
pub use quality::{QualityBreaker, QualityConfig, QualitySample};
pub use time::{TimeBreaker, TimeConfig};
pub use token::{TokenBreaker, TokenConfig};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The shared three-state machine every breaker implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BreakerState {
    /// Operating normally.
    #[default]
    Closed,
    /// Tripped; further work should stop.
    Open,
    /// Probing to see if the underlying condition recovered.
    HalfOpen,
}

/// Persistent state tracked by a single breaker across checks: its current
/// state, consecutive failure count, and the last time it failed/succeeded.
/// Mirrors `circuit_breaker.py`'s `CircuitBreakerState`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CircuitBreakerState {
    state: BreakerState,
    failure_count: u32,
    last_failure_time: Option<chrono::DateTime<chrono::Utc>>,
    last_success_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl CircuitBreakerState {
    /// True while the circuit is closed (operating normally).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == BreakerState::Closed
    }

    /// True while the circuit is open (tripped).
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }

    /// True while the circuit is half-open (probing for recovery).
    #[must_use]
    pub fn is_half_open(&self) -> bool {
        self.state == BreakerState::HalfOpen
    }

    /// Consecutive failures recorded since the last success.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Trips the circuit open.
    pub fn open(&mut self) {
        self.state = BreakerState::Open;
        self.last_failure_time = Some(chrono::Utc::now());
    }

    /// Restores the circuit to closed, clearing the failure streak.
    pub fn close(&mut self) {
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.last_success_time = Some(chrono::Utc::now());
    }

    /// Moves the circuit to half-open, to probe whether it has recovered.
    pub fn half_open(&mut self) {
        self.state = BreakerState::HalfOpen;
    }

    /// Records a failure, bumping the consecutive-failure count.
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_time = Some(chrono::Utc::now());
    }

    /// Records a success, resetting the consecutive-failure count.
    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.last_success_time = Some(chrono::Utc::now());
    }
}

/// Outcome of checking a single breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerCheck {
    /// The breaker's state after this check.
    pub state: BreakerState,
    /// A human-readable warning if the breaker is trending towards
    /// tripping but has not yet opened.
    pub warning: Option<String>,
}

impl BreakerCheck {
    fn closed() -> Self {
        Self {
            state: BreakerState::Closed,
            warning: None,
        }
    }

    fn closed_with_warning(warning: impl Into<String>) -> Self {
        Self {
            state: BreakerState::Closed,
            warning: Some(warning.into()),
        }
    }

    fn open(reason: impl Into<String>) -> Self {
        Self {
            state: BreakerState::Open,
            warning: Some(reason.into()),
        }
    }

    /// True if this check reports the breaker open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }
}

/// Errors produced while loading/saving breaker snapshots.
#[derive(Error, Debug)]
pub enum BreakerError {
    /// The snapshot file could not be read or written.
    #[error(transparent)]
    Persistence(#[from] crate::error::PersistenceError),
}

/// Combines all four breakers into a single check, short-circuiting at
/// the first one that reports `Open`, in the fixed order token, progress,
/// quality, time. If none are open, any warnings are concatenated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiLevelCircuitBreaker {
    /// Token budget breaker.
    pub token: TokenBreaker,
    /// Lack-of-progress breaker.
    pub progress: ProgressBreaker,
    /// Test/lint quality breaker.
    pub quality: QualityBreaker,
    /// Wall-clock time budget breaker.
    pub time: TimeBreaker,
}

impl MultiLevelCircuitBreaker {
    /// Builds a combined breaker from default-configured components.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: TokenBreaker::new(TokenConfig::default()),
            progress: ProgressBreaker::new(ProgressConfig::default()),
            quality: QualityBreaker::new(QualityConfig::default()),
            time: TimeBreaker::new(TimeConfig::default()),
        }
    }

    /// Runs all four checks in order, stopping at the first `Open`.
    pub fn check(&mut self) -> BreakerCheck {
        let token = self.token.check();
        if token.is_open() {
            return token;
        }
        let progress = self.progress.check();
        if progress.is_open() {
            return progress;
        }
        let quality = self.quality.check();
        if quality.is_open() {
            return quality;
        }
        let time = self.time.check();
        if time.is_open() {
            return time;
        }
        let warnings: Vec<String> = [token, progress, quality, time]
            .into_iter()
            .filter_map(|c| c.warning)
            .collect();
        if warnings.is_empty() {
            BreakerCheck::closed()
        } else {
            BreakerCheck::closed_with_warning(warnings.join("; "))
        }
    }

    /// A short human-readable line per breaker, for dashboards/logs. Reads
    /// each breaker's last-known state without re-running its check.
    #[must_use]
    pub fn status_summary(&self) -> String {
        format!(
            "token={:?}(failures={}) progress={:?}(no_progress={}) quality={:?} time={:?}",
            self.token.state().is_open(),
            self.token.state().failure_count(),
            self.progress.state().is_open(),
            self.progress.no_progress_count(),
            self.quality.state().is_open(),
            self.time.state().is_open(),
        )
    }
}

impl Default for MultiLevelCircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_circuits_at_first_open_breaker_in_fixed_order() {
        let mut combined = MultiLevelCircuitBreaker::new();
        let max_tokens = combined.token.config().max_tokens;
        combined.token.consume(max_tokens);
        let result = combined.check();
        assert!(result.is_open());
    }

    #[test]
    fn concatenates_warnings_when_none_open() {
        let mut combined = MultiLevelCircuitBreaker::new();
        let result = combined.check();
        assert_eq!(result.state, BreakerState::Closed);
    }
}
