//! Test/lint quality circuit breaker.

use serde::{Deserialize, Serialize};

use super::{BreakerCheck, CircuitBreakerState};

/// Configuration for the quality breaker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Consecutive degraded samples before the breaker opens.
    pub degradation_threshold: usize,
    /// Minimum acceptable coverage percentage.
    pub min_coverage: u8,
    /// Maximum acceptable lint error count.
    pub max_lint_errors: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            degradation_threshold: 3,
            min_coverage: 80,
            max_lint_errors: 10,
        }
    }
}

/// One observed test-result sample: tests passed and failed for an
/// iteration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualitySample {
    /// Tests passed.
    pub passed: u32,
    /// Tests failed.
    pub failed: u32,
}

/// Tracks test-result trend, coverage, and lint error counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityBreaker {
    config: QualityConfig,
    state: CircuitBreakerState,
    test_history: Vec<QualitySample>,
    coverage: Option<u8>,
    lint_errors: u32,
}

impl QualityBreaker {
    /// Builds a breaker with no recorded samples.
    #[must_use]
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            state: CircuitBreakerState::default(),
            test_history: Vec::new(),
            coverage: None,
            lint_errors: 0,
        }
    }

    /// The breaker's current state machine, without running a check.
    #[must_use]
    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }

    /// Records one iteration's test pass/fail counts.
    pub fn record_test_result(&mut self, passed: u32, failed: u32) {
        self.test_history.push(QualitySample { passed, failed });
    }

    /// Records the current coverage percentage.
    pub fn record_coverage(&mut self, coverage: u8) {
        self.coverage = Some(coverage);
    }

    /// Records the current lint error count.
    pub fn record_lint_errors(&mut self, count: u32) {
        self.lint_errors = count;
    }

    /// Checks test-failure trend, coverage, and lint errors against the
    /// configured thresholds. Opens when the failure count over the last
    /// `degradation_threshold` samples is monotonically non-decreasing and
    /// has strictly increased.
    pub fn check(&mut self) -> BreakerCheck {
        if self.test_history.len() >= self.config.degradation_threshold {
            let recent = &self.test_history[self.test_history.len() - self.config.degradation_threshold..];
            let failed_trend: Vec<u32> = recent.iter().map(|s| s.failed).collect();
            let is_monotonic = failed_trend.windows(2).all(|w| w[0] <= w[1]);
            if is_monotonic && failed_trend.last() > failed_trend.first() {
                self.state.open();
                return BreakerCheck::open(format!(
                    "tests degrading: failures increased from {} to {}",
                    failed_trend.first().unwrap(),
                    failed_trend.last().unwrap()
                ));
            }
        }

        let mut warnings = Vec::new();
        if let Some(coverage) = self.coverage {
            if coverage < self.config.min_coverage {
                warnings.push(format!(
                    "coverage {coverage}% below minimum {}%",
                    self.config.min_coverage
                ));
            }
        }
        if self.lint_errors > self.config.max_lint_errors {
            warnings.push(format!(
                "lint errors ({}) exceed maximum ({})",
                self.lint_errors, self.config.max_lint_errors
            ));
        }

        if warnings.is_empty() {
            BreakerCheck::closed()
        } else {
            BreakerCheck::closed_with_warning(warnings.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_when_failures_monotonically_increase() {
        let mut breaker = QualityBreaker::new(QualityConfig::default());
        breaker.record_test_result(10, 1);
        breaker.record_test_result(10, 2);
        breaker.record_test_result(10, 3);
        assert!(breaker.check().is_open());
    }

    #[test]
    fn stays_closed_when_failures_do_not_trend_upward() {
        let mut breaker = QualityBreaker::new(QualityConfig::default());
        breaker.record_test_result(10, 3);
        breaker.record_test_result(10, 1);
        breaker.record_test_result(10, 3);
        assert!(!breaker.check().is_open());
    }

    #[test]
    fn warns_on_low_coverage() {
        let mut breaker = QualityBreaker::new(QualityConfig::default());
        breaker.record_coverage(50);
        let check = breaker.check();
        assert!(!check.is_open());
        assert!(check.warning.is_some());
    }

    #[test]
    fn warns_on_excess_lint_errors() {
        let mut breaker = QualityBreaker::new(QualityConfig::default());
        breaker.record_lint_errors(25);
        let check = breaker.check();
        assert!(!check.is_open());
        assert!(check.warning.is_some());
    }
}
