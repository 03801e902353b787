//! Lack-of-progress circuit breaker.

use serde::{Deserialize, Serialize};

use super::{BreakerCheck, CircuitBreakerState};

/// Configuration for the progress breaker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Consecutive no-progress iterations before the breaker opens.
    pub no_progress_threshold: u32,
    /// Output-quality percentage below which the most recent sample
    /// counts as a decline warning.
    pub output_decline_threshold: u8,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            no_progress_threshold: 3,
            output_decline_threshold: 70,
        }
    }
}

/// Tracks consecutive no-progress iterations and output-quality history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressBreaker {
    config: ProgressConfig,
    state: CircuitBreakerState,
    no_progress_count: u32,
    output_quality_history: Vec<f64>,
}

impl ProgressBreaker {
    /// Builds a breaker with no recorded history.
    #[must_use]
    pub fn new(config: ProgressConfig) -> Self {
        Self {
            config,
            state: CircuitBreakerState::default(),
            no_progress_count: 0,
            output_quality_history: Vec::new(),
        }
    }

    /// The breaker's current state machine, without running a check.
    #[must_use]
    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }

    /// Consecutive iterations recorded with no progress.
    #[must_use]
    pub fn no_progress_count(&self) -> u32 {
        self.no_progress_count
    }

    /// Records one iteration's progress: any changed file or newly passing
    /// test counts as progress and resets the no-progress streak.
    pub fn record_progress(&mut self, files_changed: u32, tests_passed: u32) {
        if files_changed > 0 || tests_passed > 0 {
            self.no_progress_count = 0;
            self.state.record_success();
        } else {
            self.no_progress_count += 1;
            self.state.record_failure();
        }
    }

    /// Records an output-quality sample (0-100) for decline detection.
    pub fn record_output_quality(&mut self, quality: f64) {
        self.output_quality_history.push(quality);
    }

    /// Resets the no-progress streak and output-quality history, e.g.
    /// after a successful checkpoint.
    pub fn reset(&mut self) {
        self.no_progress_count = 0;
        self.output_quality_history.clear();
        self.state.close();
    }

    /// Checks the current streak and output-quality trend against the
    /// configured thresholds.
    pub fn check(&mut self) -> BreakerCheck {
        if self.no_progress_count >= self.config.no_progress_threshold {
            self.state.open();
            return BreakerCheck::open(format!(
                "no progress for {} consecutive iterations",
                self.no_progress_count
            ));
        }

        if self.output_quality_history.len() >= 3 {
            let latest = *self.output_quality_history.last().unwrap();
            if latest < f64::from(self.config.output_decline_threshold) {
                return BreakerCheck::closed_with_warning(format!(
                    "output quality declined to {latest:.1}%"
                ));
            }
        }

        BreakerCheck::closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_no_progress() {
        let mut breaker = ProgressBreaker::new(ProgressConfig::default());
        breaker.record_progress(0, 0);
        breaker.record_progress(0, 0);
        breaker.record_progress(0, 0);
        assert!(breaker.check().is_open());
    }

    #[test]
    fn progress_resets_streak() {
        let mut breaker = ProgressBreaker::new(ProgressConfig::default());
        breaker.record_progress(0, 0);
        breaker.record_progress(0, 0);
        breaker.record_progress(1, 0);
        assert!(!breaker.check().is_open());
    }

    #[test]
    fn warns_on_output_decline() {
        let mut breaker = ProgressBreaker::new(ProgressConfig::default());
        breaker.record_output_quality(95.0);
        breaker.record_output_quality(90.0);
        breaker.record_output_quality(50.0);
        let check = breaker.check();
        assert!(!check.is_open());
        assert!(check.warning.is_some());
    }

    #[test]
    fn reset_closes_an_open_breaker() {
        let mut breaker = ProgressBreaker::new(ProgressConfig::default());
        breaker.record_progress(0, 0);
        breaker.record_progress(0, 0);
        breaker.record_progress(0, 0);
        assert!(breaker.check().is_open());
        breaker.reset();
        assert!(!breaker.check().is_open());
        assert!(breaker.state().is_closed());
    }
}
