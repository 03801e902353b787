//! Adaptive loop controller: task-complexity scoring, iteration budgets,
//! stop predicates, and backoff between retries.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::error_classifier::ErrorSignature;
use crate::persistence;
use crate::time_provider::SharedTimeProvider;

/// A coarse size bucket for the task at hand, driving the iteration
/// budget multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskComplexity {
    /// Trivial: a one-line fix.
    Trivial,
    /// Simple: a small, well-scoped change.
    Simple,
    /// Moderate: touches several files/tests.
    Moderate,
    /// Complex: touches many files or has deep dependencies.
    Complex,
    /// Epic: large, cross-cutting work.
    Epic,
}

impl TaskComplexity {
    /// Scores `(file_count, test_count, dependency_depth)` into a
    /// complexity bucket using the fixed bracket weights.
    #[must_use]
    pub fn from_metrics(file_count: u32, test_count: u32, dependency_depth: u32) -> Self {
        let file_score = match file_count {
            0..=1 => 0,
            2 => 1,
            3..=4 => 3,
            5..=10 => 4,
            11..=20 => 6,
            _ => 8,
        };
        let test_score = match test_count {
            0..=2 => 0,
            3..=5 => 2,
            6..=9 => 3,
            _ => 4,
        };
        let dependency_score = match dependency_depth {
            0..=1 => 0,
            2 => 2,
            3..=4 => 4,
            _ => 6,
        };
        let total = file_score + test_score + dependency_score;
        match total {
            0..=1 => TaskComplexity::Trivial,
            2..=3 => TaskComplexity::Simple,
            4..=5 => TaskComplexity::Moderate,
            6..=9 => TaskComplexity::Complex,
            _ => TaskComplexity::Epic,
        }
    }

    fn multiplier(self) -> f64 {
        match self {
            TaskComplexity::Trivial => 0.3,
            TaskComplexity::Simple => 0.6,
            TaskComplexity::Moderate => 1.0,
            TaskComplexity::Complex => 1.5,
            TaskComplexity::Epic => 4.0,
        }
    }
}

/// Tunable configuration for the loop controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Base iteration count before the complexity multiplier is applied.
    pub base_iterations: u32,
    /// Floor on the final iteration limit.
    pub min_iterations: u32,
    /// Ceiling on the final iteration limit.
    pub max_iterations: u32,
    /// Consecutive identical-error-signature occurrences before
    /// `StopReason::StuckOnSameError` fires.
    pub stuck_threshold: u32,
    /// Consecutive no-progress iterations before
    /// `StopReason::NoProgress` fires.
    pub no_progress_threshold: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            base_iterations: 50,
            min_iterations: 10,
            max_iterations: 200,
            stuck_threshold: 3,
            no_progress_threshold: 5,
        }
    }
}

impl LoopConfig {
    /// The iteration budget for `complexity`, clamped to
    /// `[min_iterations, max_iterations]`.
    #[must_use]
    pub fn iteration_limit(&self, complexity: TaskComplexity) -> u32 {
        let raw = (f64::from(self.base_iterations) * complexity.multiplier()).round() as u32;
        raw.clamp(self.min_iterations, self.max_iterations)
    }
}

/// Exponential backoff with jitter between retried iterations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffStrategy {
    /// Base delay before the first retry.
    pub base_ms: u64,
    /// Ceiling on the computed delay.
    pub max_ms: u64,
    /// Multiplier applied per additional attempt.
    pub factor: f64,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_ms: 30_000,
            factor: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Computes the delay for the `attempt`-th retry (0-indexed), with up
    /// to 20% random jitter added.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> std::time::Duration {
        let raw = (self.base_ms as f64) * self.factor.powi(attempt as i32);
        let capped = raw.min(self.max_ms as f64);
        let jitter = rand::thread_rng().gen_range(0.0..0.2 * capped);
        std::time::Duration::from_millis((capped + jitter) as u64)
    }
}

/// One iteration's record in the loop's history. `record_error` and
/// `record_progress` amend the record for the *current* iteration rather
/// than appending a new one, mirroring `loop_control.py`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Which iteration this is (1-indexed).
    pub iteration: u32,
    /// The error signature recorded this iteration, if any.
    pub error: Option<ErrorSignature>,
    /// Whether this iteration made forward progress.
    pub made_progress: bool,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The iteration budget was exhausted.
    MaxIterations,
    /// The same error signature recurred past the stuck threshold.
    StuckOnSameError,
    /// No iteration made progress for the configured threshold.
    NoProgress,
}

/// Mutable state the controller advances iteration by iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    complexity: TaskComplexity,
    config: LoopConfig,
    history: Vec<IterationRecord>,
}

/// Errors raised by the loop controller.
#[derive(Error, Debug)]
pub enum LoopError {
    /// Persistence failure saving/loading loop state.
    #[error(transparent)]
    Persistence(#[from] crate::error::PersistenceError),
}

/// Drives iteration budgeting, stop decisions, and backoff for a single
/// development-loop run.
#[derive(Debug)]
pub struct LoopController {
    state: LoopState,
    backoff: BackoffStrategy,
    time_provider: SharedTimeProvider,
}

impl LoopController {
    /// Builds a controller for a task of the given complexity.
    #[must_use]
    pub fn new(complexity: TaskComplexity, config: LoopConfig, time_provider: SharedTimeProvider) -> Self {
        Self {
            state: LoopState {
                complexity,
                config,
                history: Vec::new(),
            },
            backoff: BackoffStrategy::default(),
            time_provider,
        }
    }

    /// The iteration budget for this run's complexity.
    #[must_use]
    pub fn iteration_limit(&self) -> u32 {
        self.state.config.iteration_limit(self.state.complexity)
    }

    /// Starts a new iteration, appending a placeholder history record.
    pub fn tick(&mut self) -> u32 {
        let iteration = self.state.history.len() as u32 + 1;
        self.state.history.push(IterationRecord {
            iteration,
            error: None,
            made_progress: false,
        });
        iteration
    }

    /// Records `signature` against the current iteration, amending its
    /// record rather than appending.
    pub fn record_error(&mut self, signature: ErrorSignature) {
        if let Some(last) = self.state.history.last_mut() {
            last.error = Some(signature);
        }
    }

    /// Marks the current iteration as having made progress.
    pub fn record_progress(&mut self) {
        if let Some(last) = self.state.history.last_mut() {
            last.made_progress = true;
        }
    }

    /// Evaluates the stop predicates in order: max iterations, then
    /// stuck-on-same-error, then no-progress.
    #[must_use]
    pub fn should_stop(&self) -> Option<StopReason> {
        let iteration = self.state.history.len() as u32;
        if iteration >= self.iteration_limit() {
            return Some(StopReason::MaxIterations);
        }

        let threshold = self.state.config.stuck_threshold as usize;
        if self.state.history.len() >= threshold {
            let tail = &self.state.history[self.state.history.len() - threshold..];
            let first_sig = tail.first().and_then(|r| r.error.as_ref());
            if let Some(sig) = first_sig {
                if tail.iter().all(|r| r.error.as_ref() == Some(sig)) {
                    return Some(StopReason::StuckOnSameError);
                }
            }
        }

        let no_progress_threshold = self.state.config.no_progress_threshold as usize;
        if self.state.history.len() >= no_progress_threshold {
            let tail = &self.state.history[self.state.history.len() - no_progress_threshold..];
            if tail.iter().all(|r| !r.made_progress) {
                return Some(StopReason::NoProgress);
            }
        }

        None
    }

    /// Sleeps for the backoff delay appropriate to `attempt`, using this
    /// controller's time provider (so tests can skip the real wait).
    pub async fn backoff(&self, attempt: u32) {
        self.time_provider.sleep(self.backoff.delay_for(attempt)).await;
    }

    /// The iteration history recorded so far.
    #[must_use]
    pub fn history(&self) -> &[IterationRecord] {
        &self.state.history
    }

    /// Saves complexity, config, and history to `path`.
    pub fn save(&self, path: &Path) -> Result<(), LoopError> {
        persistence::save_json(path, &self.state)?;
        Ok(())
    }

    /// Loads complexity, config, and history from `path`.
    pub fn load(path: &Path, time_provider: SharedTimeProvider) -> Result<Self, LoopError> {
        let state: LoopState = persistence::load_json(path)?;
        Ok(Self {
            state,
            backoff: BackoffStrategy::default(),
            time_provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_classifier::ErrorKind;
    use crate::time_provider::test_time_provider;

    fn sig(hash: &str) -> ErrorSignature {
        ErrorSignature {
            kind: ErrorKind::Runtime,
            message_hash: hash.to_string(),
        }
    }

    #[test]
    fn complexity_scoring_matches_fixed_brackets() {
        assert_eq!(TaskComplexity::from_metrics(1, 1, 0), TaskComplexity::Trivial);
        assert_eq!(TaskComplexity::from_metrics(20, 9, 4), TaskComplexity::Epic);
    }

    #[test]
    fn iteration_limit_is_clamped() {
        let config = LoopConfig::default();
        assert_eq!(config.iteration_limit(TaskComplexity::Trivial), 15);
        assert_eq!(config.iteration_limit(TaskComplexity::Epic), 200);
    }

    #[test]
    fn stops_on_max_iterations() {
        let mut controller =
            LoopController::new(TaskComplexity::Trivial, LoopConfig::default(), test_time_provider());
        for _ in 0..15 {
            controller.tick();
        }
        assert_eq!(controller.should_stop(), Some(StopReason::MaxIterations));
    }

    #[test]
    fn stops_when_stuck_on_same_error() {
        let mut config = LoopConfig::default();
        config.max_iterations = 200;
        config.min_iterations = 10;
        let mut controller = LoopController::new(TaskComplexity::Epic, config, test_time_provider());
        for _ in 0..3 {
            controller.tick();
            controller.record_error(sig("abc"));
        }
        assert_eq!(controller.should_stop(), Some(StopReason::StuckOnSameError));
    }

    #[test]
    fn record_error_amends_current_iteration_not_appends() {
        let mut controller =
            LoopController::new(TaskComplexity::Epic, LoopConfig::default(), test_time_provider());
        controller.tick();
        controller.record_error(sig("a"));
        controller.record_error(sig("b"));
        assert_eq!(controller.history().len(), 1);
        assert_eq!(controller.history()[0].error.as_ref().unwrap().message_hash, "b");
    }
}
