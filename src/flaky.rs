//! Flaky-test detection and quarantine.
//!
//! Ported from `flaky_detector.py`: per-test pass/fail history drives a
//! flakiness score, which feeds an ACTIVE -> QUARANTINED -> PROBATION ->
//! {ACTIVE | RETIRED} state machine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::parsers::{self, PytestResult};
use crate::persistence;

/// Quarantine lifecycle state for a single test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuarantineStatus {
    /// Running normally, counted in CI gating.
    Active,
    /// Excluded from CI gating due to flakiness.
    Quarantined,
    /// Re-admitted on a trial basis; one more flake sends it back.
    Probation,
    /// Permanently excluded.
    Retired,
}

/// One observed test run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TestRun {
    /// Whether this run passed.
    pub passed: bool,
    /// When it ran.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Rolling history of a single test's runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestHistory {
    runs: Vec<TestRun>,
}

impl TestHistory {
    fn record(&mut self, run: TestRun) {
        self.runs.push(run);
    }

    /// Fraction of runs that passed.
    #[must_use]
    pub fn pass_rate(&self) -> f64 {
        if self.runs.is_empty() {
            return 1.0;
        }
        self.runs.iter().filter(|r| r.passed).count() as f64 / self.runs.len() as f64
    }

    /// Fraction of runs that failed.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        1.0 - self.pass_rate()
    }

    /// `transitions / (n - 1)`: how often consecutive runs disagree.
    #[must_use]
    pub fn flakiness_score(&self) -> f64 {
        if self.runs.len() < 2 {
            return 0.0;
        }
        let transitions = self
            .runs
            .windows(2)
            .filter(|pair| pair[0].passed != pair[1].passed)
            .count();
        transitions as f64 / (self.runs.len() - 1) as f64
    }

    /// The most recent runs, newest last.
    #[must_use]
    pub fn recent_runs(&self, n: usize) -> &[TestRun] {
        let start = self.runs.len().saturating_sub(n);
        &self.runs[start..]
    }
}

/// A test flagged as a flakiness candidate by `detect_flaky_tests`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlakyTestCandidate {
    /// The test's fully-qualified name.
    pub test_name: String,
    /// Its flakiness score at detection time.
    pub flakiness_score: f64,
    /// Whether quarantine is recommended (`score > 0.6`) versus merely
    /// watched (`score > 0.4`).
    pub recommend_quarantine: bool,
}

/// A quarantined (or previously quarantined) test's bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineEntry {
    /// The test's fully-qualified name.
    pub test_name: String,
    /// Current lifecycle status.
    pub status: QuarantineStatus,
    /// When it was first quarantined.
    pub quarantined_at: chrono::DateTime<chrono::Utc>,
    /// Why it was quarantined.
    pub reason: String,
}

/// Errors raised by the flaky-test detector.
#[derive(Error, Debug)]
pub enum FlakyError {
    /// Persistence failure saving/loading the registry.
    #[error(transparent)]
    Persistence(#[from] crate::error::PersistenceError),
}

/// Configuration for the detector.
#[derive(Debug, Clone, Copy)]
pub struct FlakyConfig {
    /// Flakiness score at or above which a test is a quarantine
    /// candidate.
    pub flakiness_threshold: f64,
    /// Minimum number of recorded runs before a test is evaluated.
    pub min_runs: usize,
    /// If true, `record_run` auto-quarantines candidates immediately.
    pub auto_quarantine: bool,
    /// How many days a quarantine entry is retained after retirement.
    pub retention_days: i64,
}

impl Default for FlakyConfig {
    fn default() -> Self {
        Self {
            flakiness_threshold: 0.3,
            min_runs: 5,
            auto_quarantine: false,
            retention_days: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FlakySnapshot {
    history: HashMap<String, TestHistory>,
    quarantine: HashMap<String, QuarantineEntry>,
}

/// Tracks per-test run history and quarantine state.
#[derive(Debug)]
pub struct FlakyDetector {
    config: FlakyConfig,
    history: HashMap<String, TestHistory>,
    quarantine: HashMap<String, QuarantineEntry>,
}

impl FlakyDetector {
    /// Builds a detector with no recorded history.
    #[must_use]
    pub fn new(config: FlakyConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
            quarantine: HashMap::new(),
        }
    }

    /// Records one observed run for `test_name`, auto-quarantining it if
    /// `auto_quarantine` is enabled and it now qualifies.
    pub fn record_run(&mut self, test_name: &str, passed: bool) {
        self.history
            .entry(test_name.to_string())
            .or_default()
            .record(TestRun {
                passed,
                timestamp: chrono::Utc::now(),
            });
        if self.config.auto_quarantine {
            self.check_auto_quarantine(test_name);
        }
    }

    /// Records every result line parsed out of `pytest_output`.
    pub fn record_pytest_output(&mut self, pytest_output: &str) {
        let results: Vec<PytestResult> = parsers::parse_pytest_output(pytest_output);
        for result in results {
            self.record_run(&result.test_name, result.passed);
        }
    }

    fn check_auto_quarantine(&mut self, test_name: &str) {
        if self.quarantine.contains_key(test_name) {
            return;
        }
        let Some(history) = self.history.get(test_name) else {
            return;
        };
        if history.runs.len() < self.config.min_runs {
            return;
        }
        let score = history.flakiness_score();
        if score >= self.config.flakiness_threshold {
            self.quarantine_test(test_name, &format!("auto-quarantined: flakiness {score:.2}"));
        }
    }

    /// Scans every test with at least `min_runs` history for flakiness,
    /// returning candidates at or above the watch threshold (`0.4`),
    /// flagged for quarantine if above `0.6`.
    #[must_use]
    pub fn detect_flaky_tests(&self) -> Vec<FlakyTestCandidate> {
        self.history
            .iter()
            .filter(|(_, h)| h.runs.len() >= self.config.min_runs)
            .filter_map(|(name, h)| {
                let score = h.flakiness_score();
                if score > 0.4 {
                    Some(FlakyTestCandidate {
                        test_name: name.clone(),
                        flakiness_score: score,
                        recommend_quarantine: score > 0.6,
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    /// Moves `test_name` into `Quarantined`.
    pub fn quarantine_test(&mut self, test_name: &str, reason: &str) {
        self.quarantine.insert(
            test_name.to_string(),
            QuarantineEntry {
                test_name: test_name.to_string(),
                status: QuarantineStatus::Quarantined,
                quarantined_at: chrono::Utc::now(),
                reason: reason.to_string(),
            },
        );
    }

    /// Moves `test_name` back to `Active`, clearing its quarantine entry.
    pub fn unquarantine_test(&mut self, test_name: &str) {
        self.quarantine.remove(test_name);
    }

    /// Moves a quarantined test to `Probation`.
    pub fn set_probation(&mut self, test_name: &str) -> bool {
        if let Some(entry) = self.quarantine.get_mut(test_name) {
            entry.status = QuarantineStatus::Probation;
            true
        } else {
            false
        }
    }

    /// True if `test_name` is currently quarantined or retired.
    #[must_use]
    pub fn is_quarantined(&self, test_name: &str) -> bool {
        matches!(
            self.quarantine.get(test_name).map(|e| e.status),
            Some(QuarantineStatus::Quarantined | QuarantineStatus::Retired)
        )
    }

    /// All tests currently in `Quarantined` status.
    #[must_use]
    pub fn get_quarantined_tests(&self) -> Vec<&QuarantineEntry> {
        self.quarantine
            .values()
            .filter(|e| e.status == QuarantineStatus::Quarantined)
            .collect()
    }

    /// The quarantine entry for `test_name`, if any.
    #[must_use]
    pub fn get_status(&self, test_name: &str) -> Option<&QuarantineEntry> {
        self.quarantine.get(test_name)
    }

    /// The `n` tests with the highest flakiness scores among those with
    /// enough history to score.
    #[must_use]
    pub fn get_most_flaky(&self, n: usize) -> Vec<FlakyTestCandidate> {
        let mut all: Vec<FlakyTestCandidate> = self
            .history
            .iter()
            .filter(|(_, h)| h.runs.len() >= self.config.min_runs)
            .map(|(name, h)| {
                let score = h.flakiness_score();
                FlakyTestCandidate {
                    test_name: name.clone(),
                    flakiness_score: score,
                    recommend_quarantine: score > 0.6,
                }
            })
            .collect();
        all.sort_by(|a, b| b.flakiness_score.partial_cmp(&a.flakiness_score).unwrap());
        all.truncate(n);
        all
    }

    /// A short human-readable summary for dashboards/logs.
    #[must_use]
    pub fn get_summary(&self) -> String {
        format!(
            "{} tests tracked, {} quarantined",
            self.history.len(),
            self.get_quarantined_tests().len()
        )
    }

    /// Drops run history older than `retention_days`.
    pub fn cleanup_old_runs(&mut self) {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(self.config.retention_days);
        for history in self.history.values_mut() {
            history.runs.retain(|r| r.timestamp >= cutoff);
        }
    }

    /// Saves run history and quarantine state to `path`.
    pub fn save(&self, path: &Path) -> Result<(), FlakyError> {
        let snapshot = FlakySnapshot {
            history: self.history.clone(),
            quarantine: self.quarantine.clone(),
        };
        persistence::save_json(path, &snapshot)?;
        Ok(())
    }

    /// Loads run history and quarantine state from `path`.
    pub fn load(path: &Path, config: FlakyConfig) -> Result<Self, FlakyError> {
        let snapshot: FlakySnapshot = persistence::load_json(path)?;
        Ok(Self {
            config,
            history: snapshot.history,
            quarantine: snapshot.quarantine,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_quarantines_after_alternating_runs() {
        let mut detector = FlakyDetector::new(FlakyConfig {
            auto_quarantine: true,
            min_runs: 5,
            flakiness_threshold: 0.3,
            ..FlakyConfig::default()
        });
        let alternating = [true, false, true, false, true, false];
        for passed in alternating {
            detector.record_run("tests/test_x.py::test_thing", passed);
        }
        assert!(detector.is_quarantined("tests/test_x.py::test_thing"));
    }

    #[test]
    fn stable_test_is_never_flagged() {
        let mut detector = FlakyDetector::new(FlakyConfig::default());
        for _ in 0..10 {
            detector.record_run("tests/test_y.py::test_stable", true);
        }
        assert!(detector.detect_flaky_tests().is_empty());
    }

    #[test]
    fn flakiness_score_is_transitions_over_n_minus_one() {
        let mut history = TestHistory::default();
        for passed in [true, false, true, false] {
            history.record(TestRun {
                passed,
                timestamp: chrono::Utc::now(),
            });
        }
        assert!((history.flakiness_score() - 1.0).abs() < f64::EPSILON);
    }
}
