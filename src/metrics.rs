//! Metrics and outcome sink: raw metric samples, a per-session summary,
//! and lightweight performance timing.
//!
//! Ported from `metrics.py`'s `MetricsCollector`, `SessionMetrics`, and
//! `PerformanceTracker`.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::persistence;

/// The closed set of metric kinds the control plane records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    /// Loop iterations executed.
    Iterations,
    /// Tokens consumed.
    TokensUsed,
    /// Features completed.
    FeaturesCompleted,
    /// Features started.
    FeaturesStarted,
    /// Tests written.
    TestsWritten,
    /// Tests passed.
    TestsPassed,
    /// Tests failed.
    TestsFailed,
    /// Bugs fixed.
    BugsFixed,
    /// Errors encountered.
    ErrorsEncountered,
    /// Wall-clock time elapsed, in seconds.
    TimeElapsed,
    /// Coverage percentage.
    Coverage,
    /// Files changed.
    FilesChanged,
}

/// A single recorded sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricValue {
    /// The sampled value.
    pub value: f64,
    /// When it was recorded.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Free-form metadata attached to this sample.
    pub metadata: HashMap<String, String>,
}

/// Errors raised by metrics persistence.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Persistence failure saving/loading a snapshot.
    #[error(transparent)]
    Persistence(#[from] crate::error::PersistenceError),
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct MetricsSnapshot {
    values: HashMap<MetricKind, Vec<MetricValue>>,
    counters: HashMap<MetricKind, f64>,
}

/// Records timestamped samples and monotonic counters per metric kind.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    values: HashMap<MetricKind, Vec<MetricValue>>,
    counters: HashMap<MetricKind, f64>,
}

impl MetricsCollector {
    /// Builds an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a timestamped sample.
    pub fn record(&mut self, kind: MetricKind, value: f64, metadata: HashMap<String, String>) {
        self.values.entry(kind).or_default().push(MetricValue {
            value,
            timestamp: chrono::Utc::now(),
            metadata,
        });
    }

    /// Bumps `kind`'s counter by `amount`.
    pub fn increment(&mut self, kind: MetricKind, amount: f64) {
        *self.counters.entry(kind).or_insert(0.0) += amount;
    }

    /// All recorded samples for `kind`.
    #[must_use]
    pub fn get_values(&self, kind: MetricKind) -> &[MetricValue] {
        self.values.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// The most recent recorded sample for `kind`.
    #[must_use]
    pub fn get_latest(&self, kind: MetricKind) -> Option<&MetricValue> {
        self.values.get(&kind).and_then(|v| v.last())
    }

    /// Sum of all recorded samples for `kind`.
    #[must_use]
    pub fn get_sum(&self, kind: MetricKind) -> f64 {
        self.get_values(kind).iter().map(|v| v.value).sum()
    }

    /// Average of all recorded samples for `kind`.
    #[must_use]
    pub fn get_average(&self, kind: MetricKind) -> f64 {
        let values = self.get_values(kind);
        if values.is_empty() {
            return 0.0;
        }
        self.get_sum(kind) / values.len() as f64
    }

    /// Current counter value for `kind`.
    #[must_use]
    pub fn get_count(&self, kind: MetricKind) -> f64 {
        self.counters.get(&kind).copied().unwrap_or(0.0)
    }

    /// Exports all samples and counters as a JSON value.
    #[must_use]
    pub fn export_json(&self) -> serde_json::Value {
        serde_json::json!({
            "values": self.values,
            "counters": self.counters,
        })
    }

    /// Saves samples and counters to `path`.
    pub fn save(&self, path: &Path) -> Result<(), MetricsError> {
        let snapshot = MetricsSnapshot {
            values: self.values.clone(),
            counters: self.counters.clone(),
        };
        persistence::save_json(path, &snapshot)?;
        Ok(())
    }

    /// Loads samples and counters from `path`.
    pub fn load(path: &Path) -> Result<Self, MetricsError> {
        let snapshot: MetricsSnapshot = persistence::load_json(path)?;
        Ok(Self {
            values: snapshot.values,
            counters: snapshot.counters,
        })
    }
}

/// Session-scoped metrics: identity, timing, and a backing collector.
#[derive(Debug)]
pub struct SessionMetrics {
    session_id: String,
    started_at: chrono::DateTime<chrono::Utc>,
    collector: MetricsCollector,
    started_features: HashSet<String>,
    completed_features: HashSet<String>,
    errors_by_kind: HashMap<String, u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionMetricsSnapshot {
    session_id: String,
    started_at: chrono::DateTime<chrono::Utc>,
    values: HashMap<MetricKind, Vec<MetricValue>>,
    counters: HashMap<MetricKind, f64>,
    started_features: HashSet<String>,
    completed_features: HashSet<String>,
    errors_by_kind: HashMap<String, u64>,
}

impl SessionMetrics {
    /// Builds a session metrics tracker starting now.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            started_at: chrono::Utc::now(),
            collector: MetricsCollector::new(),
            started_features: HashSet::new(),
            completed_features: HashSet::new(),
            errors_by_kind: HashMap::new(),
        }
    }

    /// Seconds elapsed since this session started.
    #[must_use]
    pub fn duration_seconds(&self) -> i64 {
        (chrono::Utc::now() - self.started_at).num_seconds()
    }

    /// Number of distinct features started.
    #[must_use]
    pub fn features_started(&self) -> usize {
        self.started_features.len()
    }

    /// Number of distinct features completed.
    #[must_use]
    pub fn features_completed(&self) -> usize {
        self.completed_features.len()
    }

    /// Records that `feature` started.
    pub fn record_feature_started(&mut self, feature: impl Into<String>) {
        self.started_features.insert(feature.into());
        self.collector.increment(MetricKind::FeaturesStarted, 1.0);
    }

    /// Records that `feature` completed.
    pub fn record_feature_completed(&mut self, feature: impl Into<String>) {
        self.completed_features.insert(feature.into());
        self.collector.increment(MetricKind::FeaturesCompleted, 1.0);
    }

    /// Records one error of `kind` (a free-form label).
    pub fn record_error(&mut self, kind: impl Into<String>) {
        *self.errors_by_kind.entry(kind.into()).or_insert(0) += 1;
        self.collector.increment(MetricKind::ErrorsEncountered, 1.0);
    }

    /// The backing metrics collector.
    #[must_use]
    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }

    /// Mutable access to the backing metrics collector.
    pub fn collector_mut(&mut self) -> &mut MetricsCollector {
        &mut self.collector
    }

    /// A short human-readable summary for dashboards/logs.
    #[must_use]
    pub fn get_summary(&self) -> String {
        format!(
            "session {} ran {}s: {} features started, {} completed, {} error kinds",
            self.session_id,
            self.duration_seconds(),
            self.features_started(),
            self.features_completed(),
            self.errors_by_kind.len()
        )
    }

    /// Saves session identity, timing, and backing collector state to
    /// `path`.
    pub fn save(&self, path: &Path) -> Result<(), MetricsError> {
        let snapshot = SessionMetricsSnapshot {
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            values: self.collector.values.clone(),
            counters: self.collector.counters.clone(),
            started_features: self.started_features.clone(),
            completed_features: self.completed_features.clone(),
            errors_by_kind: self.errors_by_kind.clone(),
        };
        persistence::save_json(path, &snapshot)?;
        Ok(())
    }

    /// Loads session identity, timing, and backing collector state from
    /// `path`.
    pub fn load(path: &Path) -> Result<Self, MetricsError> {
        let snapshot: SessionMetricsSnapshot = persistence::load_json(path)?;
        Ok(Self {
            session_id: snapshot.session_id,
            started_at: snapshot.started_at,
            collector: MetricsCollector {
                values: snapshot.values,
                counters: snapshot.counters,
            },
            started_features: snapshot.started_features,
            completed_features: snapshot.completed_features,
            errors_by_kind: snapshot.errors_by_kind,
        })
    }
}

/// Per-operation timing and per-feature token/time bookkeeping, kept
/// in-memory only (it has no persistence shape of its own).
#[derive(Debug, Default)]
pub struct PerformanceTracker {
    timings: HashMap<String, Vec<std::time::Duration>>,
    tokens_by_feature: HashMap<String, u64>,
    time_by_feature: HashMap<String, std::time::Duration>,
}

impl PerformanceTracker {
    /// Builds an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one timing sample for `operation`.
    pub fn record_timing(&mut self, operation: impl Into<String>, duration: std::time::Duration) {
        self.timings.entry(operation.into()).or_default().push(duration);
    }

    /// Runs `f`, recording its wall-clock duration against `operation`,
    /// and returns `f`'s result.
    pub fn track<T>(&mut self, operation: impl Into<String>, f: impl FnOnce() -> T) -> T {
        let operation = operation.into();
        let start = std::time::Instant::now();
        let result = f();
        self.record_timing(operation, start.elapsed());
        result
    }

    /// All recorded timings for `operation`.
    #[must_use]
    pub fn get_timing(&self, operation: &str) -> &[std::time::Duration] {
        self.timings.get(operation).map_or(&[], Vec::as_slice)
    }

    /// Average timing for `operation`.
    #[must_use]
    pub fn get_average_timing(&self, operation: &str) -> Option<std::time::Duration> {
        let samples = self.get_timing(operation);
        if samples.is_empty() {
            return None;
        }
        let total: std::time::Duration = samples.iter().sum();
        Some(total / samples.len() as u32)
    }

    /// `(count, average, max)` for `operation`.
    #[must_use]
    pub fn get_stats(&self, operation: &str) -> Option<(usize, std::time::Duration, std::time::Duration)> {
        let samples = self.get_timing(operation);
        if samples.is_empty() {
            return None;
        }
        let max = *samples.iter().max()?;
        Some((samples.len(), self.get_average_timing(operation)?, max))
    }

    /// Records `tokens` consumed and `elapsed` time spent on `feature`.
    pub fn record_feature_time(&mut self, feature: impl Into<String>, tokens: u64, elapsed: std::time::Duration) {
        let feature = feature.into();
        *self.tokens_by_feature.entry(feature.clone()).or_insert(0) += tokens;
        *self
            .time_by_feature
            .entry(feature)
            .or_insert(std::time::Duration::ZERO) += elapsed;
    }

    /// Average tokens spent per feature with recorded time.
    #[must_use]
    pub fn average_tokens_per_feature(&self) -> f64 {
        if self.tokens_by_feature.is_empty() {
            return 0.0;
        }
        self.tokens_by_feature.values().sum::<u64>() as f64 / self.tokens_by_feature.len() as f64
    }

    /// `(tokens_per_minute, features_per_hour)` across all recorded
    /// features.
    #[must_use]
    pub fn get_efficiency_metrics(&self) -> (f64, f64) {
        let total_tokens: u64 = self.tokens_by_feature.values().sum();
        let total_time: std::time::Duration = self.time_by_feature.values().sum();
        let minutes = total_time.as_secs_f64() / 60.0;
        let hours = total_time.as_secs_f64() / 3_600.0;
        let tokens_per_minute = if minutes > 0.0 { total_tokens as f64 / minutes } else { 0.0 };
        let features_per_hour = if hours > 0.0 {
            self.time_by_feature.len() as f64 / hours
        } else {
            0.0
        };
        (tokens_per_minute, features_per_hour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_sums_values() {
        let mut collector = MetricsCollector::new();
        collector.record(MetricKind::TokensUsed, 100.0, HashMap::new());
        collector.record(MetricKind::TokensUsed, 50.0, HashMap::new());
        assert!((collector.get_sum(MetricKind::TokensUsed) - 150.0).abs() < f64::EPSILON);
        assert!((collector.get_average(MetricKind::TokensUsed) - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn session_metrics_tracks_distinct_features() {
        let mut session = SessionMetrics::new("s1");
        session.record_feature_started("auth");
        session.record_feature_started("auth");
        session.record_feature_completed("auth");
        assert_eq!(session.features_started(), 1);
        assert_eq!(session.features_completed(), 1);
    }

    #[test]
    fn performance_tracker_computes_averages() {
        let mut tracker = PerformanceTracker::new();
        tracker.record_timing("build", std::time::Duration::from_millis(100));
        tracker.record_timing("build", std::time::Duration::from_millis(300));
        assert_eq!(
            tracker.get_average_timing("build"),
            Some(std::time::Duration::from_millis(200))
        );
    }
}
