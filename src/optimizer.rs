//! Self-optimizer: outcome-driven parameter tuning.
//!
//! Ported from `self_optimizer.py`: a set of named, range-clamped
//! parameters, an outcome history, heuristic recommendations, and three
//! search strategies for `optimize_step`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::persistence;

/// The category of a recorded run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeType {
    /// The run succeeded.
    Success,
    /// The run failed outright.
    Failure,
    /// The run exceeded its time budget.
    Timeout,
    /// The run was retried at least once before finishing.
    Retry,
}

/// A single recorded outcome, tying a result to the parameter values in
/// effect when it happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    /// What happened.
    pub outcome_type: OutcomeType,
    /// The parameter values in effect at the time, by name.
    pub parameters: HashMap<String, f64>,
    /// When it was recorded.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// The search strategy `optimize_step` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationStrategy {
    /// Nudge towards the direction that improved the success rate last.
    HillClimbing,
    /// Pick a new value uniformly at random within range.
    RandomSearch,
    /// Hill-climb, occasionally accepting a worse value with a
    /// temperature that cools as more outcomes accumulate.
    SimulatedAnnealing,
}

/// One entry in a parameter's adjustment history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterHistoryEntry {
    /// The value after this adjustment.
    pub value: f64,
    /// When it was recorded.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// A tunable parameter with a clamped range and an adjustment history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningParameter {
    /// The parameter's name, used to key recommendations/correlations.
    pub name: String,
    /// Current value.
    pub value: f64,
    /// Inclusive minimum.
    pub min: f64,
    /// Inclusive maximum.
    pub max: f64,
    /// Step size used by hill-climbing adjustments.
    pub step: f64,
    /// Every value this parameter has held, including its initial one.
    pub history: Vec<ParameterHistoryEntry>,
}

impl TuningParameter {
    /// Builds a parameter, recording its initial value into history.
    #[must_use]
    pub fn new(name: impl Into<String>, value: f64, min: f64, max: f64, step: f64) -> Self {
        let value = value.clamp(min, max);
        Self {
            name: name.into(),
            value,
            min,
            max,
            step,
            history: vec![ParameterHistoryEntry {
                value,
                timestamp: chrono::Utc::now(),
            }],
        }
    }

    /// Clamps and applies `new_value`, appending it to history.
    pub fn adjust(&mut self, new_value: f64) {
        self.value = new_value.clamp(self.min, self.max);
        self.history.push(ParameterHistoryEntry {
            value: self.value,
            timestamp: chrono::Utc::now(),
        });
    }
}

/// Errors raised by the self-optimizer.
#[derive(Error, Debug)]
pub enum OptimizerError {
    /// The named parameter is not registered.
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// Persistence failure saving/loading optimizer state.
    #[error(transparent)]
    Persistence(#[from] crate::error::PersistenceError),
}

/// A suggested new value for a parameter, with the reasoning behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    /// The parameter this recommendation applies to.
    pub parameter: String,
    /// The suggested new value.
    pub suggested_value: f64,
    /// Why this was suggested.
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OptimizerSnapshot {
    parameters: HashMap<String, TuningParameter>,
    outcomes: Vec<Outcome>,
    strategy: OptimizationStrategy,
    learning_rate: f64,
}

/// Tunes a set of named parameters from observed run outcomes.
#[derive(Debug)]
pub struct SelfOptimizer {
    parameters: HashMap<String, TuningParameter>,
    outcomes: Vec<Outcome>,
    strategy: OptimizationStrategy,
    learning_rate: f64,
}

impl Default for SelfOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SelfOptimizer {
    /// Builds an optimizer with no registered parameters or outcomes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            parameters: HashMap::new(),
            outcomes: Vec::new(),
            strategy: OptimizationStrategy::HillClimbing,
            learning_rate: 0.1,
        }
    }

    /// Registers `parameter`.
    pub fn register_parameter(&mut self, parameter: TuningParameter) {
        self.parameters.insert(parameter.name.clone(), parameter);
    }

    /// Looks up a registered parameter by name.
    #[must_use]
    pub fn get_parameter(&self, name: &str) -> Option<&TuningParameter> {
        self.parameters.get(name)
    }

    /// Sets the search strategy `optimize_step` applies.
    pub fn set_strategy(&mut self, strategy: OptimizationStrategy) {
        self.strategy = strategy;
    }

    /// Sets the hill-climbing learning rate.
    pub fn set_learning_rate(&mut self, rate: f64) {
        self.learning_rate = rate;
    }

    /// Records an outcome against the current parameter values.
    pub fn record_outcome(&mut self, outcome_type: OutcomeType) {
        let parameters = self
            .parameters
            .iter()
            .map(|(name, p)| (name.clone(), p.value))
            .collect();
        self.outcomes.push(Outcome {
            outcome_type,
            parameters,
            timestamp: chrono::Utc::now(),
        });
    }

    fn recent_outcomes(&self) -> &[Outcome] {
        let start = self.outcomes.len().saturating_sub(20);
        &self.outcomes[start..]
    }

    /// Fraction of the last (up to) 20 outcomes that succeeded.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let recent = self.recent_outcomes();
        if recent.is_empty() {
            return 1.0;
        }
        recent
            .iter()
            .filter(|o| o.outcome_type == OutcomeType::Success)
            .count() as f64
            / recent.len() as f64
    }

    fn rate_of(&self, outcome_type: OutcomeType) -> f64 {
        let recent = self.recent_outcomes();
        if recent.is_empty() {
            return 0.0;
        }
        recent.iter().filter(|o| o.outcome_type == outcome_type).count() as f64 / recent.len() as f64
    }

    /// Heuristic recommendations derived from the last (up to) 20
    /// outcomes: timeouts above 30% suggest raising a `"timeout"`
    /// parameter by 50%; retry failures above 30% suggest stepping a
    /// `"retry"` parameter up; a success rate above 90% suggests easing
    /// an `"iteration"` parameter down by 10%.
    #[must_use]
    pub fn get_recommendations(&self) -> Vec<Recommendation> {
        let mut recs = Vec::new();
        let timeout_rate = self.rate_of(OutcomeType::Timeout);
        let failure_rate = self.rate_of(OutcomeType::Failure);
        let success_rate = self.success_rate();

        for param in self.parameters.values() {
            if timeout_rate > 0.3 && param.name.contains("timeout") {
                recs.push(Recommendation {
                    parameter: param.name.clone(),
                    suggested_value: (param.value * 1.5).min(param.max),
                    reason: format!("timeout rate {:.0}% over last outcomes", timeout_rate * 100.0),
                });
            }
            if failure_rate > 0.3 && param.name.contains("retry") {
                recs.push(Recommendation {
                    parameter: param.name.clone(),
                    suggested_value: (param.value + param.step).min(param.max),
                    reason: "retry failure rate above 30%".to_string(),
                });
            }
            if success_rate > 0.9 && param.name.contains("iteration") {
                recs.push(Recommendation {
                    parameter: param.name.clone(),
                    suggested_value: (param.value * 0.9).max(param.min),
                    reason: "success rate above 90%, easing iteration budget down".to_string(),
                });
            }
        }
        recs
    }

    fn temperature(&self) -> f64 {
        (1.0 - self.outcomes.len() as f64 / 100.0).max(0.1)
    }

    /// Applies one optimization step to `parameter_name` using the
    /// current strategy, returning the new value.
    pub fn optimize_step(&mut self, parameter_name: &str) -> Result<f64, OptimizerError> {
        let success_rate = self.success_rate();
        let strategy = self.strategy;
        let learning_rate = self.learning_rate;
        let temperature = self.temperature();

        let param = self
            .parameters
            .get_mut(parameter_name)
            .ok_or_else(|| OptimizerError::UnknownParameter(parameter_name.to_string()))?;

        let new_value = match strategy {
            OptimizationStrategy::HillClimbing => {
                let direction = if success_rate >= 0.5 { 1.0 } else { -1.0 };
                param.value + direction * param.step * learning_rate
            }
            OptimizationStrategy::RandomSearch => {
                use rand::Rng;
                rand::thread_rng().gen_range(param.min..=param.max)
            }
            OptimizationStrategy::SimulatedAnnealing => {
                use rand::Rng;
                let mut rng = rand::thread_rng();
                let direction = if success_rate >= 0.5 { 1.0 } else { -1.0 };
                let base = param.value + direction * param.step * learning_rate;
                if rng.gen::<f64>() < temperature {
                    base + rng.gen_range(-param.step..=param.step)
                } else {
                    base
                }
            }
        };

        param.adjust(new_value);
        Ok(param.value)
    }

    /// A rough correlation (in `[-1, 1]`) between `parameter_name`'s
    /// recorded value and whether the outcome it was recorded with
    /// succeeded, over the full outcome history.
    #[must_use]
    pub fn get_correlations(&self, parameter_name: &str) -> Option<f64> {
        let points: Vec<(f64, f64)> = self
            .outcomes
            .iter()
            .filter_map(|o| {
                let value = *o.parameters.get(parameter_name)?;
                let success = if o.outcome_type == OutcomeType::Success { 1.0 } else { 0.0 };
                Some((value, success))
            })
            .collect();
        if points.len() < 2 {
            return None;
        }
        Some(pearson_correlation(&points))
    }

    /// A short human-readable summary for dashboards/logs.
    #[must_use]
    pub fn get_summary(&self) -> String {
        format!(
            "{} parameters, {} outcomes, success rate {:.0}%",
            self.parameters.len(),
            self.outcomes.len(),
            self.success_rate() * 100.0
        )
    }

    /// Saves parameters, outcomes, strategy, and learning rate to `path`.
    pub fn save(&self, path: &Path) -> Result<(), OptimizerError> {
        let snapshot = OptimizerSnapshot {
            parameters: self.parameters.clone(),
            outcomes: self.outcomes.clone(),
            strategy: self.strategy,
            learning_rate: self.learning_rate,
        };
        persistence::save_json(path, &snapshot)?;
        Ok(())
    }

    /// Loads parameters, outcomes, strategy, and learning rate from
    /// `path`.
    pub fn load(path: &Path) -> Result<Self, OptimizerError> {
        let snapshot: OptimizerSnapshot = persistence::load_json(path)?;
        Ok(Self {
            parameters: snapshot.parameters,
            outcomes: snapshot.outcomes,
            strategy: snapshot.strategy,
            learning_rate: snapshot.learning_rate,
        })
    }
}

fn pearson_correlation(points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in points {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjust_clamps_to_range() {
        let mut param = TuningParameter::new("timeout_secs", 10.0, 5.0, 20.0, 2.0);
        param.adjust(100.0);
        assert!((param.value - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn high_timeout_rate_recommends_raising_timeout_parameter() {
        let mut optimizer = SelfOptimizer::new();
        optimizer.register_parameter(TuningParameter::new("timeout_secs", 10.0, 5.0, 60.0, 2.0));
        for _ in 0..5 {
            optimizer.record_outcome(OutcomeType::Timeout);
        }
        optimizer.record_outcome(OutcomeType::Success);
        let recs = optimizer.get_recommendations();
        assert!(recs.iter().any(|r| r.parameter == "timeout_secs"));
    }

    #[test]
    fn optimize_step_stays_within_bounds() {
        let mut optimizer = SelfOptimizer::new();
        optimizer.register_parameter(TuningParameter::new("retry_count", 3.0, 1.0, 5.0, 1.0));
        optimizer.set_strategy(OptimizationStrategy::RandomSearch);
        let value = optimizer.optimize_step("retry_count").unwrap();
        assert!((1.0..=5.0).contains(&value));
    }
}
