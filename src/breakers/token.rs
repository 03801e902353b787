//! Token-budget circuit breaker.

use serde::{Deserialize, Serialize};

use super::{BreakerCheck, CircuitBreakerState};
use crate::domain_types::TokenCount;

/// Configuration for the token breaker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Hard token budget for the session.
    pub max_tokens: u64,
    /// Percentage of `max_tokens` at which the breaker opens.
    pub threshold_pct: u8,
    /// Percentage of `max_tokens` at which a warning is raised.
    pub warning_pct: u8,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            max_tokens: 100_000,
            threshold_pct: 90,
            warning_pct: 70,
        }
    }
}

/// Tracks cumulative token usage against a budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBreaker {
    config: TokenConfig,
    used: TokenCount,
    state: CircuitBreakerState,
}

impl TokenBreaker {
    /// Builds a breaker with zero tokens consumed.
    #[must_use]
    pub fn new(config: TokenConfig) -> Self {
        Self {
            config,
            used: TokenCount::default(),
            state: CircuitBreakerState::default(),
        }
    }

    /// This breaker's configuration.
    #[must_use]
    pub fn config(&self) -> TokenConfig {
        self.config
    }

    /// The breaker's current state machine, without running a check.
    #[must_use]
    pub fn state(&self) -> &CircuitBreakerState {
        &self.state
    }

    /// Moves the breaker to half-open, so the next `check` probes whether
    /// usage has fallen back under the threshold instead of staying open.
    pub fn begin_probe(&mut self) {
        self.state.half_open();
    }

    /// Records `amount` additional tokens consumed.
    pub fn consume(&mut self, amount: u64) {
        self.used = TokenCount::try_new(u64::from(self.used) + amount).unwrap_or(self.used);
    }

    /// Tokens consumed so far.
    #[must_use]
    pub fn used(&self) -> u64 {
        u64::from(self.used)
    }

    /// Checks current usage against the configured thresholds.
    ///
    /// While half-open (a host-initiated recovery probe), usage under the
    /// threshold closes the circuit; usage still at or above it reopens it
    /// with a "probe failed" reason, matching `TokenCircuitBreaker.check`.
    pub fn check(&mut self) -> BreakerCheck {
        let pct = usage_pct(self.used(), self.config.max_tokens);

        if self.state.is_half_open() {
            return if pct < u64::from(self.config.threshold_pct) {
                self.state.close();
                BreakerCheck::closed()
            } else {
                self.state.open();
                BreakerCheck::open(format!("token usage at {pct}% (probe failed)"))
            };
        }

        if pct >= u64::from(self.config.threshold_pct) {
            self.state.open();
            return BreakerCheck::open(format!(
                "token usage at {pct}% of budget ({} / {})",
                self.used(),
                self.config.max_tokens
            ));
        }
        if pct >= u64::from(self.config.warning_pct) {
            return BreakerCheck::closed_with_warning(format!(
                "token usage approaching budget: {pct}%"
            ));
        }
        BreakerCheck::closed()
    }
}

fn usage_pct(used: u64, max: u64) -> u64 {
    if max == 0 {
        return 100;
    }
    used.saturating_mul(100) / max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_past_threshold() {
        let mut breaker = TokenBreaker::new(TokenConfig::default());
        breaker.consume(91_000);
        assert!(breaker.check().is_open());
    }

    #[test]
    fn warns_between_warning_and_threshold() {
        let mut breaker = TokenBreaker::new(TokenConfig::default());
        breaker.consume(75_000);
        let check = breaker.check();
        assert!(!check.is_open());
        assert!(check.warning.is_some());
    }

    #[test]
    fn closed_with_no_warning_below_warning_threshold() {
        let mut breaker = TokenBreaker::new(TokenConfig::default());
        let check = breaker.check();
        assert!(check.warning.is_none());
    }

    #[test]
    fn half_open_probe_closes_once_usage_drops_under_threshold() {
        let mut breaker = TokenBreaker::new(TokenConfig::default());
        breaker.consume(95_000);
        assert!(breaker.check().is_open());

        breaker.begin_probe();
        assert!(breaker.check().is_open(), "usage still over threshold");

        let mut recovered = TokenBreaker::new(TokenConfig::default());
        recovered.consume(50_000);
        recovered.begin_probe();
        let probe_result = recovered.check();
        assert!(!probe_result.is_open());
        assert!(recovered.state().is_closed());
    }
}
