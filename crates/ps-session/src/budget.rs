//! Running counters against a [`BudgetConfig`]. Counters are monotone
//! within a run; the first limit crossed names the `BudgetExceeded`.

use std::time::Instant;

use ps_core::budget::estimate_cost_usd;
use ps_core::{BudgetConfig, BudgetSnapshot, PsError, PsResult, TokenUsage};

#[derive(Debug)]
pub struct BudgetTracker {
    config: BudgetConfig,
    started: Instant,
    steps: u64,
    tool_calls: u64,
    llm_calls: u64,
    tokens: u64,
    cost_usd: f64,
}

impl BudgetTracker {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            started: Instant::now(),
            steps: 0,
            tool_calls: 0,
            llm_calls: 0,
            tokens: 0,
            cost_usd: 0.0,
        }
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn llm_calls(&self) -> u64 {
        self.llm_calls
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn add_step(&mut self) {
        self.steps += 1;
    }

    pub fn add_tool_call(&mut self) {
        self.tool_calls += 1;
    }

    /// Count a call before it is issued, so an over-budget call never
    /// reaches the provider.
    pub fn begin_llm_call(&mut self) {
        self.llm_calls += 1;
    }

    /// Fold in the usage a finished call reported.
    pub fn record_llm_usage(&mut self, model: &str, usage: TokenUsage) {
        self.tokens += usage.total_tokens;
        self.cost_usd += estimate_cost_usd(model, usage.total_tokens);
    }

    /// Error with the name of the first exceeded counter, if any.
    pub fn check(&self) -> PsResult<()> {
        if self.steps > self.config.max_steps {
            return Err(PsError::Budget("maxSteps".into()));
        }
        if self.elapsed_ms() > self.config.max_time_ms {
            return Err(PsError::Budget("maxTimeMs".into()));
        }
        if self.tool_calls > self.config.max_tool_calls {
            return Err(PsError::Budget("maxToolCalls".into()));
        }
        if self.llm_calls > self.config.max_llm_calls {
            return Err(PsError::Budget("maxLLMCalls".into()));
        }
        if self.tokens > self.config.max_tokens {
            return Err(PsError::Budget("maxTokens".into()));
        }
        if self.cost_usd > self.config.max_cost_usd {
            return Err(PsError::Budget("maxCostUsd".into()));
        }
        Ok(())
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let counters = BudgetSnapshot {
            steps: self.steps,
            time_ms: self.elapsed_ms(),
            tool_calls: self.tool_calls,
            llm_calls: self.llm_calls,
            tokens: self.tokens,
            cost_usd: self.cost_usd,
            percent: Default::default(),
        };
        BudgetSnapshot::compute(&self.config, &counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_exceedance_names_counter() {
        let mut tracker = BudgetTracker::new(BudgetConfig {
            max_steps: 2,
            ..BudgetConfig::default()
        });
        tracker.add_step();
        tracker.add_step();
        assert!(tracker.check().is_ok());
        tracker.add_step();
        let err = tracker.check().unwrap_err();
        assert_eq!(err.to_string(), "BudgetExceeded: maxSteps");
    }

    #[test]
    fn test_llm_call_accumulates_tokens_and_cost() {
        let mut tracker = BudgetTracker::new(BudgetConfig::default());
        tracker.begin_llm_call();
        tracker.record_llm_usage(
            "unknown-model",
            TokenUsage {
                prompt_tokens: 700,
                completion_tokens: 300,
                total_tokens: 1_000,
            },
        );
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.llm_calls, 1);
        assert_eq!(snapshot.tokens, 1_000);
        assert!((snapshot.cost_usd - 0.002).abs() < 1e-9);
    }

    #[test]
    fn test_llm_call_budget_gate_before_issue() {
        let mut tracker = BudgetTracker::new(BudgetConfig {
            max_llm_calls: 1,
            ..BudgetConfig::default()
        });
        tracker.begin_llm_call();
        assert!(tracker.check().is_ok());
        tracker.begin_llm_call();
        assert_eq!(
            tracker.check().unwrap_err().to_string(),
            "BudgetExceeded: maxLLMCalls"
        );
    }

    #[test]
    fn test_token_budget_exceedance() {
        let mut tracker = BudgetTracker::new(BudgetConfig {
            max_tokens: 100,
            ..BudgetConfig::default()
        });
        tracker.begin_llm_call();
        tracker.record_llm_usage(
            "m",
            TokenUsage {
                total_tokens: 101,
                ..TokenUsage::default()
            },
        );
        assert_eq!(
            tracker.check().unwrap_err().to_string(),
            "BudgetExceeded: maxTokens"
        );
    }

    #[test]
    fn test_snapshot_percentages_track_counters() {
        let mut tracker = BudgetTracker::new(BudgetConfig {
            max_tool_calls: 4,
            ..BudgetConfig::default()
        });
        tracker.add_tool_call();
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.percent["maxToolCalls"], 25.0);
    }
}
