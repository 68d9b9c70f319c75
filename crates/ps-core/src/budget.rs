//! Budget limits and snapshots. Exceedance of any limit is fatal to a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Numeric limits for one run. Counter names match the wire form used in
/// `BudgetExceeded: <which>` messages and snapshot percent keys.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BudgetConfig {
    pub max_steps: u64,
    pub max_time_ms: u64,
    pub max_tool_calls: u64,
    pub max_llm_calls: u64,
    pub max_tokens: u64,
    pub max_cost_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            max_time_ms: 600_000,
            max_tool_calls: 500,
            max_llm_calls: 100,
            max_tokens: 1_000_000,
            max_cost_usd: 10.0,
        }
    }
}

impl BudgetConfig {
    /// Merge an override on top of this config, taking the smaller value
    /// for each limit so a child can never outspend its parent.
    pub fn capped_by(&self, other: &Self) -> Self {
        Self {
            max_steps: self.max_steps.min(other.max_steps),
            max_time_ms: self.max_time_ms.min(other.max_time_ms),
            max_tool_calls: self.max_tool_calls.min(other.max_tool_calls),
            max_llm_calls: self.max_llm_calls.min(other.max_llm_calls),
            max_tokens: self.max_tokens.min(other.max_tokens),
            max_cost_usd: self.max_cost_usd.min(other.max_cost_usd),
        }
    }
}

/// Point-in-time view of all counters plus their percent-of-max.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSnapshot {
    pub steps: u64,
    pub time_ms: u64,
    pub tool_calls: u64,
    pub llm_calls: u64,
    pub tokens: u64,
    pub cost_usd: f64,
    pub percent: BTreeMap<String, f64>,
}

impl BudgetSnapshot {
    pub fn compute(config: &BudgetConfig, counters: &Self) -> Self {
        let mut percent = BTreeMap::new();
        percent.insert(
            "maxSteps".into(),
            percent_of(counters.steps as f64, config.max_steps as f64),
        );
        percent.insert(
            "maxTimeMs".into(),
            percent_of(counters.time_ms as f64, config.max_time_ms as f64),
        );
        percent.insert(
            "maxToolCalls".into(),
            percent_of(counters.tool_calls as f64, config.max_tool_calls as f64),
        );
        percent.insert(
            "maxLLMCalls".into(),
            percent_of(counters.llm_calls as f64, config.max_llm_calls as f64),
        );
        percent.insert(
            "maxTokens".into(),
            percent_of(counters.tokens as f64, config.max_tokens as f64),
        );
        percent.insert(
            "maxCostUsd".into(),
            percent_of(counters.cost_usd, config.max_cost_usd),
        );
        Self {
            percent,
            ..counters.clone()
        }
    }
}

fn percent_of(current: f64, max: f64) -> f64 {
    if max <= 0.0 { 0.0 } else { current / max * 100.0 }
}

/// USD per 1000 tokens for known models; unknown models fall back to a
/// flat conservative rate.
pub fn rate_per_1k_tokens(model: &str) -> f64 {
    // Longest prefixes first so "gpt-4o-mini" never matches the "gpt-4o" row.
    const RATES: &[(&str, f64)] = &[
        ("gpt-4o-mini", 0.000_45),
        ("gpt-4o", 0.0075),
        ("gpt-4.1-mini", 0.001_2),
        ("gpt-4.1", 0.006),
        ("o3-mini", 0.003_3),
        ("claude-sonnet-4", 0.009),
        ("claude-haiku-3-5", 0.002_4),
    ];
    const FALLBACK: f64 = 0.002;

    RATES
        .iter()
        .find(|(name, _)| model.starts_with(name))
        .map_or(FALLBACK, |(_, rate)| *rate)
}

/// Cost of a single call: `tokens/1000 * rate(model)`.
pub fn estimate_cost_usd(model: &str, tokens: u64) -> f64 {
    tokens as f64 / 1000.0 * rate_per_1k_tokens(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capped_by_takes_minimum() {
        let parent = BudgetConfig {
            max_steps: 100,
            max_llm_calls: 10,
            ..BudgetConfig::default()
        };
        let child_override = BudgetConfig {
            max_steps: 50,
            max_llm_calls: 99,
            ..BudgetConfig::default()
        };
        let merged = parent.capped_by(&child_override);
        assert_eq!(merged.max_steps, 50);
        assert_eq!(merged.max_llm_calls, 10);
    }

    #[test]
    fn test_snapshot_percentages() {
        let config = BudgetConfig {
            max_steps: 200,
            ..BudgetConfig::default()
        };
        let counters = BudgetSnapshot {
            steps: 50,
            ..BudgetSnapshot::default()
        };
        let snapshot = BudgetSnapshot::compute(&config, &counters);
        assert_eq!(snapshot.percent["maxSteps"], 25.0);
        assert_eq!(snapshot.percent["maxCostUsd"], 0.0);
    }

    #[test]
    fn test_known_model_rate_beats_fallback() {
        assert_eq!(rate_per_1k_tokens("gpt-4o-2024-08-06"), 0.0075);
        assert_eq!(rate_per_1k_tokens("totally-unknown"), 0.002);
    }

    #[test]
    fn test_cost_estimate() {
        let cost = estimate_cost_usd("unknown-model", 5_000);
        assert!((cost - 0.01).abs() < 1e-9);
    }
}
