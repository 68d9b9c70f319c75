//! `ps.toml` loading: optional project-level defaults for the LLM
//! connection, policy, and budgets. CLI flags win over file values.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use ps_core::{BudgetConfig, Policy};
use ps_llm::LlmConfig;
use serde::Deserialize;

pub const CONFIG_FILE: &str = "ps.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    pub llm: LlmSection,
    pub policy: PolicySection,
    pub budget: BudgetSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmSection {
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Name of the environment variable holding the API key; the key
    /// itself never lives in the file.
    pub api_key_env: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicySection {
    pub allow_tools: Option<Vec<String>>,
    pub allow_commands: Option<Vec<String>>,
    pub require_approval: Option<bool>,
    pub max_file_bytes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BudgetSection {
    pub max_steps: Option<u64>,
    pub max_time_ms: Option<u64>,
    pub max_tool_calls: Option<u64>,
    pub max_llm_calls: Option<u64>,
    pub max_tokens: Option<u64>,
    pub max_cost_usd: Option<f64>,
}

impl ProjectConfig {
    /// Read `<project>/ps.toml`; a missing file yields defaults.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn llm_config(&self) -> LlmConfig {
        let mut config = LlmConfig::default();
        if let Some(base_url) = &self.llm.base_url {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(model) = &self.llm.model {
            config.model = model.clone();
        }
        if let Some(env_name) = &self.llm.api_key_env {
            config.api_key = std::env::var(env_name).unwrap_or_default();
        }
        if let Some(temperature) = self.llm.temperature {
            config.temperature = temperature;
        }
        if let Some(max_tokens) = self.llm.max_tokens {
            config.max_tokens = max_tokens;
        }
        if let Some(max_retries) = self.llm.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(retry_delay_ms) = self.llm.retry_delay_ms {
            config.retry_delay_ms = retry_delay_ms;
        }
        if let Some(timeout_ms) = self.llm.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        config
    }

    pub fn policy(&self) -> Policy {
        let mut policy = Policy::default();
        if let Some(tools) = &self.policy.allow_tools {
            policy.allow_tools = tools.iter().cloned().collect::<BTreeSet<_>>();
        }
        if let Some(commands) = &self.policy.allow_commands {
            policy.allow_commands = commands.iter().cloned().collect::<BTreeSet<_>>();
        }
        if let Some(require_approval) = self.policy.require_approval {
            policy.require_approval = require_approval;
        }
        if let Some(max_file_bytes) = self.policy.max_file_bytes {
            policy.max_file_bytes = max_file_bytes;
        }
        policy
    }

    pub fn budget(&self) -> BudgetConfig {
        let mut budget = BudgetConfig::default();
        if let Some(max_steps) = self.budget.max_steps {
            budget.max_steps = max_steps;
        }
        if let Some(max_time_ms) = self.budget.max_time_ms {
            budget.max_time_ms = max_time_ms;
        }
        if let Some(max_tool_calls) = self.budget.max_tool_calls {
            budget.max_tool_calls = max_tool_calls;
        }
        if let Some(max_llm_calls) = self.budget.max_llm_calls {
            budget.max_llm_calls = max_llm_calls;
        }
        if let Some(max_tokens) = self.budget.max_tokens {
            budget.max_tokens = max_tokens;
        }
        if let Some(max_cost_usd) = self.budget.max_cost_usd {
            budget.max_cost_usd = max_cost_usd;
        }
        budget
    }
}
