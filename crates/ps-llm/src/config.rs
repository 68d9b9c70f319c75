use serde::{Deserialize, Serialize};

/// Connection and retry settings for one LLM client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Resolved from the environment by the caller; never persisted.
    #[serde(skip_serializing)]
    pub api_key: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            api_key: String::new(),
            temperature: 0.2,
            max_tokens: 4_096,
            max_retries: 3,
            retry_delay_ms: 500,
            timeout_ms: 60_000,
        }
    }
}

impl LlmConfig {
    /// Overlay selected fields from a JSON-ish options object, as used by
    /// `plan(prompt, {model: ..., temperature: ...})`.
    pub fn with_overrides(mut self, options: &serde_json::Value) -> Self {
        if let Some(model) = options.get("model").and_then(|v| v.as_str()) {
            self.model = model.to_string();
        }
        if let Some(base_url) = options.get("base_url").and_then(|v| v.as_str()) {
            self.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(temperature) = options.get("temperature").and_then(|v| v.as_f64()) {
            self.temperature = temperature;
        }
        if let Some(max_tokens) = options.get("max_tokens").and_then(|v| v.as_u64()) {
            self.max_tokens = max_tokens as u32;
        }
        if let Some(timeout_ms) = options.get("timeout_ms").and_then(|v| v.as_u64()) {
            self.timeout_ms = timeout_ms;
        }
        if let Some(max_retries) = options.get("max_retries").and_then(|v| v.as_u64()) {
            self.max_retries = max_retries as u32;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = LlmConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout_ms, 60_000);
    }

    #[test]
    fn test_overrides() {
        let config = LlmConfig::default().with_overrides(&json!({
            "model": "gpt-4o",
            "temperature": 0.7,
            "timeout_ms": 5_000
        }));
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.timeout_ms, 5_000);
    }

    #[test]
    fn test_api_key_not_serialized() {
        let config = LlmConfig {
            api_key: "secret".into(),
            ..LlmConfig::default()
        };
        let encoded = serde_json::to_string(&config).unwrap();
        assert!(!encoded.contains("secret"));
    }
}
