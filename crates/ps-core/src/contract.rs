use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One problem surfaced by a sub-workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractIssue {
    pub severity: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Quality record a sub-workflow returns for pipeline gating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityContract {
    pub ok: bool,
    pub issues: Vec<ContractIssue>,
    pub evidence: BTreeMap<String, Value>,
    pub metrics: BTreeMap<String, f64>,
}

impl Default for QualityContract {
    fn default() -> Self {
        Self {
            ok: true,
            issues: Vec::new(),
            evidence: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }
}

impl QualityContract {
    /// The contract a child produces on success when user code did not
    /// surface a richer one.
    pub fn default_success(time_ms: u64, steps: u64, llm_calls: u64) -> Self {
        let mut metrics = BTreeMap::new();
        metrics.insert("timeMs".into(), time_ms as f64);
        metrics.insert("steps".into(), steps as f64);
        metrics.insert("llmCalls".into(), llm_calls as f64);
        Self {
            metrics,
            ..Self::default()
        }
    }

    /// Interpret a contract-shaped value returned from a child script.
    /// Values that do not look like a contract yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        object.get("ok")?.as_bool()?;
        serde_json::from_value(value.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_success_metrics() {
        let contract = QualityContract::default_success(1_200, 34, 2);
        assert!(contract.ok);
        assert!(contract.issues.is_empty());
        assert_eq!(contract.metrics["timeMs"], 1_200.0);
        assert_eq!(contract.metrics["steps"], 34.0);
        assert_eq!(contract.metrics["llmCalls"], 2.0);
    }

    #[test]
    fn test_from_value_accepts_contract_shape() {
        let value = json!({
            "ok": false,
            "issues": [{"severity": "error", "message": "missing test", "file": "a.rs"}],
            "evidence": {"checked": true},
            "metrics": {"coverage": 0.8}
        });
        let contract = QualityContract::from_value(&value).unwrap();
        assert!(!contract.ok);
        assert_eq!(contract.issues.len(), 1);
        assert_eq!(contract.issues[0].file.as_deref(), Some("a.rs"));
    }

    #[test]
    fn test_from_value_rejects_non_contract() {
        assert!(QualityContract::from_value(&json!("just a string")).is_none());
        assert!(QualityContract::from_value(&json!({"message": "no ok field"})).is_none());
    }
}
