//! The append-only event model. Every event carries the step counter at
//! emission time and a wall-clock timestamp; the JSONL writer appends them
//! in emission order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::budget::BudgetSnapshot;
use crate::contract::QualityContract;
use crate::plan::Plan;

/// Provider-reported token usage for one LLM call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Result record attached to a `subworkflow_end` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubworkflowResult {
    pub ok: bool,
    pub child_run_id: String,
    pub logs_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub budget: BudgetSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<QualityContract>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Stmt {
        node: String,
    },
    Tool {
        name: String,
        input: Value,
        output: Value,
    },
    Llm {
        input: Value,
        plan: Plan,
        usage: TokenUsage,
        latency_ms: u64,
        retries: u32,
    },
    Error {
        message: String,
    },
    LoopWarning {
        kind: String,
        suggestion: String,
    },
    BudgetUpdate {
        budget: BudgetSnapshot,
    },
    ApprovalRequest {
        action: String,
        summary: String,
    },
    ApprovalResponse {
        approved: bool,
    },
    SubworkflowStart {
        child_run_id: String,
        path: String,
        options: Value,
    },
    SubworkflowEnd {
        child_run_id: String,
        result: SubworkflowResult,
    },
}

impl EventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Stmt { .. } => "stmt",
            Self::Tool { .. } => "tool",
            Self::Llm { .. } => "llm",
            Self::Error { .. } => "error",
            Self::LoopWarning { .. } => "loop_warning",
            Self::BudgetUpdate { .. } => "budget_update",
            Self::ApprovalRequest { .. } => "approval_request",
            Self::ApprovalResponse { .. } => "approval_response",
            Self::SubworkflowStart { .. } => "subworkflow_start",
            Self::SubworkflowEnd { .. } => "subworkflow_end",
        }
    }
}

/// One line of `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub step: u64,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn now(step: u64, kind: EventKind) -> Self {
        Self {
            step,
            ts: Utc::now(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Action;
    use serde_json::json;

    #[test]
    fn test_event_jsonl_shape() {
        let event = Event::now(
            3,
            EventKind::Tool {
                name: "READ_FILE".into(),
                input: json!({"path": "a.txt"}),
                output: json!("contents"),
            },
        );
        let line = serde_json::to_value(&event).unwrap();
        assert_eq!(line["step"], 3);
        assert_eq!(line["type"], "tool");
        assert_eq!(line["name"], "READ_FILE");
        assert!(line["ts"].is_string());
    }

    #[test]
    fn test_llm_event_roundtrip() {
        let plan = Plan::new(
            Action::Report {
                message: "done".into(),
                files_changed: None,
                next_suggestions: None,
            },
            true,
        );
        let event = Event::now(
            7,
            EventKind::Llm {
                input: json!({"user": "."}),
                plan,
                usage: TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
                latency_ms: 120,
                retries: 1,
            },
        );
        let line = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.kind.type_name(), "llm");
    }

    #[test]
    fn test_event_type_names_match_wire_tags() {
        let kinds = [
            (
                EventKind::Error {
                    message: "x".into(),
                },
                "error",
            ),
            (
                EventKind::LoopWarning {
                    kind: "exact_repeat".into(),
                    suggestion: "vary the action".into(),
                },
                "loop_warning",
            ),
            (
                EventKind::ApprovalResponse { approved: false },
                "approval_response",
            ),
        ];
        for (kind, expected) in kinds {
            let value = serde_json::to_value(Event::now(0, kind.clone())).unwrap();
            assert_eq!(value["type"], expected);
            assert_eq!(kind.type_name(), expected);
        }
    }
}
