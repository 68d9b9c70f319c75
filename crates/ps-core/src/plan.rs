//! The Plan schema: the tagged single-action object an LLM returns and the
//! tool dispatcher consumes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PsError, PsResult};

pub const MAX_READ_BYTES: u64 = 500_000;
pub const MAX_SEARCH_RESULTS: u64 = 5_000;
pub const MAX_CMD_TIMEOUT_MS: u64 = 120_000;
pub const PATCH_MARKER: &str = "REPLACE:\n";

/// Write collision behavior for WRITE_FILE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Overwrite,
    CreateOnly,
}

/// The seven action kinds, tagged by `action` with payload under `args`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "args")]
pub enum Action {
    #[serde(rename = "READ_FILE", rename_all = "camelCase")]
    ReadFile {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_bytes: Option<u64>,
    },
    #[serde(rename = "SEARCH", rename_all = "camelCase")]
    Search {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        globs: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_results: Option<u64>,
    },
    #[serde(rename = "WRITE_FILE", rename_all = "camelCase")]
    WriteFile {
        path: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<WriteMode>,
    },
    #[serde(rename = "PATCH_FILE", rename_all = "camelCase")]
    PatchFile { path: String, patch: String },
    #[serde(rename = "RUN_CMD", rename_all = "camelCase")]
    RunCmd {
        cmd: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    #[serde(rename = "ASK_USER", rename_all = "camelCase")]
    AskUser {
        question: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        choices: Option<Vec<String>>,
    },
    #[serde(rename = "REPORT", rename_all = "camelCase")]
    Report {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        files_changed: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_suggestions: Option<Vec<String>>,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadFile { .. } => "READ_FILE",
            Self::Search { .. } => "SEARCH",
            Self::WriteFile { .. } => "WRITE_FILE",
            Self::PatchFile { .. } => "PATCH_FILE",
            Self::RunCmd { .. } => "RUN_CMD",
            Self::AskUser { .. } => "ASK_USER",
            Self::Report { .. } => "REPORT",
        }
    }

    /// All recognized action tags, in schema order.
    pub fn all_names() -> &'static [&'static str] {
        &[
            "READ_FILE",
            "SEARCH",
            "WRITE_FILE",
            "PATCH_FILE",
            "RUN_CMD",
            "ASK_USER",
            "REPORT",
        ]
    }

    /// Build a validated action from an explicit tag and args object, as
    /// used by the `apply("ACTION", args)` call form.
    pub fn from_parts(name: &str, args: Value) -> PsResult<Self> {
        if !Self::all_names().contains(&name) {
            return Err(PsError::Schema(format!(
                "unknown action '{name}' (expected one of {})",
                Self::all_names().join(", ")
            )));
        }
        let tagged = serde_json::json!({ "action": name, "args": args });
        let action: Self = serde_json::from_value(tagged)
            .map_err(|err| PsError::Schema(format!("{name}: {err}")))?;
        action.validate()?;
        Ok(action)
    }

    /// The `args` payload as a JSON object. Keys come out sorted, which is
    /// the canonical form the loop detector fingerprints.
    pub fn args_json(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove("args").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Per-kind bounds that serde's shape checking cannot express.
    pub fn validate(&self) -> PsResult<()> {
        match self {
            Self::ReadFile { path, max_bytes } => {
                require_nonempty("READ_FILE", "path", path)?;
                if let Some(n) = max_bytes {
                    require_range("READ_FILE", "maxBytes", *n, MAX_READ_BYTES)?;
                }
            }
            Self::Search {
                query: _,
                globs,
                max_results,
            } => {
                if let Some(n) = max_results {
                    require_range("SEARCH", "maxResults", *n, MAX_SEARCH_RESULTS)?;
                }
                if let Some(globs) = globs {
                    for pattern in globs {
                        require_nonempty("SEARCH", "globs[]", pattern)?;
                    }
                }
            }
            Self::WriteFile { path, .. } => {
                require_nonempty("WRITE_FILE", "path", path)?;
            }
            Self::PatchFile { path, patch } => {
                require_nonempty("PATCH_FILE", "path", path)?;
                if !patch.starts_with(PATCH_MARKER) {
                    return Err(PsError::Schema(format!(
                        "PATCH_FILE: patch must begin with the literal marker {PATCH_MARKER:?}"
                    )));
                }
            }
            Self::RunCmd {
                cmd, timeout_ms, ..
            } => {
                require_nonempty("RUN_CMD", "cmd", cmd)?;
                if let Some(n) = timeout_ms {
                    require_range("RUN_CMD", "timeoutMs", *n, MAX_CMD_TIMEOUT_MS)?;
                }
            }
            Self::AskUser { question, choices } => {
                require_nonempty("ASK_USER", "question", question)?;
                if let Some(choices) = choices
                    && choices.is_empty()
                {
                    return Err(PsError::Schema(
                        "ASK_USER: choices must contain at least one entry".into(),
                    ));
                }
            }
            Self::Report { .. } => {}
        }
        Ok(())
    }
}

/// The envelope around a single action: `done` plus optional confidence
/// and reasoning, serialized as
/// `{"action", "args", "done", "confidence"?, "reason"?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Plan {
    pub fn new(action: Action, done: bool) -> Self {
        Self {
            action,
            done,
            confidence: None,
            reason: None,
        }
    }

    /// Parse and validate a plan from its canonical JSON representation.
    pub fn from_json(value: Value) -> PsResult<Self> {
        let plan: Self = serde_json::from_value(value)
            .map_err(|err| PsError::Schema(format!("plan does not match schema: {err}")))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> PsResult<()> {
        self.action.validate()?;
        if let Some(confidence) = self.confidence
            && !(0.0..=1.0).contains(&confidence)
        {
            return Err(PsError::Schema(format!(
                "confidence must be within [0, 1], got {confidence}"
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn require_nonempty(action: &str, field: &str, value: &str) -> PsResult<()> {
    if value.is_empty() {
        return Err(PsError::Schema(format!(
            "{action}: `{field}` must be a non-empty string"
        )));
    }
    Ok(())
}

fn require_range(action: &str, field: &str, value: u64, max: u64) -> PsResult<()> {
    if value == 0 || value > max {
        return Err(PsError::Schema(format!(
            "{action}: `{field}` must be within 1..={max}, got {value}"
        )));
    }
    Ok(())
}
