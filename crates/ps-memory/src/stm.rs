//! Short-term memory: a named window of recent events plus a rolling
//! summary, with checkpoints that survive forgetting.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ps_core::{PsError, PsResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_WINDOW_STEPS: usize = 10;
const COMPACT_KEEP_EVENTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StmEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortTermMemory {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub recent_events: Vec<StmEvent>,
    pub window_steps: usize,
}

impl Default for ShortTermMemory {
    fn default() -> Self {
        Self {
            summary: String::new(),
            objective: None,
            context: None,
            recent_events: Vec::new(),
            window_steps: DEFAULT_WINDOW_STEPS,
        }
    }
}

impl ShortTermMemory {
    /// Append an event and trim the window to `window_steps`.
    pub fn record(&mut self, event_type: impl Into<String>, detail: impl Into<String>) {
        self.recent_events.push(StmEvent {
            event_type: event_type.into(),
            detail: detail.into(),
            timestamp: Utc::now(),
        });
        let excess = self.recent_events.len().saturating_sub(self.window_steps);
        if excess > 0 {
            self.recent_events.drain(..excess);
        }
    }

    pub fn serialized_len(&self) -> usize {
        serde_json::to_string(self).map_or(0, |text| text.len())
    }

    /// Compact text rendering injected into LLM requests and archived
    /// into long-term memory.
    pub fn digest(&self) -> String {
        let mut out = String::new();
        if let Some(objective) = &self.objective {
            out.push_str(&format!("objective: {objective}\n"));
        }
        if !self.summary.is_empty() {
            out.push_str(&format!("summary: {}\n", self.summary));
        }
        if !self.recent_events.is_empty() {
            out.push_str("recent:\n");
            for event in &self.recent_events {
                out.push_str(&format!("  [{}] {}\n", event.event_type, event.detail));
            }
        }
        out.trim_end().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

/// Compact, verifiable progress state; one per memory key. Survives
/// `forget` so a reset summary can still say where the work stands.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub milestones: BTreeMap<String, Milestone>,
    pub next: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn recap(&self) -> String {
        let done = self.milestones.values().filter(|m| m.ok).count();
        let total = self.milestones.len();
        if self.next.is_empty() {
            format!("checkpoint: {done}/{total} milestones ok")
        } else {
            format!("checkpoint: {done}/{total} milestones ok; next: {}", self.next)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgetMode {
    Compact,
    Reset,
    KeepLast,
}

impl ForgetMode {
    pub fn from_name(name: &str) -> PsResult<Self> {
        match name {
            "compact" => Ok(Self::Compact),
            "reset" => Ok(Self::Reset),
            "keep_last" => Ok(Self::KeepLast),
            other => Err(PsError::Schema(format!(
                "unknown forget mode '{other}' (expected compact, reset or keep_last)"
            ))),
        }
    }
}

/// Apply one forget transformation in place.
pub fn apply_forget(
    stm: &mut ShortTermMemory,
    checkpoint: Option<&Checkpoint>,
    mode: ForgetMode,
    keep_n: Option<usize>,
) -> PsResult<()> {
    match mode {
        ForgetMode::Compact => {
            stm.summary = checkpoint
                .map(Checkpoint::recap)
                .unwrap_or_else(|| "checkpoint: no milestones recorded".into());
            let keep = stm.recent_events.len().saturating_sub(COMPACT_KEEP_EVENTS);
            stm.recent_events.drain(..keep);
        }
        ForgetMode::Reset => {
            stm.summary = checkpoint
                .map(Checkpoint::recap)
                .unwrap_or_else(|| "checkpoint: no milestones recorded".into());
            stm.recent_events.clear();
            stm.context = None;
        }
        ForgetMode::KeepLast => {
            let keep_n = keep_n.ok_or_else(|| {
                PsError::Schema("forget mode keep_last requires keep_n".into())
            })?;
            let excess = stm.recent_events.len().saturating_sub(keep_n);
            if excess > 0 {
                stm.recent_events.drain(..excess);
            }
        }
    }
    Ok(())
}
