//! The append-only run logger. Owns the run directory, the JSONL event
//! stream, and the run's budget tracker; finalization writes
//! `summary.json`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use ps_core::{BudgetConfig, BudgetSnapshot, Event, EventKind, PsResult};
use serde::{Deserialize, Serialize};
use tracing::warn;
use ulid::Ulid;

use crate::budget::BudgetTracker;

pub const RUNS_DIR: &str = ".ps-runs";
const EVENTS_FILE: &str = "events.jsonl";
const META_FILE: &str = "meta.json";
const SUMMARY_FILE: &str = "summary.json";
/// A budget_update snapshot is interleaved every this many events.
const BUDGET_UPDATE_EVERY: u64 = 50;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunMeta {
    run_id: String,
    started_at: DateTime<Utc>,
    pid: u32,
    cwd: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ended_at: DateTime<Utc>,
    pub events: u64,
    pub budget: BudgetSnapshot,
}

#[derive(Debug)]
pub struct RunLogger {
    run_id: String,
    dir: PathBuf,
    events: File,
    events_written: u64,
    budget: BudgetTracker,
}

impl RunLogger {
    /// Start a top-level run under `<project>/.ps-runs/<ulid>/`.
    pub fn new(project_root: &Path, config: BudgetConfig) -> anyhow::Result<Self> {
        Self::with_run_id(project_root, Ulid::new().to_string(), config)
    }

    /// Start a sub-run; identifiers look like `sub-<ts>-<rand>`.
    pub fn new_sub(project_root: &Path, config: BudgetConfig) -> anyhow::Result<Self> {
        let ulid = Ulid::new().to_string();
        let run_id = format!(
            "sub-{}-{}",
            Utc::now().timestamp_millis(),
            &ulid[ulid.len() - 6..].to_lowercase()
        );
        Self::with_run_id(project_root, run_id, config)
    }

    fn with_run_id(
        project_root: &Path,
        run_id: String,
        config: BudgetConfig,
    ) -> anyhow::Result<Self> {
        let dir = project_root.join(RUNS_DIR).join(&run_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create run dir {}", dir.display()))?;

        let meta = RunMeta {
            run_id: run_id.clone(),
            started_at: Utc::now(),
            pid: std::process::id(),
            cwd: project_root.to_string_lossy().into_owned(),
        };
        std::fs::write(
            dir.join(META_FILE),
            serde_json::to_string_pretty(&meta).context("failed to serialize run meta")?,
        )
        .context("failed to write meta.json")?;

        let events = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(EVENTS_FILE))
            .context("failed to open events.jsonl")?;

        Ok(Self {
            run_id,
            dir,
            events,
            events_written: 0,
            budget: BudgetTracker::new(config),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    pub fn budget_mut(&mut self) -> &mut BudgetTracker {
        &mut self.budget
    }

    /// Append one event at the current step. Every 50th append also emits
    /// a `budget_update` snapshot.
    pub fn emit(&mut self, kind: EventKind) {
        let event = Event::now(self.budget.steps(), kind);
        self.append(&event);
        if self.events_written.is_multiple_of(BUDGET_UPDATE_EVERY) {
            let snapshot = self.budget.snapshot();
            let update = Event::now(
                self.budget.steps(),
                EventKind::BudgetUpdate { budget: snapshot },
            );
            self.append(&update);
        }
    }

    pub fn emit_error(&mut self, message: impl Into<String>) {
        self.emit(EventKind::Error {
            message: message.into(),
        });
    }

    fn append(&mut self, event: &Event) {
        match serde_json::to_string(event) {
            Ok(line) => {
                if let Err(err) = writeln!(self.events, "{line}").and_then(|()| self.events.flush())
                {
                    warn!(run_id = %self.run_id, error = %err, "failed to append run event");
                    return;
                }
                self.events_written += 1;
            }
            Err(err) => {
                warn!(run_id = %self.run_id, error = %err, "failed to serialize run event");
            }
        }
    }

    /// Write `summary.json` and return the summary.
    pub fn finalize(&mut self, ok: bool, error: Option<String>) -> PsResult<RunSummary> {
        let summary = RunSummary {
            run_id: self.run_id.clone(),
            ok,
            error,
            ended_at: Utc::now(),
            events: self.events_written,
            budget: self.budget.snapshot(),
        };
        if let Ok(text) = serde_json::to_string_pretty(&summary) {
            if let Err(err) = std::fs::write(self.dir.join(SUMMARY_FILE), text) {
                warn!(run_id = %self.run_id, error = %err, "failed to write summary.json");
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn read_events(dir: &Path) -> Vec<Value> {
        std::fs::read_to_string(dir.join(EVENTS_FILE))
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_run_layout_created() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = RunLogger::new(tmp.path(), BudgetConfig::default()).unwrap();
        assert!(logger.dir().join(META_FILE).exists());
        assert!(logger.dir().join(EVENTS_FILE).exists());
        assert!(logger.dir().starts_with(tmp.path().join(RUNS_DIR)));

        let meta: Value =
            serde_json::from_str(&std::fs::read_to_string(logger.dir().join(META_FILE)).unwrap())
                .unwrap();
        assert_eq!(meta["runId"], logger.run_id());
        assert!(meta["pid"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_sub_run_id_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = RunLogger::new_sub(tmp.path(), BudgetConfig::default()).unwrap();
        assert!(logger.run_id().starts_with("sub-"));
        assert_eq!(logger.run_id().split('-').count(), 3);
    }

    #[test]
    fn test_events_appended_in_order_with_steps() {
        let tmp = tempfile::tempdir().unwrap();
        let mut logger = RunLogger::new(tmp.path(), BudgetConfig::default()).unwrap();

        logger.budget_mut().add_step();
        logger.emit(EventKind::Stmt {
            node: "assign".into(),
        });
        logger.budget_mut().add_step();
        logger.emit(EventKind::Stmt { node: "expr".into() });

        let events = read_events(logger.dir());
        assert_eq!(events[0]["type"], "stmt");
        assert_eq!(events[0]["step"], 1);
        assert_eq!(events[1]["type"], "stmt");
        assert_eq!(events[1]["step"], 2);
    }

    #[test]
    fn test_budget_update_every_fifty_events() {
        let tmp = tempfile::tempdir().unwrap();
        let mut logger = RunLogger::new(tmp.path(), BudgetConfig::default()).unwrap();
        for _ in 0..50 {
            logger.budget_mut().add_step();
            logger.emit(EventKind::Stmt { node: "expr".into() });
        }

        let events = read_events(logger.dir());
        assert_eq!(events.len(), 51);
        assert_eq!(events[50]["type"], "budget_update");
        assert_eq!(events[50]["budget"]["steps"], 50);
    }

    #[test]
    fn test_finalize_writes_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let mut logger = RunLogger::new(tmp.path(), BudgetConfig::default()).unwrap();
        logger.emit_error("Guard failed: x < 2");
        let summary = logger
            .finalize(false, Some("Guard failed: x < 2".into()))
            .unwrap();
        assert!(!summary.ok);

        let on_disk: Value = serde_json::from_str(
            &std::fs::read_to_string(logger.dir().join(SUMMARY_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(on_disk["ok"], false);
        assert_eq!(on_disk["error"], "Guard failed: x < 2");
        assert!(on_disk["budget"]["percent"].is_object());
    }
}
