//! The process-wide memory store for one run: named STM windows, named
//! LTM knowledge bases, and the checkpoint map.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use ps_core::{PsError, PsResult};
use serde_json::{Value, json};
use tracing::debug;

use crate::ltm::LongTermMemory;
use crate::stm::{Checkpoint, ForgetMode, Milestone, ShortTermMemory, apply_forget};
use crate::estimate_tokens;

const MEMORY_DIR: &str = ".ps-memory";
const LTM_FILE: &str = "ltm.json";

#[derive(Debug, Default)]
pub struct MemoryStore {
    root: PathBuf,
    stm: HashMap<String, ShortTermMemory>,
    ltm: HashMap<String, LongTermMemory>,
    checkpoints: HashMap<String, Checkpoint>,
    archive_counter: u64,
}

impl MemoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    // -- short-term ---------------------------------------------------------

    pub fn stm(&self, name: &str) -> Option<&ShortTermMemory> {
        self.stm.get(name)
    }

    pub fn stm_mut(&mut self, name: &str) -> &mut ShortTermMemory {
        self.stm.entry(name.to_string()).or_default()
    }

    pub fn set_summary(&mut self, name: &str, summary: impl Into<String>) {
        self.stm_mut(name).summary = summary.into();
    }

    pub fn record_event(&mut self, name: &str, event_type: &str, detail: &str) {
        self.stm_mut(name).record(event_type, detail);
    }

    /// STM digest for prompt injection, when the key exists and has any
    /// content.
    pub fn memory_context(&self, name: &str) -> Option<String> {
        let digest = self.stm.get(name)?.digest();
        if digest.is_empty() { None } else { Some(digest) }
    }

    pub fn set_milestone(
        &mut self,
        name: &str,
        milestone: &str,
        ok: bool,
        evidence: Option<String>,
        next: Option<String>,
    ) {
        let checkpoint = self.checkpoints.entry(name.to_string()).or_default();
        checkpoint
            .milestones
            .insert(milestone.to_string(), Milestone { ok, evidence });
        if let Some(next) = next {
            checkpoint.next = next;
        }
        checkpoint.timestamp = Some(Utc::now());
    }

    pub fn checkpoint(&self, name: &str) -> Option<&Checkpoint> {
        self.checkpoints.get(name)
    }

    /// Transform the STM under `name`, returning
    /// `{before_tokens, after_tokens}`.
    pub fn forget(
        &mut self,
        name: &str,
        mode: ForgetMode,
        keep_n: Option<usize>,
    ) -> PsResult<Value> {
        let checkpoint = self.checkpoints.get(name).cloned();
        let stm = self
            .stm
            .get_mut(name)
            .ok_or_else(|| PsError::Runtime(format!("no short-term memory named '{name}'")))?;

        let before_tokens = estimate_tokens(stm.serialized_len());
        apply_forget(stm, checkpoint.as_ref(), mode, keep_n)?;
        let after_tokens = estimate_tokens(stm.serialized_len());

        Ok(json!({
            "before_tokens": before_tokens,
            "after_tokens": after_tokens,
        }))
    }

    /// Copy the STM digest into the named LTM as a fact under a unique
    /// archive key; optionally discard the STM afterwards.
    pub fn archive(
        &mut self,
        name: &str,
        to_ltm: Option<&str>,
        clear_stm: bool,
    ) -> PsResult<Value> {
        let digest = self
            .stm
            .get(name)
            .map(ShortTermMemory::digest)
            .ok_or_else(|| PsError::Runtime(format!("no short-term memory named '{name}'")))?;

        self.archive_counter += 1;
        let key = format!(
            "archive-{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S"),
            self.archive_counter
        );

        let target = to_ltm.unwrap_or(name).to_string();
        self.ltm_mut_loaded(&target)
            .facts
            .insert(key.clone(), Value::String(digest));
        self.persist_ltm(&target)?;

        if clear_stm {
            self.stm.remove(name);
        }
        Ok(json!({"archived_as": key, "ltm": target}))
    }

    // -- long-term ----------------------------------------------------------

    /// Create or refresh the LTM named `name` from a glob walk, then
    /// persist it under `.ps-memory/<name>/ltm.json`.
    pub async fn build_memory(
        &mut self,
        name: &str,
        globs: &[String],
        refresh: bool,
    ) -> PsResult<Value> {
        if !refresh {
            self.ltm.insert(name.to_string(), LongTermMemory::default());
        }
        let root = self.root.clone();
        let ltm = self.ltm_mut_loaded(name);
        ltm.rebuild_from_globs(&root, globs).await?;
        let files = ltm.file_summaries.len();
        let keywords = ltm.index.len();
        self.persist_ltm(name)?;
        debug!(name, files, keywords, "built long-term memory");
        Ok(json!({"name": name, "files": files, "keywords": keywords}))
    }

    pub fn recall(&mut self, name: &str, query: &str, top_k: usize) -> Vec<Value> {
        self.ltm_mut_loaded(name).recall(query, top_k)
    }

    pub fn ltm(&self, name: &str) -> Option<&LongTermMemory> {
        self.ltm.get(name)
    }

    /// In-memory entry, loading the persisted file on first touch.
    fn ltm_mut_loaded(&mut self, name: &str) -> &mut LongTermMemory {
        if !self.ltm.contains_key(name) {
            let loaded = load_ltm_file(&self.ltm_path(name)).unwrap_or_default();
            self.ltm.insert(name.to_string(), loaded);
        }
        self.ltm.get_mut(name).expect("entry inserted above")
    }

    fn ltm_path(&self, name: &str) -> PathBuf {
        self.root.join(MEMORY_DIR).join(name).join(LTM_FILE)
    }

    fn persist_ltm(&self, name: &str) -> PsResult<()> {
        let Some(ltm) = self.ltm.get(name) else {
            return Ok(());
        };
        let path = self.ltm_path(name);
        write_ltm_file(&path, ltm)
            .map_err(|err| PsError::Tool(format!("Failed to persist memory '{name}': {err:#}")))
    }
}

fn load_ltm_file(path: &Path) -> Option<LongTermMemory> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

fn write_ltm_file(path: &Path, ltm: &LongTermMemory) -> anyhow::Result<()> {
    let parent = path.parent().context("ltm path has no parent")?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let text = serde_json::to_string_pretty(ltm).context("failed to serialize ltm")?;
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forget_keep_last_shrinks_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new(dir.path());
        for index in 0..10 {
            store.record_event("task", "tool", &format!("did thing number {index}"));
        }

        let report = store
            .forget("task", ForgetMode::KeepLast, Some(3))
            .unwrap();
        assert_eq!(store.stm("task").unwrap().recent_events.len(), 3);
        assert!(report["after_tokens"].as_u64() <= report["before_tokens"].as_u64());
    }

    #[test]
    fn test_forget_unknown_key_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new(dir.path());
        let err = store.forget("ghost", ForgetMode::Reset, None).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_archive_writes_fact_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new(dir.path());
        store.set_summary("task", "migrated the schema");
        store.record_event("task", "tool", "ran migration");

        let report = store.archive("task", None, true).unwrap();
        let key = report["archived_as"].as_str().unwrap();
        assert!(key.starts_with("archive-"));
        assert!(store.stm("task").is_none());

        let persisted = dir.path().join(".ps-memory/task/ltm.json");
        let text = std::fs::read_to_string(persisted).unwrap();
        assert!(text.contains("migrated the schema"));

        // A second archive in the same process gets a distinct key.
        store.set_summary("task", "second round");
        let second = store.archive("task", None, false).unwrap();
        assert_ne!(second["archived_as"], report["archived_as"]);
    }

    #[tokio::test]
    async fn test_build_memory_persists_and_recalls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("runbook.md"), "How to restart the ingest worker\n")
            .unwrap();

        let mut store = MemoryStore::new(dir.path());
        let report = store
            .build_memory("ops", &["*.md".to_string()], false)
            .await
            .unwrap();
        assert_eq!(report["files"], 1);
        assert!(dir.path().join(".ps-memory/ops/ltm.json").exists());

        let chunks = store.recall("ingest", 5);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0]["source"], "runbook.md");
    }

    #[tokio::test]
    async fn test_ltm_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("guide.md"), "Deployment guide\n").unwrap();

        {
            let mut store = MemoryStore::new(dir.path());
            store
                .build_memory("ops", &["*.md".to_string()], false)
                .await
                .unwrap();
        }

        // A fresh store (fresh run) sees the persisted knowledge base.
        let mut fresh = MemoryStore::new(dir.path());
        let chunks = fresh.recall("deployment", 5);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_memory_context_empty_for_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new(dir.path());
        assert!(store.memory_context("nope").is_none());
        store.set_summary("task", "working");
        assert!(store.memory_context("task").unwrap().contains("working"));
    }

    #[test]
    fn test_milestones_feed_forget_recap() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MemoryStore::new(dir.path());
        store.record_event("task", "tool", "one");
        store.set_milestone("task", "parse", true, None, Some("eval".into()));

        store.forget("task", ForgetMode::Reset, None).unwrap();
        let summary = &store.stm("task").unwrap().summary;
        assert!(summary.contains("1/1 milestones ok"));
        assert!(summary.contains("next: eval"));
    }
}
