//! Long-term memory: a knowledge base built from file globs, with a
//! keyword index and substring recall.

use std::collections::BTreeMap;
use std::path::Path;

use ps_core::PsResult;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Summaries are capped to this many characters.
const SUMMARY_CHARS: usize = 240;
/// Index keywords must be at least this long.
const MIN_KEYWORD_LEN: usize = 4;
const BUILD_FILE_CAP: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LongTermMemory {
    pub facts: BTreeMap<String, Value>,
    pub file_summaries: BTreeMap<String, String>,
    pub capabilities: Vec<String>,
    pub glossary: BTreeMap<String, String>,
    pub index: BTreeMap<String, Vec<String>>,
}

impl LongTermMemory {
    /// Build (or refresh) the file-derived portions from a glob walk of
    /// the project root. Facts, capabilities, and glossary entries are
    /// caller-owned and survive a refresh.
    pub async fn rebuild_from_globs(&mut self, root: &Path, globs: &[String]) -> PsResult<()> {
        let listing = ps_tools::search::search(root, "", globs, Some(BUILD_FILE_CAP)).await?;

        self.file_summaries.clear();
        self.index.clear();

        for entry in listing.as_array().into_iter().flatten() {
            let Some(relative) = entry.get("path").and_then(Value::as_str) else {
                continue;
            };
            let Ok(bytes) = std::fs::read(root.join(relative)) else {
                continue;
            };
            let summary = summarize_head(&String::from_utf8_lossy(&bytes));
            self.index_file(relative, &summary);
            self.file_summaries.insert(relative.to_string(), summary);
        }
        Ok(())
    }

    fn index_file(&mut self, relative: &str, summary: &str) {
        let mut keywords: Vec<String> = Vec::new();
        if let Some(stem) = Path::new(relative).file_stem() {
            keywords.push(stem.to_string_lossy().to_lowercase());
        }
        for word in summary.split(|ch: char| !ch.is_alphanumeric()) {
            if word.len() >= MIN_KEYWORD_LEN {
                keywords.push(word.to_lowercase());
            }
        }
        keywords.sort();
        keywords.dedup();
        for keyword in keywords {
            let paths = self.index.entry(keyword).or_default();
            if !paths.iter().any(|path| path == relative) {
                paths.push(relative.to_string());
            }
        }
    }

    /// Case-insensitive substring recall over file summaries and the
    /// glossary, file summaries ranking at least as high as glossary
    /// entries. Facts and capabilities are intentionally not searched.
    pub fn recall(&self, query: &str, top_k: usize) -> Vec<Value> {
        let needle = query.to_lowercase();
        let mut chunks: Vec<(f64, Value)> = Vec::new();

        for (path, summary) in &self.file_summaries {
            let in_path = path.to_lowercase().contains(&needle);
            let in_summary = summary.to_lowercase().contains(&needle);
            if in_path || in_summary {
                let relevance = if in_path { 1.0 } else { 0.8 };
                chunks.push((
                    relevance,
                    json!({"source": path, "content": summary, "relevance": relevance}),
                ));
            }
        }
        for (term, definition) in &self.glossary {
            if term.to_lowercase().contains(&needle)
                || definition.to_lowercase().contains(&needle)
            {
                chunks.push((
                    0.5,
                    json!({
                        "source": format!("glossary:{term}"),
                        "content": definition,
                        "relevance": 0.5,
                    }),
                ));
            }
        }

        chunks.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        chunks
            .into_iter()
            .take(top_k)
            .map(|(_, chunk)| chunk)
            .collect()
    }
}

/// First non-blank lines of a file, capped at [`SUMMARY_CHARS`].
fn summarize_head(content: &str) -> String {
    let mut out = String::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(trimmed);
        if out.chars().count() >= SUMMARY_CHARS {
            break;
        }
    }
    out.chars().take(SUMMARY_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rebuild_walks_globs_and_indexes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/parser.rs"),
            "// Recursive descent parser\nfn parse() {}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "scratch\n").unwrap();

        let mut ltm = LongTermMemory::default();
        ltm.rebuild_from_globs(dir.path(), &["src/**/*.rs".to_string()])
            .await
            .unwrap();

        assert_eq!(ltm.file_summaries.len(), 1);
        assert!(ltm.file_summaries["src/parser.rs"].contains("Recursive descent"));
        assert!(ltm.index.contains_key("parser"));
        assert!(ltm.index["recursive"].contains(&"src/parser.rs".to_string()));
    }

    #[tokio::test]
    async fn test_refresh_preserves_facts_and_glossary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();

        let mut ltm = LongTermMemory::default();
        ltm.facts.insert("archive-1".into(), json!("old digest"));
        ltm.glossary.insert("VM".into(), "the tree walker".into());
        ltm.rebuild_from_globs(dir.path(), &["*.rs".to_string()])
            .await
            .unwrap();

        assert_eq!(ltm.facts["archive-1"], json!("old digest"));
        assert_eq!(ltm.glossary["VM"], "the tree walker");
    }

    #[test]
    fn test_recall_prefers_file_summaries_over_glossary() {
        let mut ltm = LongTermMemory::default();
        ltm.file_summaries
            .insert("src/tokens.rs".into(), "tokenizer for the DSL".into());
        ltm.glossary
            .insert("tokenizer".into(), "splits source into tokens".into());

        let chunks = ltm.recall("tokenizer", 10);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0]["source"], "src/tokens.rs");
        assert_eq!(chunks[1]["source"], "glossary:tokenizer");
        assert!(chunks[0]["relevance"].as_f64() >= chunks[1]["relevance"].as_f64());
    }

    #[test]
    fn test_recall_is_case_insensitive_and_capped() {
        let mut ltm = LongTermMemory::default();
        for index in 0..5 {
            ltm.file_summaries
                .insert(format!("f{index}.rs"), "Budget tracking logic".into());
        }
        let chunks = ltm.recall("BUDGET", 3);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_recall_ignores_facts() {
        let mut ltm = LongTermMemory::default();
        ltm.facts.insert("secret".into(), json!("hidden value"));
        assert!(ltm.recall("hidden", 5).is_empty());
    }

    #[test]
    fn test_summarize_head_caps_length() {
        let summary = summarize_head(&format!("{}\n", "word ".repeat(200)));
        assert!(summary.chars().count() <= 240);
    }
}
