//! SEARCH: a deterministic depth-first walk of the project root.

use std::path::Path;

use ps_core::{PsError, PsResult};
use serde_json::{Value, json};

use crate::globs::GlobFilter;
use crate::sandbox::is_sensitive;

/// Files larger than this are never content-scanned.
const MAX_SCAN_BYTES: u64 = 500_000;
/// Matched line text is truncated to this many characters.
const LINE_SNIPPET_CHARS: usize = 300;
const DEFAULT_MAX_RESULTS: u64 = 1_000;

/// Walk the project root and either list matching files (empty query) or
/// return `{path, line, text}` records for every line containing `query`.
/// Entries come back in traversal order, which is sorted by `(path, line)`.
pub async fn search(
    root: &Path,
    query: &str,
    globs: &[String],
    max_results: Option<u64>,
) -> PsResult<Value> {
    let filter = GlobFilter::compile(globs)?;
    let limit = max_results.unwrap_or(DEFAULT_MAX_RESULTS) as usize;

    let mut files = Vec::new();
    walk(root, String::new(), &mut files)?;
    files.sort();

    let mut results: Vec<Value> = Vec::new();
    for relative in files {
        if results.len() >= limit {
            break;
        }
        if !filter.matches(&relative) {
            continue;
        }
        if query.is_empty() {
            results.push(json!({ "path": relative }));
            continue;
        }

        let resolved = root.join(&relative);
        let Ok(metadata) = std::fs::metadata(&resolved) else {
            continue;
        };
        if metadata.len() > MAX_SCAN_BYTES {
            continue;
        }
        let Ok(bytes) = std::fs::read(&resolved) else {
            continue;
        };
        let content = String::from_utf8_lossy(&bytes);
        for (index, line) in content.lines().enumerate() {
            if results.len() >= limit {
                break;
            }
            if line.contains(query) {
                let text: String = line.chars().take(LINE_SNIPPET_CHARS).collect();
                results.push(json!({
                    "path": relative,
                    "line": index + 1,
                    "text": text,
                }));
            }
        }
    }

    Ok(Value::Array(results))
}

/// Depth-first walk collecting forward-slash relative file paths, skipping
/// sensitive prefixes. Directory entries are visited in name order so the
/// output is stable across platforms.
fn walk(root: &Path, prefix: String, out: &mut Vec<String>) -> PsResult<()> {
    let dir = if prefix.is_empty() {
        root.to_path_buf()
    } else {
        root.join(&prefix)
    };
    let entries = std::fs::read_dir(&dir)
        .map_err(|err| PsError::Tool(format!("Failed to list {prefix}: {err}")))?;

    let mut names: Vec<String> = Vec::new();
    for entry in entries.flatten() {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    for name in names {
        let relative = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        if is_sensitive(&relative) {
            continue;
        }
        let path = root.join(&relative);
        if path.is_dir() {
            walk(root, relative, out)?;
        } else {
            out.push(relative);
        }
    }
    Ok(())
}
