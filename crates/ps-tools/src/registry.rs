//! The tool registry: one validated entry point per action kind.

use std::path::{Path, PathBuf};

use ps_core::{Action, Policy, PsError, PsResult};
use serde_json::Value;

/// Executes validated actions against a project root. The VM owns policy
/// checks, budget accounting, and event emission; the registry owns arg
/// validation and the side effect itself.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    root: PathBuf,
}

impl ToolRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run one action. ASK_USER and REPORT never reach the registry; the
    /// VM answers them itself.
    pub async fn execute(&self, action: &Action, policy: &Policy) -> PsResult<Value> {
        action.validate()?;
        match action {
            Action::ReadFile { path, max_bytes } => {
                crate::fs::read_file(&self.root, path, *max_bytes, policy).await
            }
            Action::WriteFile {
                path,
                content,
                mode,
            } => {
                crate::fs::write_file(&self.root, path, content, mode.unwrap_or_default(), policy)
                    .await
            }
            Action::PatchFile { path, patch } => {
                crate::fs::patch_file(&self.root, path, patch, policy).await
            }
            Action::Search {
                query,
                globs,
                max_results,
            } => {
                let globs = globs.clone().unwrap_or_default();
                crate::search::search(&self.root, query, &globs, *max_results).await
            }
            Action::RunCmd {
                cmd,
                args,
                timeout_ms,
            } => {
                let args = args.clone().unwrap_or_default();
                crate::cmd::run_cmd(&self.root, cmd, &args, *timeout_ms, policy).await
            }
            Action::AskUser { .. } | Action::Report { .. } => Err(PsError::Tool(format!(
                "{} is handled by the runtime, not the tool registry",
                action.name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_execute_validates_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(dir.path());
        let action = Action::ReadFile {
            path: "a.txt".into(),
            max_bytes: Some(9_999_999),
        };
        let err = registry
            .execute(&action, &Policy::default())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("SchemaError:"));
    }

    #[tokio::test]
    async fn test_execute_write_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(dir.path());
        let policy = Policy::default();

        let write = Action::from_parts(
            "WRITE_FILE",
            json!({"path": "src/app.rs", "content": "fn app() {}"}),
        )
        .unwrap();
        registry.execute(&write, &policy).await.unwrap();

        let search = Action::from_parts("SEARCH", json!({"query": "app"})).unwrap();
        let out = registry.execute(&search, &policy).await.unwrap();
        assert_eq!(out.as_array().unwrap().len(), 1);
        assert_eq!(out[0]["path"], "src/app.rs");
    }

    #[tokio::test]
    async fn test_report_not_dispatched_here() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(dir.path());
        let report = Action::Report {
            message: "done".into(),
            files_changed: None,
            next_suggestions: None,
        };
        let err = registry
            .execute(&report, &Policy::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("handled by the runtime"));
    }
}
