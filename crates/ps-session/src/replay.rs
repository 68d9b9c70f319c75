//! Human-readable reconstruction of a run from its event stream, with
//! sub-runs stitched in beneath their `subworkflow_*` entries.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use ps_core::{Event, EventKind};

use crate::logger::RUNS_DIR;

/// Render the timeline for `run_id` under `<project>/.ps-runs/`. With
/// `follow_children`, each sub-run's timeline is inlined, indented, at
/// its end event.
pub fn render_timeline(project_root: &Path, run_id: &str, follow_children: bool) -> Result<String> {
    let mut out = String::new();
    render_into(project_root, run_id, follow_children, 0, &mut out)?;
    Ok(out)
}

fn render_into(
    project_root: &Path,
    run_id: &str,
    follow_children: bool,
    depth: usize,
    out: &mut String,
) -> Result<()> {
    let events_path = project_root
        .join(RUNS_DIR)
        .join(run_id)
        .join("events.jsonl");
    let text = std::fs::read_to_string(&events_path)
        .with_context(|| format!("no event stream at {}", events_path.display()))?;

    let pad = "  ".repeat(depth);
    let _ = writeln!(out, "{pad}=== run {run_id} ===");

    for line in text.lines() {
        let Ok(event) = serde_json::from_str::<Event>(line) else {
            let _ = writeln!(out, "{pad}  <unreadable event line>");
            continue;
        };
        let _ = writeln!(out, "{pad}{}", describe(&event));

        if follow_children
            && let EventKind::SubworkflowEnd { child_run_id, .. } = &event.kind
        {
            render_into(project_root, child_run_id, follow_children, depth + 1, out)?;
        }
    }
    Ok(())
}

fn describe(event: &Event) -> String {
    let stamp = event.ts.format("%H:%M:%S");
    let head = format!("[{:>5}] {stamp}", event.step);
    match &event.kind {
        EventKind::Stmt { node } => format!("{head} stmt      {node}"),
        EventKind::Tool { name, output, .. } => {
            format!("{head} tool      {name} -> {}", preview(output))
        }
        EventKind::Llm {
            plan,
            latency_ms,
            retries,
            ..
        } => format!(
            "{head} llm       {} done={} ({latency_ms}ms, {retries} retries)",
            plan.action.name(),
            plan.done
        ),
        EventKind::Error { message } => format!("{head} error     {message}"),
        EventKind::LoopWarning { kind, suggestion } => {
            format!("{head} loop      {kind}: {suggestion}")
        }
        EventKind::BudgetUpdate { budget } => format!(
            "{head} budget    steps={} toolCalls={} llmCalls={} tokens={} cost=${:.4}",
            budget.steps, budget.tool_calls, budget.llm_calls, budget.tokens, budget.cost_usd
        ),
        EventKind::ApprovalRequest { action, summary } => {
            format!("{head} approval? {action}: {summary}")
        }
        EventKind::ApprovalResponse { approved } => {
            format!("{head} approval  {}", if *approved { "granted" } else { "denied" })
        }
        EventKind::SubworkflowStart { child_run_id, path, .. } => {
            format!("{head} sub start {path} ({child_run_id})")
        }
        EventKind::SubworkflowEnd { child_run_id, result } => format!(
            "{head} sub end   {child_run_id} ok={} logs={}",
            result.ok, result.logs_path
        ),
    }
}

fn preview(value: &serde_json::Value) -> String {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let flat = text.replace('\n', " ");
    if flat.chars().count() > 60 {
        let mut cut: String = flat.chars().take(57).collect();
        cut.push_str("...");
        cut
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::RunLogger;
    use ps_core::{BudgetConfig, SubworkflowResult};
    use serde_json::json;

    #[test]
    fn test_timeline_renders_core_events() {
        let tmp = tempfile::tempdir().unwrap();
        let mut logger = RunLogger::new(tmp.path(), BudgetConfig::default()).unwrap();
        logger.budget_mut().add_step();
        logger.emit(EventKind::Stmt {
            node: "assign".into(),
        });
        logger.emit(EventKind::Tool {
            name: "WRITE_FILE".into(),
            input: json!({"path": "out.txt"}),
            output: json!("Wrote 2 bytes to out.txt"),
        });
        logger.emit_error("ToolError: File not found: missing");

        let timeline = render_timeline(tmp.path(), logger.run_id(), false).unwrap();
        assert!(timeline.contains(&format!("=== run {} ===", logger.run_id())));
        assert!(timeline.contains("stmt      assign"));
        assert!(timeline.contains("tool      WRITE_FILE -> Wrote 2 bytes to out.txt"));
        assert!(timeline.contains("error     ToolError: File not found: missing"));
    }

    #[test]
    fn test_child_timeline_inlined() {
        let tmp = tempfile::tempdir().unwrap();

        let mut child = RunLogger::new_sub(tmp.path(), BudgetConfig::default()).unwrap();
        child.budget_mut().add_step();
        child.emit(EventKind::Stmt { node: "expr".into() });
        let child_id = child.run_id().to_string();
        child.finalize(true, None).unwrap();

        let mut parent = RunLogger::new(tmp.path(), BudgetConfig::default()).unwrap();
        parent.emit(EventKind::SubworkflowStart {
            child_run_id: child_id.clone(),
            path: "child.ps".into(),
            options: json!({}),
        });
        parent.emit(EventKind::SubworkflowEnd {
            child_run_id: child_id.clone(),
            result: SubworkflowResult {
                ok: true,
                child_run_id: child_id.clone(),
                logs_path: format!(".ps-runs/{child_id}"),
                stage: None,
                budget: Default::default(),
                contract: None,
            },
        });

        let timeline = render_timeline(tmp.path(), parent.run_id(), true).unwrap();
        let parent_pos = timeline.find("sub end").unwrap();
        let child_pos = timeline.find(&format!("=== run {child_id} ===")).unwrap();
        assert!(child_pos > parent_pos);
        assert!(timeline.contains("  [    1]"));
    }

    #[test]
    fn test_missing_run_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(render_timeline(tmp.path(), "nope", false).is_err());
    }
}
