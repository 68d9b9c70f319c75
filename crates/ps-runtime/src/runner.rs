//! Top-level run driver: parse, execute, log, finalize.

use std::path::Path;

use anyhow::{Context, Result};
use ps_session::{RunLogger, RunSummary};
use serde_json::Value as Json;

use crate::context::{RunContext, RunOptions};
use crate::value::Value;
use crate::vm::Vm;

/// What a finished run looks like to the process boundary: exit 0 when
/// `ok`, otherwise non-zero with `error`.
#[derive(Debug)]
pub struct RunOutcome {
    pub ok: bool,
    pub error: Option<String>,
    pub run_id: String,
    pub summary: RunSummary,
    pub return_value: Json,
}

/// Run a script file relative to the project root.
pub async fn run_script_file(
    project_root: &Path,
    script: &Path,
    options: RunOptions,
) -> Result<RunOutcome> {
    let source = std::fs::read_to_string(script)
        .with_context(|| format!("failed to read script {}", script.display()))?;
    run_source(project_root, &source, options).await
}

/// Run script text against a project root. Every outcome, including a
/// parse failure, produces a finalized run directory.
pub async fn run_source(
    project_root: &Path,
    source: &str,
    options: RunOptions,
) -> Result<RunOutcome> {
    let logger = RunLogger::new(project_root, options.budget).context("failed to start run")?;
    let mut ctx = RunContext::new(project_root.to_path_buf(), logger, &options);

    let program = match ps_lang::parse_source(source) {
        Ok(program) => program,
        Err(err) => {
            let message = err.to_string();
            ctx.logger.emit_error(message.clone());
            let summary = ctx
                .logger
                .finalize(false, Some(message.clone()))
                .context("failed to finalize run")?;
            return Ok(RunOutcome {
                ok: false,
                error: Some(message),
                run_id: summary.run_id.clone(),
                summary,
                return_value: Json::Null,
            });
        }
    };

    let mut vm = Vm::new(ctx);
    for (name, value) in &options.args {
        vm.bind_global(name.clone(), Value::from_json(value));
    }

    let (ok, error, return_value) = match vm.run_program(&program).await {
        Ok(value) => {
            let encoded = value
                .as_ref()
                .and_then(|value| value.to_json().ok())
                .unwrap_or(Json::Null);
            (true, None, encoded)
        }
        Err(err) => (false, Some(err.to_string()), Json::Null),
    };

    if let Some(message) = &error {
        vm.ctx.logger.emit_error(message.clone());
    }
    let summary = vm
        .ctx
        .logger
        .finalize(ok, error.clone())
        .context("failed to finalize run")?;

    Ok(RunOutcome {
        ok,
        error,
        run_id: summary.run_id.clone(),
        summary,
        return_value,
    })
}
