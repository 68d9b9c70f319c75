//! Sub-workflow execution: a child script with its own VM, logger, and
//! (optionally) policy, reporting back through `subworkflow_*` events.

use std::cell::RefCell;
use std::rc::Rc;

use ps_core::contract::ContractIssue;
use ps_core::{BudgetConfig, EventKind, Policy, PsError, PsResult, QualityContract, SubworkflowResult};
use ps_memory::MemoryStore;
use ps_session::{RUNS_DIR, RunLogger};
use serde_json::{Value as Json, json};

use crate::context::MAX_SUBFLOW_DEPTH;
use crate::value::Value;
use crate::vm::Vm;

#[derive(Debug)]
struct SubflowOptions {
    inherit_policy: bool,
    inherit_memory: bool,
    return_contract: bool,
    stage: Option<String>,
    timeout_ms: Option<u64>,
    budget_override: Option<Json>,
    args: Vec<(String, Json)>,
    raw: Json,
}

impl SubflowOptions {
    fn parse(options: Option<&Value>) -> PsResult<Self> {
        let raw = options
            .map(|value| value.to_json())
            .transpose()?
            .unwrap_or_else(|| json!({}));
        let mut args = Vec::new();
        if let Some(map) = raw.get("args").and_then(Json::as_object) {
            for (key, value) in map {
                args.push((key.clone(), value.clone()));
            }
        } else if raw.get("args").is_some_and(|value| !value.is_null()) {
            return Err(PsError::Schema("sub-workflow args must be an object".into()));
        }
        Ok(Self {
            inherit_policy: raw
                .get("inherit_policy")
                .and_then(Json::as_bool)
                .unwrap_or(true),
            inherit_memory: raw
                .get("inherit_memory")
                .and_then(Json::as_bool)
                .unwrap_or(false),
            return_contract: raw
                .get("return_contract")
                .and_then(Json::as_bool)
                .unwrap_or(false),
            stage: raw
                .get("stage")
                .and_then(Json::as_str)
                .map(ToString::to_string),
            timeout_ms: raw.get("timeout_ms").and_then(Json::as_u64),
            budget_override: raw.get("budget_override").cloned(),
            args,
            raw,
        })
    }
}

impl Vm {
    /// Load and run a child script. `run` discards the result; `call`
    /// returns the result record (with the child's return value).
    pub(crate) async fn exec_subflow(
        &mut self,
        path: &str,
        options: Option<&Value>,
    ) -> PsResult<Value> {
        if self.ctx.depth >= MAX_SUBFLOW_DEPTH {
            return Err(PsError::Runtime(format!(
                "sub-workflow nesting exceeds {MAX_SUBFLOW_DEPTH}"
            )));
        }
        let options = SubflowOptions::parse(options)?;

        let script_path = ps_tools::safe_resolve(&self.ctx.project_root, path)?;
        let source = std::fs::read_to_string(&script_path)
            .map_err(|_| PsError::Tool(format!("Script not found: {path}")))?;
        let program = ps_lang::parse_source(&source)?;

        let child_policy = if options.inherit_policy {
            self.ctx.policy().clone()
        } else {
            Policy::restricted()
        };
        let child_budget = child_budget_config(
            self.ctx.logger.budget().config(),
            options.budget_override.as_ref(),
            options.timeout_ms,
        )?;
        let child_memory = if options.inherit_memory {
            self.ctx.memory.clone()
        } else {
            Rc::new(RefCell::new(MemoryStore::new(&self.ctx.project_root)))
        };

        let child_logger = RunLogger::new_sub(&self.ctx.project_root, child_budget)
            .map_err(|err| PsError::Tool(format!("Failed to start sub-run: {err:#}")))?;
        let child_run_id = child_logger.run_id().to_string();

        self.ctx.logger.emit(EventKind::SubworkflowStart {
            child_run_id: child_run_id.clone(),
            path: path.to_string(),
            options: options.raw.clone(),
        });

        let child_ctx = self.ctx.child(child_logger, child_policy, child_memory);
        let mut child_vm = Vm::new(child_ctx);
        for (name, value) in &options.args {
            child_vm.bind_global(name.clone(), Value::from_json(value));
        }

        let outcome = child_vm.run_program(&program).await;

        let budget = child_vm.ctx.logger.budget().snapshot();
        let steps = child_vm.ctx.logger.budget().steps();
        let llm_calls = child_vm.ctx.logger.budget().llm_calls();
        let elapsed_ms = child_vm.ctx.logger.budget().elapsed_ms();

        let (ok, error, return_value) = match &outcome {
            Ok(value) => {
                // Values that cannot cross the JSON boundary (functions,
                // clients) surface as null rather than failing the run.
                let encoded = value
                    .as_ref()
                    .and_then(|value| value.to_json().ok())
                    .unwrap_or(Json::Null);
                (true, None, encoded)
            }
            Err(err) => (false, Some(err.to_string()), Json::Null),
        };
        if let Some(message) = &error {
            child_vm.ctx.logger.emit_error(message.clone());
        }
        child_vm
            .ctx
            .logger
            .finalize(ok, error.clone())
            .map_err(|err| PsError::Tool(format!("Failed to finalize sub-run: {err}")))?;

        let contract = options.return_contract.then(|| {
            if ok {
                QualityContract::from_value(&return_value)
                    .unwrap_or_else(|| QualityContract::default_success(elapsed_ms, steps, llm_calls))
            } else {
                QualityContract {
                    ok: false,
                    issues: vec![ContractIssue {
                        severity: "error".into(),
                        message: error.clone().unwrap_or_default(),
                        file: None,
                    }],
                    ..QualityContract::default()
                }
            }
        });

        let result = SubworkflowResult {
            ok,
            child_run_id: child_run_id.clone(),
            logs_path: format!("{RUNS_DIR}/{child_run_id}"),
            stage: options.stage.clone(),
            budget,
            contract,
        };
        self.ctx.logger.emit(EventKind::SubworkflowEnd {
            child_run_id: child_run_id.clone(),
            result: result.clone(),
        });

        let mut record = serde_json::to_value(&result)
            .map_err(|err| PsError::Runtime(format!("failed to encode sub-run result: {err}")))?;
        if let Some(map) = record.as_object_mut() {
            map.insert("value".into(), return_value);
        }
        Ok(Value::from_json(&record))
    }
}

/// Parent config, overlaid with `budget_override`, never exceeding the
/// parent's own limits, with `timeout_ms` capping wall time.
fn child_budget_config(
    parent: &BudgetConfig,
    budget_override: Option<&Json>,
    timeout_ms: Option<u64>,
) -> PsResult<BudgetConfig> {
    let mut merged = *parent;
    if let Some(overlay) = budget_override {
        let mut encoded = serde_json::to_value(merged)
            .map_err(|err| PsError::Runtime(format!("failed to encode budget: {err}")))?;
        let (Some(target), Some(source)) = (encoded.as_object_mut(), overlay.as_object()) else {
            return Err(PsError::Schema("budget_override must be an object".into()));
        };
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
        merged = serde_json::from_value(encoded)
            .map_err(|err| PsError::Schema(format!("invalid budget_override: {err}")))?;
        merged = merged.capped_by(parent);
    }
    if let Some(timeout_ms) = timeout_ms {
        merged.max_time_ms = merged.max_time_ms.min(timeout_ms);
    }
    Ok(merged)
}
