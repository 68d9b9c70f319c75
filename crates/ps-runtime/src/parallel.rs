//! `parallel(items, opts)`: read-only actions in fixed-size waves.

use futures::future::join_all;
use ps_core::{Action, EventKind, Plan, PsError, PsResult};
use serde_json::{Value as Json, json};

use crate::value::Value;
use crate::vm::Vm;

const DEFAULT_MAX_CONCURRENCY: usize = 4;
/// Only side-effect-free actions may run in a batch.
const SAFE_ACTIONS: &[&str] = &["READ_FILE", "SEARCH"];

impl Vm {
    pub(crate) async fn run_parallel(
        &mut self,
        items: Vec<Value>,
        options: Option<&Value>,
    ) -> PsResult<Value> {
        let (max, fail_fast) = parse_options(options)?;

        // Validate the whole batch before any wave runs.
        let mut actions = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let json = item.to_json()?;
            let action = action_from_item(&json)
                .map_err(|err| PsError::Schema(format!("parallel item {index}: {err}")))?;
            if !SAFE_ACTIONS.contains(&action.name()) {
                return Err(PsError::Schema(format!(
                    "parallel item {index}: {} is not allowed in a batch (only {})",
                    action.name(),
                    SAFE_ACTIONS.join(", ")
                )));
            }
            if !self.ctx.policy().allows_tool(action.name()) {
                return Err(PsError::Policy(format!(
                    "tool '{}' is not in allowTools",
                    action.name()
                )));
            }
            actions.push(action);
        }

        let policy = self.ctx.policy().clone();
        let registry = self.ctx.registry.clone();

        let mut slots: Vec<Option<Json>> = vec![None; actions.len()];
        let mut aborted = false;

        for (wave_start, wave) in actions.chunks(max).enumerate().map(|(i, w)| (i * max, w)) {
            if aborted {
                break;
            }
            // Budget is charged per dispatched action; items skipped after
            // a fail-fast abort never consume a tool call.
            for _ in wave {
                self.ctx.logger.budget_mut().add_tool_call();
            }
            self.ctx.logger.budget().check()?;

            let futures = wave.iter().map(|action| {
                let registry = registry.clone();
                let policy = policy.clone();
                async move { registry.execute(action, &policy).await }
            });
            let results = join_all(futures).await;

            for (offset, result) in results.into_iter().enumerate() {
                let index = wave_start + offset;
                let slot = match result {
                    Ok(output) => {
                        self.ctx.logger.emit(EventKind::Tool {
                            name: actions[index].name().into(),
                            input: actions[index].args_json(),
                            output: output.clone(),
                        });
                        json!({"ok": true, "value": output})
                    }
                    Err(err) => {
                        let message = err.to_string();
                        self.ctx.logger.emit_error(message.clone());
                        if fail_fast {
                            aborted = true;
                        }
                        json!({"ok": false, "error": message})
                    }
                };
                slots[index] = Some(slot);
            }
        }

        // Results come back in input order; slots skipped after a
        // fail-fast abort are filled explicitly.
        let filled: Vec<Json> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(
                    || json!({"ok": false, "error": "skipped: an earlier item failed"}),
                )
            })
            .collect();
        Ok(Value::from_json(&Json::Array(filled)))
    }
}

fn parse_options(options: Option<&Value>) -> PsResult<(usize, bool)> {
    let mut max = DEFAULT_MAX_CONCURRENCY;
    let mut fail_fast = true;
    if let Some(options) = options {
        match options.get_member("max") {
            Value::Int(n) if n > 0 => max = n as usize,
            Value::Null => {}
            _ => return Err(PsError::Schema("parallel max must be a positive integer".into())),
        }
        if !matches!(options.get_member("fail_fast"), Value::Null) {
            fail_fast = options.get_member("fail_fast").truthy();
        }
    }
    Ok((max, fail_fast))
}

/// Items are `{action, args}` objects (a Plan envelope is accepted too).
fn action_from_item(item: &Json) -> PsResult<Action> {
    if item.get("action").is_some() && item.get("done").is_some() {
        return Ok(Plan::from_json(item.clone())?.action);
    }
    let name = item
        .get("action")
        .and_then(Json::as_str)
        .ok_or_else(|| PsError::Schema("expected an {action, args} object".into()))?;
    let args = item.get("args").cloned().unwrap_or(json!({}));
    Action::from_parts(name, args)
}
