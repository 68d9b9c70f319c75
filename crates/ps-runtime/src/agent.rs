//! The agent loop: LLM -> Plan -> tool apply -> history update, until a
//! done REPORT (or a budget, loop, or policy veto).

use std::rc::Rc;

use ps_core::{Action, EventKind, PsError, PsResult};
use ps_llm::adapter::{ChatMessage, LlmRequest};
use serde_json::Value as Json;

use crate::builtins::{DEFAULT_SYSTEM_PROMPT, NO_ASK_SUFFIX};
use crate::loopdetect::args_hash;
use crate::value::{LlmClientHandle, Value};
use crate::vm::Vm;

/// Sliding history cap: older entries fall off first.
const HISTORY_CAP: usize = 20;

#[derive(Debug, Clone)]
struct AgentOptions {
    max_iterations: Option<u64>,
    require_write: bool,
    stop_on_report: bool,
    memory_key: Option<String>,
    context_files: Vec<String>,
}

impl AgentOptions {
    fn parse(options: Option<&Value>) -> PsResult<Self> {
        let mut parsed = Self {
            max_iterations: None,
            require_write: false,
            stop_on_report: true,
            memory_key: None,
            context_files: Vec::new(),
        };
        let Some(options) = options else {
            return Ok(parsed);
        };

        if let Value::Int(n) = options.get_member("max_iterations") {
            if n <= 0 {
                return Err(PsError::Schema(
                    "max_iterations must be a positive integer".into(),
                ));
            }
            parsed.max_iterations = Some(n as u64);
        }
        parsed.require_write = options.get_member("require_write").truthy();
        if !matches!(options.get_member("stop_on_report"), Value::Null) {
            parsed.stop_on_report = options.get_member("stop_on_report").truthy();
        }
        if let Value::Str(key) = options.get_member("memory_key") {
            parsed.memory_key = Some(key);
        }
        if let Value::Array(files) = options.get_member("context_files") {
            for file in files.borrow().iter() {
                match file {
                    Value::Str(path) => parsed.context_files.push(path.clone()),
                    other => {
                        return Err(PsError::Schema(format!(
                            "context_files entries must be strings, got {}",
                            other.type_name()
                        )));
                    }
                }
            }
        }
        Ok(parsed)
    }
}

impl Vm {
    pub(crate) async fn run_agent(
        &mut self,
        client: Rc<LlmClientHandle>,
        prompt: String,
        options: Option<&Value>,
    ) -> PsResult<Value> {
        let options = AgentOptions::parse(options)?;

        let mut system = DEFAULT_SYSTEM_PROMPT.to_string();
        if client.no_ask {
            system.push_str(NO_ASK_SUFFIX);
        }

        let context = self.load_context_files(&options.context_files).await?;
        let mut history: Vec<ChatMessage> = Vec::new();
        let mut current_prompt = prompt;
        let mut iteration: u64 = 0;
        let mut has_written = false;
        let mut last_result = Value::Null;

        loop {
            iteration += 1;
            if let Some(cap) = options.max_iterations
                && iteration > cap
            {
                return Ok(last_result);
            }

            let memory_context = options
                .memory_key
                .as_deref()
                .and_then(|key| self.ctx.memory.borrow().memory_context(key));
            let request = LlmRequest {
                system: Some(system.clone()),
                user: current_prompt.clone(),
                context: context.clone(),
                history: history.clone(),
                memory_context,
            };
            let outcome = self.llm_call(&client.adapter, &request).await?;
            let plan = outcome.plan;

            // Loop screening happens before the action runs.
            let hash = args_hash(&plan.action.args_json());
            if let Some(warning) = self.ctx.detector.observe(plan.action.name(), hash) {
                self.ctx.logger.emit(EventKind::LoopWarning {
                    kind: warning.kind.clone(),
                    suggestion: warning.suggestion.clone(),
                });
                if self.ctx.halt_on_loop {
                    return Err(PsError::Loop(format!(
                        "{} ({})",
                        warning.kind, warning.suggestion
                    )));
                }
            }

            let action_error: Option<String>;
            let mut action_output = Json::Null;
            match self.run_tool_action(&plan.action).await {
                Ok(output) => {
                    action_error = None;
                    action_output = output;
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => action_error = Some(err.to_string()),
            }
            self.ctx.detector.mark_last_result(action_error.is_none());

            history.push(ChatMessage::assistant(plan.to_json().to_string()));
            history.push(ChatMessage::user(match &action_error {
                Some(error) => format!("Action ERROR: {error}"),
                None => format!("Action result: {}", preview_output(&action_output)),
            }));
            while history.len() > HISTORY_CAP {
                history.remove(0);
            }

            if action_error.is_none()
                && matches!(
                    plan.action,
                    Action::WriteFile { .. } | Action::PatchFile { .. }
                )
            {
                has_written = true;
            }
            if action_error.is_none() {
                last_result = Value::from_json(&action_output);
            }

            let wants_exit = action_error.is_none()
                && plan.done
                && (!matches!(plan.action, Action::Report { .. }) || options.stop_on_report);

            if wants_exit {
                if options.require_write && !has_written {
                    current_prompt = "You reported done, but no file has been written yet. You \
                                      must WRITE_FILE or PATCH_FILE before reporting done."
                        .to_string();
                    continue;
                }
                return Ok(last_result);
            }

            current_prompt = match &action_error {
                Some(error) => format!(
                    "The last action ({}) failed: {error}. Decide the next step.",
                    plan.action.name()
                ),
                None => format!(
                    "The last action ({}) returned: {}. Continue toward the goal.",
                    plan.action.name(),
                    preview_output(&action_output)
                ),
            };
        }
    }

    /// Pull `context_files` contents through the tool funnel so the reads
    /// are sandboxed, budgeted, and logged like any other READ_FILE.
    async fn load_context_files(&mut self, paths: &[String]) -> PsResult<Option<Json>> {
        if paths.is_empty() {
            return Ok(None);
        }
        let mut map = serde_json::Map::new();
        for path in paths {
            let action = Action::ReadFile {
                path: path.clone(),
                max_bytes: None,
            };
            let content = self.run_tool_action(&action).await?;
            map.insert(path.clone(), content);
        }
        Ok(Some(Json::Object(map)))
    }
}

fn preview_output(output: &Json) -> String {
    let text = match output {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    };
    let flat = text.replace('\n', " ");
    if flat.chars().count() > 400 {
        let mut cut: String = flat.chars().take(397).collect();
        cut.push_str("...");
        cut
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use crate::context::RunOptions;
    use crate::testutil::Harness;
    use crate::value::Value;

    #[tokio::test]
    async fn test_agent_exits_on_done_report() {
        let mut harness = Harness::new();
        harness
            .exec(
                "c = LLMClient({mock_plan: {action: \"REPORT\", args: {message: \"all done\"}, done: true}})\nr = run_agent(c, \"go\")\n",
            )
            .await
            .unwrap();
        assert!(harness.global("r").deep_eq(&Value::Str("all done".into())));
        assert_eq!(harness.events_of("llm").len(), 1);
    }

    #[tokio::test]
    async fn test_agent_require_write_defers_first_report() {
        let mut harness = Harness::new();
        harness
            .exec(
                "c = LLMClient({mock_plan: [\n    {action: \"REPORT\", args: {message: \"done\"}, done: true},\n    {action: \"WRITE_FILE\", args: {path: \"a.txt\", content: \"x\"}, done: false},\n    {action: \"REPORT\", args: {message: \"done\"}, done: true}\n]})\nrun_agent(c, \"write a file\", {require_write: true})\n",
            )
            .await
            .unwrap();
        assert!(harness.root().join("a.txt").exists());
        let writes: Vec<_> = harness
            .events_of("tool")
            .into_iter()
            .filter(|event| event["name"] == "WRITE_FILE")
            .collect();
        assert_eq!(writes.len(), 1);
        assert_eq!(harness.events_of("llm").len(), 3);
    }

    #[tokio::test]
    async fn test_agent_errors_become_continuation_not_failure() {
        let mut harness = Harness::new();
        // First plan reads a missing file (tool error, caught); second
        // reports done.
        harness
            .exec(
                "c = LLMClient({mock_plan: [\n    {action: \"READ_FILE\", args: {path: \"missing.txt\"}, done: false},\n    {action: \"REPORT\", args: {message: \"recovered\"}, done: true}\n]})\nr = run_agent(c, \"try\")\n",
            )
            .await
            .unwrap();
        assert!(harness.global("r").deep_eq(&Value::Str("recovered".into())));
    }

    #[tokio::test]
    async fn test_agent_max_iterations_caps_loop() {
        let mut harness = Harness::new();
        harness
            .exec(
                "c = LLMClient({mock_plan: {action: \"SEARCH\", args: {query: \"x\"}, done: false}})\nrun_agent(c, \"loop forever\", {max_iterations: 3})\n",
            )
            .await
            .unwrap();
        assert_eq!(harness.events_of("llm").len(), 3);
    }

    #[tokio::test]
    async fn test_agent_loop_warning_and_halt() {
        let mut harness = Harness::with_options(RunOptions {
            halt_on_loop: true,
            ..RunOptions::default()
        });
        let err = harness
            .exec(
                "c = LLMClient({mock_plan: {action: \"SEARCH\", args: {query: \"same\"}, done: false}})\nrun_agent(c, \"loop\")\n",
            )
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("LoopDetected: exact_repeat"));
        let warnings = harness.events_of("loop_warning");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0]["kind"], "exact_repeat");
    }

    #[tokio::test]
    async fn test_agent_stop_on_report_false_keeps_going() {
        let mut harness = Harness::new();
        harness
            .exec(
                "c = LLMClient({mock_plan: [\n    {action: \"REPORT\", args: {message: \"progress\"}, done: true},\n    {action: \"WRITE_FILE\", args: {path: \"b.txt\", content: \"y\"}, done: true}\n]})\nrun_agent(c, \"go\", {stop_on_report: false})\n",
            )
            .await
            .unwrap();
        // The first done REPORT is ignored; the WRITE_FILE with done=true
        // terminates.
        assert!(harness.root().join("b.txt").exists());
        assert_eq!(harness.events_of("llm").len(), 2);
    }
}
