//! Built-in calls resolvable by name. Built-ins win over user-defined
//! functions of the same name; anything else falls back to the
//! environment.

use std::rc::Rc;

use ps_core::{Action, Plan, PsError, PsResult};
use ps_llm::adapter::{LlmAdapter, LlmRequest};
use ps_llm::encode::{ContextFormat, compare_formats};
use ps_memory::ForgetMode;
use serde_json::Value as Json;

use crate::value::{LlmClientHandle, Value};
use crate::vm::Vm;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a workflow step executor. Reply with exactly one \
JSON object {\"action\", \"args\", \"done\", \"confidence\"?, \"reason\"?}. The action must be one \
of READ_FILE, SEARCH, WRITE_FILE, PATCH_FILE, RUN_CMD, ASK_USER, REPORT. Set done=true only when \
the task is complete.";

pub const NO_ASK_SUFFIX: &str = "\nNever use ASK_USER; decide autonomously and state assumptions \
in the reason field.";

const BUILTINS: &[&str] = &[
    "log",
    "len",
    "range",
    "LLMClient",
    "plan",
    "apply",
    "do",
    "run_agent",
    "parallel",
    "decide",
    "judge",
    "summarize",
    "build_memory",
    "recall",
    "forget",
    "archive",
    "checkpoint",
    "set_context_format",
    "compare_formats",
    "run",
    "call",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

impl Vm {
    pub(crate) async fn call_builtin(&mut self, name: &str, args: Vec<Value>) -> PsResult<Value> {
        match name {
            "log" => {
                let text = args
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                println!("[ps] {text}");
                Ok(Value::Null)
            }
            "len" => {
                let length = match args.first() {
                    Some(Value::Str(s)) => s.chars().count() as i64,
                    Some(Value::Array(items)) => items.borrow().len() as i64,
                    _ => 0,
                };
                Ok(Value::Int(length))
            }
            "range" => builtin_range(&args),
            "LLMClient" => {
                let cfg = args
                    .first()
                    .ok_or_else(|| PsError::Runtime("LLMClient requires a config object".into()))?;
                Ok(Value::LlmClient(self.build_client(cfg)?))
            }
            "plan" => {
                let prompt = expect_str(&args, 0, "plan")?;
                let options = args.get(1).cloned();
                let outcome = self.plan_request(&prompt, options.as_ref()).await?;
                Ok(Value::from_json(&outcome.to_json()))
            }
            "apply" => self.builtin_apply(args).await,
            "do" => {
                let prompt = expect_str(&args, 0, "do")?;
                let options = args.get(1).cloned();
                let plan = self.plan_request(&prompt, options.as_ref()).await?;
                let output = self.run_tool_action(&plan.action).await?;
                Ok(Value::from_json(&output))
            }
            "run_agent" => {
                let client = self.build_client(args.first().ok_or_else(|| {
                    PsError::Runtime("run_agent requires a client or config".into())
                })?)?;
                let prompt = expect_str(&args, 1, "run_agent")?;
                let options = args.get(2).cloned();
                self.run_agent(client, prompt, options.as_ref()).await
            }
            "parallel" => {
                let items = match args.first() {
                    Some(Value::Array(items)) => items.borrow().clone(),
                    _ => {
                        return Err(PsError::Runtime(
                            "parallel requires an array of actions".into(),
                        ));
                    }
                };
                let options = args.get(1).cloned();
                self.run_parallel(items, options.as_ref()).await
            }
            "decide" => self.builtin_decide(args).await,
            "judge" => self.builtin_judge(args).await,
            "summarize" => self.builtin_summarize(args).await,
            "build_memory" => self.builtin_build_memory(args).await,
            "recall" => self.builtin_recall(args),
            "forget" => self.builtin_forget(args),
            "archive" => self.builtin_archive(args),
            "checkpoint" => self.builtin_checkpoint(args),
            "set_context_format" => {
                let name = expect_str(&args, 0, "set_context_format")?;
                self.ctx.context_format = ContextFormat::from_name(&name).ok_or_else(|| {
                    PsError::Schema(format!(
                        "unknown context format '{name}' (expected json or toon)"
                    ))
                })?;
                Ok(Value::Null)
            }
            "compare_formats" => {
                let object = args
                    .first()
                    .ok_or_else(|| PsError::Runtime("compare_formats requires a value".into()))?
                    .to_json()?;
                Ok(Value::from_json(&compare_formats(&object)))
            }
            "run" => {
                let path = expect_str(&args, 0, "run")?;
                let options = args.get(1).cloned();
                self.exec_subflow(&path, options.as_ref()).await?;
                Ok(Value::Null)
            }
            "call" => {
                let path = expect_str(&args, 0, "call")?;
                let options = args.get(1).cloned();
                self.exec_subflow(&path, options.as_ref()).await
            }
            other => Err(PsError::Runtime(format!("unknown builtin '{other}'"))),
        }
    }

    /// Shared LLM planning path for `plan`, `do`, `decide`, `judge`, and
    /// `summarize`. Options may pin a client (`client`) or override model
    /// settings inline; `mock_plan` is honored either way.
    async fn plan_request(&mut self, prompt: &str, options: Option<&Value>) -> PsResult<Plan> {
        let client = match options {
            Some(options) if !matches!(options.get_member("client"), Value::Null) => {
                self.build_client(&options.get_member("client"))?
            }
            Some(options) => self.build_client(options)?,
            None => self.build_client(&Value::object(Vec::new()))?,
        };

        let mut request = LlmRequest {
            system: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            ..LlmRequest::user_prompt(prompt)
        };
        if let Some(options) = options {
            if let Value::Str(system) = options.get_member("system") {
                request.system = Some(system);
            }
            let context = options.get_member("context");
            if !matches!(context, Value::Null) {
                request.context = Some(context.to_json()?);
            }
            if let Value::Str(memory_key) = options.get_member("memory_key") {
                request.memory_context = self.ctx.memory.borrow().memory_context(&memory_key);
            }
        }

        let outcome = self.llm_call(&client.adapter, &request).await?;
        Ok(outcome.plan)
    }

    async fn builtin_apply(&mut self, args: Vec<Value>) -> PsResult<Value> {
        let action = match args.first() {
            // apply("ACTION", args)
            Some(Value::Str(name)) => {
                let payload = args
                    .get(1)
                    .map(|value| value.to_json())
                    .transpose()?
                    .unwrap_or(Json::Object(Default::default()));
                if name == "RECALL" {
                    return self.recall_from_json(&payload);
                }
                Action::from_parts(name, payload)?
            }
            // apply(plan)
            Some(plan_value) => {
                let plan = Plan::from_json(plan_value.to_json()?)?;
                plan.action
            }
            None => return Err(PsError::Runtime("apply requires a plan or action".into())),
        };
        let output = self.run_tool_action(&action).await?;
        Ok(Value::from_json(&output))
    }

    async fn builtin_decide(&mut self, args: Vec<Value>) -> PsResult<Value> {
        let options = args
            .first()
            .cloned()
            .ok_or_else(|| PsError::Runtime("decide requires an options object".into()))?;
        let question = match options.get_member("question") {
            Value::Str(question) => question,
            _ => return Err(PsError::Schema("decide requires a question".into())),
        };
        let mut prompt = question;
        let schema = options.get_member("schema");
        if !matches!(schema, Value::Null) {
            prompt.push_str(&format!(
                "\nRespond with a REPORT or decision action whose args match: {}",
                schema.to_json()?
            ));
        }
        let plan = self.plan_request(&prompt, Some(&options)).await?;
        // The caller gets the Plan's args verbatim as a structured decision.
        Ok(Value::from_json(&plan.action.args_json()))
    }

    async fn builtin_judge(&mut self, args: Vec<Value>) -> PsResult<Value> {
        let question = expect_str(&args, 0, "judge")?;
        let options = args.get(1).cloned();
        let prompt = format!(
            "{question}\nAnswer with a REPORT action whose args.message is exactly \"true\" or \
             \"false\"."
        );
        let plan = self.plan_request(&prompt, options.as_ref()).await?;
        match &plan.action {
            Action::Report { message, .. } => match message.trim().to_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                other => Err(PsError::Schema(format!(
                    "judge expected REPORT message true/false, got {other:?}"
                ))),
            },
            other => Err(PsError::Schema(format!(
                "judge expected a REPORT plan, got {}",
                other.name()
            ))),
        }
    }

    async fn builtin_summarize(&mut self, args: Vec<Value>) -> PsResult<Value> {
        let instruction = expect_str(&args, 0, "summarize")?;
        let options = args
            .get(1)
            .cloned()
            .ok_or_else(|| PsError::Runtime("summarize requires {memory_key}".into()))?;
        let memory_key = match options.get_member("memory_key") {
            Value::Str(key) => key,
            _ => return Err(PsError::Schema("summarize requires memory_key".into())),
        };

        let digest = self
            .ctx
            .memory
            .borrow()
            .memory_context(&memory_key)
            .unwrap_or_default();
        let prompt = format!(
            "{instruction}\nCurrent memory state:\n{digest}\nReply with a REPORT action whose \
             args.message is the new summary."
        );
        let plan = self.plan_request(&prompt, Some(&options)).await?;
        let Action::Report { message, .. } = &plan.action else {
            return Err(PsError::Schema(format!(
                "summarize expected a REPORT plan, got {}",
                plan.action.name()
            )));
        };
        self.ctx
            .memory
            .borrow_mut()
            .set_summary(&memory_key, message.clone());
        Ok(Value::Str(message.clone()))
    }

    async fn builtin_build_memory(&mut self, args: Vec<Value>) -> PsResult<Value> {
        let name = expect_str(&args, 0, "build_memory")?;
        let options = args.get(1).cloned().unwrap_or_else(|| Value::object(vec![]));
        let globs: Vec<String> = match options.get_member("globs").to_json()? {
            Json::Array(items) => items
                .into_iter()
                .filter_map(|item| item.as_str().map(ToString::to_string))
                .collect(),
            Json::Null => Vec::new(),
            _ => return Err(PsError::Schema("build_memory globs must be an array".into())),
        };
        let refresh = matches!(options.get_member("mode"), Value::Str(mode) if mode == "refresh");

        let report = {
            let mut memory = self.ctx.memory.borrow_mut();
            memory.build_memory(&name, &globs, refresh).await?
        };
        Ok(Value::from_json(&report))
    }

    fn builtin_recall(&mut self, args: Vec<Value>) -> PsResult<Value> {
        let name = expect_str(&args, 0, "recall")?;
        let query = expect_str(&args, 1, "recall")?;
        let top_k = args
            .get(2)
            .map(|options| match options.get_member("top_k") {
                Value::Int(n) if n > 0 => Ok(n as usize),
                Value::Null => Ok(5),
                _ => Err(PsError::Schema("top_k must be a positive integer".into())),
            })
            .transpose()?
            .unwrap_or(5);

        let chunks = self.ctx.memory.borrow_mut().recall(&name, &query, top_k);
        Ok(Value::from_json(&Json::Array(chunks)))
    }

    fn recall_from_json(&mut self, payload: &Json) -> PsResult<Value> {
        let name = payload
            .get("name")
            .and_then(Json::as_str)
            .ok_or_else(|| PsError::Schema("RECALL requires `name`".into()))?;
        let query = payload
            .get("query")
            .and_then(Json::as_str)
            .ok_or_else(|| PsError::Schema("RECALL requires `query`".into()))?;
        let top_k = payload
            .get("top_k")
            .or_else(|| payload.get("topK"))
            .and_then(Json::as_u64)
            .unwrap_or(5) as usize;
        let chunks = self.ctx.memory.borrow_mut().recall(name, query, top_k);
        Ok(Value::from_json(&Json::Array(chunks)))
    }

    fn builtin_forget(&mut self, args: Vec<Value>) -> PsResult<Value> {
        let options = args
            .first()
            .ok_or_else(|| PsError::Runtime("forget requires an options object".into()))?;
        let memory_key = match options.get_member("memory_key") {
            Value::Str(key) => key,
            _ => return Err(PsError::Schema("forget requires memory_key".into())),
        };
        let mode = match options.get_member("mode") {
            Value::Str(mode) => ForgetMode::from_name(&mode)?,
            _ => return Err(PsError::Schema("forget requires mode".into())),
        };
        let keep_n = match options.get_member("keep_n") {
            Value::Int(n) if n >= 0 => Some(n as usize),
            Value::Null => None,
            _ => return Err(PsError::Schema("keep_n must be a non-negative integer".into())),
        };
        let report = self
            .ctx
            .memory
            .borrow_mut()
            .forget(&memory_key, mode, keep_n)?;
        Ok(Value::from_json(&report))
    }

    fn builtin_archive(&mut self, args: Vec<Value>) -> PsResult<Value> {
        let options = args
            .first()
            .ok_or_else(|| PsError::Runtime("archive requires an options object".into()))?;
        let memory_key = match options.get_member("memory_key") {
            Value::Str(key) => key,
            _ => return Err(PsError::Schema("archive requires memory_key".into())),
        };
        let to_ltm = match options.get_member("to_ltm") {
            Value::Str(name) => Some(name),
            _ => None,
        };
        let clear_stm = options.get_member("clear_stm").truthy();
        let report =
            self.ctx
                .memory
                .borrow_mut()
                .archive(&memory_key, to_ltm.as_deref(), clear_stm)?;
        Ok(Value::from_json(&report))
    }

    fn builtin_checkpoint(&mut self, args: Vec<Value>) -> PsResult<Value> {
        let options = args
            .first()
            .ok_or_else(|| PsError::Runtime("checkpoint requires an options object".into()))?;
        let memory_key = match options.get_member("memory_key") {
            Value::Str(key) => key,
            _ => return Err(PsError::Schema("checkpoint requires memory_key".into())),
        };
        let milestone = match options.get_member("milestone") {
            Value::Str(name) => name,
            _ => return Err(PsError::Schema("checkpoint requires milestone".into())),
        };
        let ok = options.get_member("ok").truthy();
        let evidence = match options.get_member("evidence") {
            Value::Str(text) => Some(text),
            _ => None,
        };
        let next = match options.get_member("next") {
            Value::Str(text) => Some(text),
            _ => None,
        };
        self.ctx
            .memory
            .borrow_mut()
            .set_milestone(&memory_key, &milestone, ok, evidence, next);
        Ok(Value::Null)
    }

    /// Build (or pass through) an LLM client handle. Accepts an existing
    /// client value or a config object; config objects may carry
    /// `mock_plan`, `no_ask`, `api_key`, `api_key_env`, and any
    /// [`ps_llm::LlmConfig`] override.
    pub(crate) fn build_client(&self, cfg: &Value) -> PsResult<Rc<LlmClientHandle>> {
        if let Value::LlmClient(handle) = cfg {
            return Ok(handle.clone());
        }
        if !matches!(cfg, Value::Object(_)) {
            return Err(PsError::Runtime(format!(
                "expected an LLM client or config object, got {}",
                cfg.type_name()
            )));
        }

        let mock_plan = cfg.get_member("mock_plan");
        let no_ask = cfg.get_member("no_ask").truthy();
        let cfg_json = object_to_json_lossy(cfg);

        let mut config = self.ctx.default_llm.clone().with_overrides(&cfg_json);
        if let Some(api_key) = cfg_json.get("api_key").and_then(Json::as_str) {
            config.api_key = api_key.to_string();
        } else if let Some(env_name) = cfg_json.get("api_key_env").and_then(Json::as_str) {
            config.api_key = std::env::var(env_name).unwrap_or_default();
        }

        let adapter = if matches!(mock_plan, Value::Null) {
            LlmAdapter::new(config)?
        } else {
            LlmAdapter::mocked(config, mock_plan.to_json()?)
        };
        Ok(Rc::new(LlmClientHandle { adapter, no_ask }))
    }
}

fn builtin_range(args: &[Value]) -> PsResult<Value> {
    let ints: Vec<i64> = args
        .iter()
        .map(|value| match value {
            Value::Int(n) => Ok(*n),
            other => Err(PsError::Runtime(format!(
                "range expects integers, got {}",
                other.type_name()
            ))),
        })
        .collect::<PsResult<_>>()?;

    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(PsError::Runtime(
                "range takes 1, 2, or 3 integer arguments".into(),
            ));
        }
    };
    if step == 0 {
        return Err(PsError::Runtime("range step must not be zero".into()));
    }

    let mut out = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        out.push(Value::Int(current));
        current += step;
    }
    Ok(Value::array(out))
}

fn expect_str(args: &[Value], index: usize, builtin: &str) -> PsResult<String> {
    match args.get(index) {
        Some(Value::Str(text)) => Ok(text.clone()),
        Some(other) => Err(PsError::Runtime(format!(
            "{builtin} argument {index} must be a string, got {}",
            other.type_name()
        ))),
        None => Err(PsError::Runtime(format!(
            "{builtin} is missing argument {index}"
        ))),
    }
}

/// JSON rendering of an options object, skipping fields that cannot
/// cross the JSON boundary (e.g. an embedded client value).
fn object_to_json_lossy(value: &Value) -> Json {
    let Value::Object(fields) = value else {
        return Json::Null;
    };
    let mut map = serde_json::Map::new();
    for (key, field) in fields.borrow().iter() {
        if let Ok(encoded) = field.to_json() {
            map.insert(key.clone(), encoded);
        }
    }
    Json::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Harness;

    #[tokio::test]
    async fn test_len_and_range() {
        let mut harness = Harness::new();
        harness
            .exec("a = len(\"abc\")\nb = len([1, 2])\nc = len(5)\nr = range(2, 8, 3)\n")
            .await
            .unwrap();
        assert!(harness.global("a").deep_eq(&Value::Int(3)));
        assert!(harness.global("b").deep_eq(&Value::Int(2)));
        assert!(harness.global("c").deep_eq(&Value::Int(0)));
        assert!(
            harness
                .global("r")
                .deep_eq(&Value::array(vec![Value::Int(2), Value::Int(5)]))
        );
    }

    #[tokio::test]
    async fn test_apply_action_form_writes_file() {
        let mut harness = Harness::new();
        harness
            .exec("r = apply(\"WRITE_FILE\", {path: \"out.txt\", content: \"hi\"})\n")
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(harness.root().join("out.txt")).unwrap(),
            "hi"
        );
        let tools = harness.events_of("tool");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "WRITE_FILE");
    }

    #[tokio::test]
    async fn test_apply_plan_value_from_mock_client() {
        let mut harness = Harness::new();
        harness
            .exec(
                "c = LLMClient({mock_plan: {action: \"WRITE_FILE\", args: {path: \"out.txt\", content: \"hi\"}, done: true}})\napply(c(\".\"))\n",
            )
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(harness.root().join("out.txt")).unwrap(),
            "hi"
        );
    }

    #[tokio::test]
    async fn test_apply_invalid_schema_rejected() {
        let mut harness = Harness::new();
        let err = harness
            .exec("apply(\"READ_FILE\", {maxBytes: 10})\n")
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("SchemaError:"));
    }

    #[tokio::test]
    async fn test_do_is_plan_then_apply() {
        let mut harness = Harness::new();
        harness
            .exec(
                "do(\"write it\", {mock_plan: {action: \"WRITE_FILE\", args: {path: \"a.txt\", content: \"done\"}, done: true}})\n",
            )
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(harness.root().join("a.txt")).unwrap(),
            "done"
        );
        assert_eq!(harness.events_of("llm").len(), 1);
        assert_eq!(harness.events_of("tool").len(), 1);
    }

    #[tokio::test]
    async fn test_decide_returns_args_verbatim() {
        let mut harness = Harness::new();
        harness
            .exec(
                "d = decide({question: \"pick\", mock_plan: {action: \"REPORT\", args: {message: \"option-b\"}, done: true}})\nm = d.message\n",
            )
            .await
            .unwrap();
        assert!(harness.global("m").deep_eq(&Value::Str("option-b".into())));
    }

    #[tokio::test]
    async fn test_judge_parses_boolean_report() {
        let mut harness = Harness::new();
        harness
            .exec(
                "ok = judge(\"is it done\", {mock_plan: {action: \"REPORT\", args: {message: \"true\"}, done: true}})\n",
            )
            .await
            .unwrap();
        assert!(harness.global("ok").deep_eq(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_judge_rejects_non_boolean_message() {
        let mut harness = Harness::new();
        let err = harness
            .exec(
                "judge(\"is it done\", {mock_plan: {action: \"REPORT\", args: {message: \"maybe\"}, done: true}})\n",
            )
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("SchemaError:"));
    }

    #[tokio::test]
    async fn test_summarize_overwrites_memory_summary() {
        let mut harness = Harness::new();
        harness
            .exec(
                "summarize(\"condense\", {memory_key: \"task\", mock_plan: {action: \"REPORT\", args: {message: \"all tests pass\"}, done: true}})\n",
            )
            .await
            .unwrap();
        let summary = harness
            .vm
            .ctx
            .memory
            .borrow()
            .stm("task")
            .unwrap()
            .summary
            .clone();
        assert_eq!(summary, "all tests pass");
    }

    #[tokio::test]
    async fn test_build_memory_and_recall_builtins() {
        let mut harness = Harness::new();
        std::fs::write(
            harness.root().join("notes.md"),
            "Incident playbook for ingest outages\n",
        )
        .unwrap();
        harness
            .exec(
                "r = build_memory(\"ops\", {globs: [\"*.md\"]})\nchunks = recall(\"ops\", \"ingest\", {top_k: 3})\nn = len(chunks)\n",
            )
            .await
            .unwrap();
        assert!(harness.global("n").deep_eq(&Value::Int(1)));
        assert!(harness.root().join(".ps-memory/ops/ltm.json").exists());
    }

    #[tokio::test]
    async fn test_forget_keep_last_via_script() {
        let mut harness = Harness::new();
        for index in 0..10 {
            harness
                .vm
                .ctx
                .memory
                .borrow_mut()
                .record_event("task", "tool", &format!("event {index}"));
        }
        harness
            .exec("r = forget({memory_key: \"task\", mode: \"keep_last\", keep_n: 3})\nbefore = r.before_tokens\nafter = r.after_tokens\n")
            .await
            .unwrap();
        let events = harness
            .vm
            .ctx
            .memory
            .borrow()
            .stm("task")
            .unwrap()
            .recent_events
            .len();
        assert_eq!(events, 3);
        let (Value::Int(before), Value::Int(after)) =
            (harness.global("before"), harness.global("after"))
        else {
            panic!("token counts must be integers");
        };
        assert!(after <= before);
    }

    #[tokio::test]
    async fn test_set_context_format_validates() {
        let mut harness = Harness::new();
        harness.exec("set_context_format(\"toon\")\n").await.unwrap();
        let err = harness
            .exec("set_context_format(\"xml\")\n")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown context format"));
    }

    #[tokio::test]
    async fn test_compare_formats_from_script() {
        let mut harness = Harness::new();
        harness
            .exec("r = compare_formats({rows: [{a: 1, b: 2}, {a: 3, b: 4}]})\nrec = r.recommended\n")
            .await
            .unwrap();
        assert!(harness.global("rec").deep_eq(&Value::Str("toon".into())));
    }

    #[tokio::test]
    async fn test_recall_intercepted_in_apply() {
        let mut harness = Harness::new();
        std::fs::write(harness.root().join("doc.md"), "Retry budget notes\n").unwrap();
        harness
            .exec(
                "build_memory(\"kb\", {globs: [\"*.md\"]})\nr = apply(\"RECALL\", {name: \"kb\", query: \"retry\", top_k: 2})\nn = len(r)\n",
            )
            .await
            .unwrap();
        assert!(harness.global("n").deep_eq(&Value::Int(1)));
    }
}
