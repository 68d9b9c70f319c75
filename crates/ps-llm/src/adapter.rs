//! The adapter proper: request composition, the retry/rate-limit policy,
//! and Plan validation over recovered JSON.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ps_core::{Plan, PsError, PsResult, TokenUsage};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::encode::{ContextFormat, encode_context};
use crate::recover::{clean_json, extract_json, recover_truncated_write};
use crate::transport::{HttpTransport, LlmTransport};

const MAX_RATE_LIMIT_WAITS: u32 = 10;
pub const MEMORY_BLOCK_OPEN: &str = "--- Memory Context ---";
pub const MEMORY_BLOCK_CLOSE: &str = "--- End Memory ---";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// One structured request. `mock_plan` short-circuits the transport.
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
    pub context: Option<Value>,
    pub history: Vec<ChatMessage>,
    /// Pre-rendered memory digest injected into the system prompt between
    /// explicit delimiters.
    pub memory_context: Option<String>,
}

impl LlmRequest {
    pub fn user_prompt(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Self::default()
        }
    }
}

/// Canned plans for offline runs. A single object repeats on every call;
/// an array is consumed in order with the last entry repeating.
#[derive(Debug)]
pub struct MockPlans {
    plans: Vec<Value>,
    cursor: AtomicUsize,
}

impl MockPlans {
    pub fn new(value: Value) -> Self {
        let plans = match value {
            Value::Array(items) if !items.is_empty() => items,
            other => vec![other],
        };
        Self {
            plans,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn next_plan(&self) -> PsResult<Plan> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let value = self
            .plans
            .get(index)
            .or_else(|| self.plans.last())
            .cloned()
            .ok_or_else(|| PsError::Schema("mock_plan list is empty".into()))?;
        Plan::from_json(value)
    }
}

/// Everything a finished call carries back.
#[derive(Debug, Clone)]
pub struct LlmOutcome {
    pub plan: Plan,
    pub raw: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    pub retries: u32,
}

pub struct LlmAdapter {
    config: LlmConfig,
    transport: Arc<dyn LlmTransport>,
    mock: Option<MockPlans>,
}

impl std::fmt::Debug for LlmAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmAdapter")
            .field("model", &self.config.model)
            .field("mock", &self.mock.is_some())
            .finish()
    }
}

impl LlmAdapter {
    pub fn new(config: LlmConfig) -> PsResult<Self> {
        let transport = Arc::new(HttpTransport::new(config.timeout_ms)?);
        Ok(Self {
            config,
            transport,
            mock: None,
        })
    }

    pub fn with_transport(config: LlmConfig, transport: Arc<dyn LlmTransport>) -> Self {
        Self {
            config,
            transport,
            mock: None,
        }
    }

    pub fn mocked(config: LlmConfig, mock_plan: Value) -> Self {
        Self {
            config,
            transport: Arc::new(NullTransport),
            mock: Some(MockPlans::new(mock_plan)),
        }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    pub fn is_mock(&self) -> bool {
        self.mock.is_some()
    }

    /// Issue one request and return a validated Plan.
    pub async fn complete(
        &self,
        request: &LlmRequest,
        format: ContextFormat,
    ) -> PsResult<LlmOutcome> {
        if let Some(mock) = &self.mock {
            let plan = mock.next_plan()?;
            let raw = plan.to_json().to_string();
            return Ok(LlmOutcome {
                plan,
                raw,
                usage: TokenUsage::default(),
                latency_ms: 0,
                retries: 0,
            });
        }

        let mut messages = self.compose_messages(request, format);
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let started = Instant::now();
        let mut retries = 0u32;
        let mut rate_limit_waits = 0u32;

        loop {
            let body = json!({
                "model": self.config.model,
                "messages": messages,
                "temperature": self.config.temperature,
                "max_tokens": self.config.max_tokens,
                "response_format": {"type": "json_object"},
            });

            let reply = match self.transport.send(&url, &self.config.api_key, &body).await {
                Ok(reply) => reply,
                Err(err @ PsError::Timeout(_)) => return Err(err),
                Err(err) => {
                    if retries >= self.config.max_retries {
                        return Err(err);
                    }
                    retries += 1;
                    warn!(retry = retries, error = %err, "LLM transport failure, retrying");
                    self.backoff(retries).await;
                    continue;
                }
            };

            if reply.status == 429 {
                if rate_limit_waits >= MAX_RATE_LIMIT_WAITS {
                    return Err(PsError::Llm(format!(
                        "rate limited {MAX_RATE_LIMIT_WAITS} times in a row, giving up"
                    )));
                }
                rate_limit_waits += 1;
                let wait = reply
                    .retry_after
                    .or_else(|| parse_retry_snippet(&reply.body))
                    .unwrap_or(Duration::from_millis(self.config.retry_delay_ms));
                debug!(wait_ms = wait.as_millis() as u64, "rate limited, waiting");
                tokio::time::sleep(wait).await;
                continue;
            }

            if !(200..300).contains(&reply.status) {
                return Err(PsError::Llm(format!(
                    "HTTP {}: {}",
                    reply.status, reply.body
                )));
            }

            let (content, usage) = parse_completion(&reply.body)?;
            match content_to_plan(&content) {
                Ok(plan) => {
                    return Ok(LlmOutcome {
                        plan,
                        raw: content,
                        usage,
                        latency_ms: started.elapsed().as_millis() as u64,
                        retries,
                    });
                }
                Err(err) => {
                    if retries >= self.config.max_retries {
                        return Err(err);
                    }
                    retries += 1;
                    warn!(retry = retries, error = %err, "invalid plan, requesting correction");
                    messages.push(ChatMessage::assistant(content));
                    messages.push(ChatMessage::user(format!(
                        "Your reply was not a valid plan ({err}). Reply with exactly one JSON \
                         object of the form {{\"action\", \"args\", \"done\"}} and nothing else."
                    )));
                    self.backoff(retries).await;
                }
            }
        }
    }

    fn compose_messages(&self, request: &LlmRequest, format: ContextFormat) -> Vec<ChatMessage> {
        let mut messages = Vec::new();

        let mut system = request.system.clone().unwrap_or_default();
        if let Some(memory) = &request.memory_context {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(MEMORY_BLOCK_OPEN);
            system.push('\n');
            system.push_str(memory);
            system.push('\n');
            system.push_str(MEMORY_BLOCK_CLOSE);
        }
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }

        if let Some(context) = &request.context {
            messages.push(ChatMessage::system(format!(
                "Current context:\n{}",
                encode_context(context, format)
            )));
        }

        messages.extend(request.history.iter().cloned());
        messages.push(ChatMessage::user(request.user.clone()));
        messages
    }

    async fn backoff(&self, attempt: u32) {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.config.retry_delay_ms.saturating_mul(1 << exponent);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

/// Transport stub behind mock adapters; mocked calls never reach it.
struct NullTransport;

#[async_trait::async_trait]
impl LlmTransport for NullTransport {
    async fn send(
        &self,
        _url: &str,
        _api_key: &str,
        _body: &Value,
    ) -> PsResult<crate::transport::TransportReply> {
        Err(PsError::Llm("mock adapter has no transport".into()))
    }
}

fn parse_completion(body: &str) -> PsResult<(String, TokenUsage)> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| PsError::Llm(format!("completion response is not JSON: {err}")))?;
    let content = value
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            PsError::Llm("missing choices[0].message.content in completion response".into())
        })?;
    let usage = value
        .get("usage")
        .and_then(|usage| serde_json::from_value(usage.clone()).ok())
        .unwrap_or_default();
    Ok((content, usage))
}

/// Extraction pipeline: strict parse, cleaned parse, then truncated
/// WRITE_FILE salvage.
fn content_to_plan(raw: &str) -> PsResult<Plan> {
    let Some(extracted) = extract_json(raw) else {
        if let Some(plan) = recover_truncated_write(raw) {
            plan.validate()?;
            return Ok(plan);
        }
        return Err(PsError::Schema("reply contains no JSON object".into()));
    };

    if let Ok(value) = serde_json::from_str::<Value>(&extracted) {
        return Plan::from_json(value);
    }
    if let Ok(value) = serde_json::from_str::<Value>(&clean_json(&extracted)) {
        return Plan::from_json(value);
    }
    if let Some(plan) = recover_truncated_write(raw) {
        plan.validate()?;
        return Ok(plan);
    }
    Err(PsError::Schema(
        "reply JSON could not be parsed after cleanup".into(),
    ))
}

fn parse_retry_snippet(body: &str) -> Option<Duration> {
    let re = regex::Regex::new(r"try again in (\d+(?:\.\d+)?)s").ok()?;
    let captures = re.captures(body)?;
    let seconds: f64 = captures.get(1)?.as_str().parse().ok()?;
    Some(Duration::from_millis((seconds * 1000.0) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::scripted::ScriptedTransport;
    use ps_core::Action;

    fn fast_config() -> LlmConfig {
        LlmConfig {
            retry_delay_ms: 1,
            ..LlmConfig::default()
        }
    }

    fn adapter_with(replies: Vec<PsResult<crate::transport::TransportReply>>) -> (LlmAdapter, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(replies));
        let adapter = LlmAdapter::with_transport(fast_config(), transport.clone());
        (adapter, transport)
    }

    #[tokio::test]
    async fn test_mock_plan_short_circuits() {
        let adapter = LlmAdapter::mocked(
            fast_config(),
            serde_json::json!({
                "action": "REPORT", "args": {"message": "hi"}, "done": true
            }),
        );
        let outcome = adapter
            .complete(&LlmRequest::user_prompt("."), ContextFormat::Json)
            .await
            .unwrap();
        assert!(outcome.plan.done);
        assert_eq!(outcome.usage, TokenUsage::default());
        assert_eq!(outcome.latency_ms, 0);
    }

    #[tokio::test]
    async fn test_mock_plan_sequence_consumed_in_order_last_repeats() {
        let adapter = LlmAdapter::mocked(
            fast_config(),
            serde_json::json!([
                {"action": "READ_FILE", "args": {"path": "a"}, "done": false},
                {"action": "REPORT", "args": {"message": "done"}, "done": true}
            ]),
        );
        let request = LlmRequest::user_prompt(".");
        let first = adapter.complete(&request, ContextFormat::Json).await.unwrap();
        let second = adapter.complete(&request, ContextFormat::Json).await.unwrap();
        let third = adapter.complete(&request, ContextFormat::Json).await.unwrap();
        assert_eq!(first.plan.action.name(), "READ_FILE");
        assert_eq!(second.plan.action.name(), "REPORT");
        assert_eq!(third.plan.action.name(), "REPORT");
    }

    #[tokio::test]
    async fn test_fenced_reply_parsed() {
        let (adapter, _) = adapter_with(vec![ScriptedTransport::ok(
            "```json\n{\"action\": \"REPORT\", \"args\": {\"message\": \"ok\"}, \"done\": true}\n```",
        )]);
        let outcome = adapter
            .complete(&LlmRequest::user_prompt("."), ContextFormat::Json)
            .await
            .unwrap();
        assert_eq!(outcome.plan.action.name(), "REPORT");
        assert_eq!(outcome.retries, 0);
        assert_eq!(outcome.usage.total_tokens, 30);
    }

    #[tokio::test]
    async fn test_schema_failure_appends_correction_and_retries() {
        let (adapter, transport) = adapter_with(vec![
            ScriptedTransport::ok("{\"action\": \"READ_FILE\", \"args\": {}, \"done\": false}"),
            ScriptedTransport::ok(
                "{\"action\": \"READ_FILE\", \"args\": {\"path\": \"a.txt\"}, \"done\": false}",
            ),
        ]);
        let outcome = adapter
            .complete(&LlmRequest::user_prompt("read it"), ContextFormat::Json)
            .await
            .unwrap();
        assert_eq!(outcome.retries, 1);

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let first_len = requests[0]["messages"].as_array().unwrap().len();
        let second = requests[1]["messages"].as_array().unwrap();
        // Correction adds the bad assistant reply plus a terse request.
        assert_eq!(second.len(), first_len + 2);
        assert_eq!(second[second.len() - 2]["role"], "assistant");
        assert!(
            second[second.len() - 1]["content"]
                .as_str()
                .unwrap()
                .contains("not a valid plan")
        );
    }

    #[tokio::test]
    async fn test_rate_limit_wait_does_not_consume_retry() {
        let (adapter, _) = adapter_with(vec![
            ScriptedTransport::status(429, "slow down, try again in 0s", None),
            ScriptedTransport::ok("{\"action\": \"REPORT\", \"args\": {\"message\": \"x\"}, \"done\": true}"),
        ]);
        let outcome = adapter
            .complete(&LlmRequest::user_prompt("."), ContextFormat::Json)
            .await
            .unwrap();
        assert_eq!(outcome.retries, 0);
    }

    #[tokio::test]
    async fn test_other_http_error_propagates() {
        let (adapter, _) = adapter_with(vec![ScriptedTransport::status(500, "boom", None)]);
        let err = adapter
            .complete(&LlmRequest::user_prompt("."), ContextFormat::Json)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_truncated_write_recovery_through_adapter() {
        let truncated = "{\"action\": \"WRITE_FILE\", \"args\": {\"path\": \"page.html\", \
                         \"content\": \"<html><body>x</body></html>";
        let (adapter, _) = adapter_with(vec![ScriptedTransport::ok(truncated)]);
        let outcome = adapter
            .complete(&LlmRequest::user_prompt("."), ContextFormat::Json)
            .await
            .unwrap();
        match outcome.plan.action {
            Action::WriteFile { path, content, .. } => {
                assert_eq!(path, "page.html");
                assert!(content.ends_with("</html>"));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_memory_context_delimited_in_system_prompt() {
        let (adapter, transport) = adapter_with(vec![ScriptedTransport::ok(
            "{\"action\": \"REPORT\", \"args\": {\"message\": \"x\"}, \"done\": true}",
        )]);
        let request = LlmRequest {
            system: Some("base prompt".into()),
            memory_context: Some("summary: deploys are green".into()),
            ..LlmRequest::user_prompt("continue")
        };
        adapter.complete(&request, ContextFormat::Json).await.unwrap();

        let requests = transport.requests.lock().unwrap();
        let system = requests[0]["messages"][0]["content"].as_str().unwrap();
        assert!(system.starts_with("base prompt"));
        assert!(system.contains(MEMORY_BLOCK_OPEN));
        assert!(system.contains("deploys are green"));
        assert!(system.trim_end().ends_with(MEMORY_BLOCK_CLOSE));
    }

    #[tokio::test]
    async fn test_request_body_shape() {
        let (adapter, transport) = adapter_with(vec![ScriptedTransport::ok(
            "{\"action\": \"REPORT\", \"args\": {\"message\": \"x\"}, \"done\": true}",
        )]);
        let request = LlmRequest {
            context: Some(serde_json::json!({"k": "v"})),
            ..LlmRequest::user_prompt("go")
        };
        adapter.complete(&request, ContextFormat::Json).await.unwrap();

        let requests = transport.requests.lock().unwrap();
        let body = &requests[0];
        assert_eq!(body["response_format"]["type"], "json_object");
        assert!(body["model"].is_string());
        assert!(body["temperature"].is_number());
        assert!(body["max_tokens"].is_number());
        let messages = body["messages"].as_array().unwrap();
        assert!(
            messages[0]["content"]
                .as_str()
                .unwrap()
                .starts_with("Current context:")
        );
        assert_eq!(messages.last().unwrap()["role"], "user");
    }
}
