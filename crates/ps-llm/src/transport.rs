//! Transport seam between the adapter and the HTTP layer.

use std::time::Duration;

use async_trait::async_trait;
use ps_core::{PsError, PsResult};
use serde_json::Value;

/// One raw provider reply, with the bits of header state the retry policy
/// needs.
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub status: u16,
    pub body: String,
    pub retry_after: Option<Duration>,
}

#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn send(&self, url: &str, api_key: &str, body: &Value) -> PsResult<TransportReply>;
}

/// Production transport over reqwest.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout_ms: u64) -> PsResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| PsError::Llm(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LlmTransport for HttpTransport {
    async fn send(&self, url: &str, api_key: &str, body: &Value) -> PsResult<TransportReply> {
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    PsError::Timeout("LLM request timed out".into())
                } else {
                    PsError::Llm(format!("network error: {err}"))
                }
            })?;

        let status = response.status().as_u16();
        let retry_after = parse_retry_after_header(response.headers());
        let body = response.text().await.map_err(|err| {
            if err.is_timeout() {
                PsError::Timeout("LLM request timed out".into())
            } else {
                PsError::Llm(format!("failed to read response body: {err}"))
            }
        })?;

        Ok(TransportReply {
            status,
            body,
            retry_after,
        })
    }
}

fn parse_retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim();
    raw.parse::<u64>().map(Duration::from_secs).ok()
}
