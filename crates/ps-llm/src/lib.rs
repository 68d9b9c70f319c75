//! LLM adapter: turns a structured request into a validated Plan, with
//! JSON recovery, schema-correction retries, and rate-limit handling.
//! Also hosts the context serializer used when injecting structured data
//! into a request.

pub mod adapter;
pub mod config;
pub mod encode;
pub mod recover;
pub mod transport;

pub use adapter::{ChatMessage, LlmAdapter, LlmOutcome, LlmRequest, MockPlans};
pub use config::LlmConfig;
pub use encode::{ContextFormat, compare_formats, encode_context};
pub use transport::{HttpTransport, LlmTransport, TransportReply};
