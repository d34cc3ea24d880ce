//! Scoring oracle abstraction
//!
//! The oracle is an opaque, non-deterministic text completion service. The pipeline only
//! relies on it returning free text that usually contains a JSON object of scores.

/// OpenAI-compatible chat-completions client
pub mod http;

pub use http::HttpOracle;

use crate::error::TransportError;
use async_trait::async_trait;

/// One completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Text in, text out
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    /// Complete `request.prompt` with `request.model`
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TransportError>;
}
