use crate::config::OracleConfig;
use crate::error::{EvalError, TransportError};
use crate::oracle::{CompletionRequest, ScoringOracle};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Max characters of an error body kept in a transport error
const ERROR_BODY_CHARS: usize = 200;

/// Chat-completions request body
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Oracle speaking the OpenAI-compatible chat-completions protocol
pub struct HttpOracle {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpOracle {
    pub fn new(config: &OracleConfig) -> Result<Self, EvalError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::RequestFailed {
                target: config.completions_url(),
                reason: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            url: config.completions_url(),
            api_key: config
                .api_key
                .as_ref()
                .filter(|k| !k.trim().is_empty())
                .cloned(),
            timeout,
        })
    }

    /// Whether an API key is available
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, api_key: &str, request: &CompletionRequest) -> Result<String, TransportError> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout {
                        target: self.url.clone(),
                        secs: self.timeout.as_secs(),
                    }
                } else {
                    TransportError::RequestFailed {
                        target: self.url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                target: self.url.clone(),
                status: status.as_u16(),
                body: error_text.chars().take(ERROR_BODY_CHARS).collect(),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            TransportError::MalformedPayload {
                target: self.url.clone(),
                reason: format!("Failed to parse response: {}", e),
            }
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TransportError::MalformedPayload {
                target: self.url.clone(),
                reason: "Empty response from API".to_string(),
            })
    }
}

#[async_trait]
impl ScoringOracle for HttpOracle {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TransportError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(TransportError::NotConfigured(
                "missing API key (set COMMIT_EVAL_LLM_API_KEY, OPENAI_API_KEY or OPEN_ROUTER_KEY)"
                    .to_string(),
            ));
        };

        debug!(
            "Calling {} with model {} ({} prompt chars)",
            self.url,
            request.model,
            request.prompt.len()
        );

        // The client timeout covers the request; this also bounds reading the body
        match tokio::time::timeout(self.timeout, self.send(api_key, request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                target: self.url.clone(),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}
