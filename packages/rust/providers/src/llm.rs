//! Language-model capability and its OpenAI-compatible HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use entitylens_shared::{EntityLensError, LlmConfig, Result, RetryConfig};

use crate::retry::{AttemptError, is_transient_status, is_transient_transport, with_retry};

/// Text completion from a system instruction and an optional user turn.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, recorded with each run.
    fn model(&self) -> &str;

    /// Return the raw response text.
    async fn complete(&self, system: &str, user: Option<&str>) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for any server exposing `POST {base_url}/chat/completions`.
pub struct OpenAiCompatClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
    retry: RetryConfig,
}

impl OpenAiCompatClient {
    /// Build a client from config. The API key is read from the configured
    /// environment variable; local servers usually need none.
    pub fn new(config: &LlmConfig, retry: &RetryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EntityLensError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key(),
            temperature: config.temperature,
            retry: retry.clone(),
        })
    }

    async fn attempt(
        &self,
        request: &ChatRequest<'_>,
    ) -> std::result::Result<String, AttemptError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            let err = EntityLensError::Llm(format!("{}: {e}", self.endpoint));
            if is_transient_transport(&e) {
                AttemptError::transient(err)
            } else {
                AttemptError::fatal(err)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = EntityLensError::Llm(format!("model server returned {status}: {body}"));
            return Err(if is_transient_status(status) {
                AttemptError::transient(err)
            } else {
                AttemptError::fatal(err)
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            AttemptError::fatal(EntityLensError::Llm(format!(
                "failed to decode completion response: {e}"
            )))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| {
                AttemptError::fatal(EntityLensError::Llm("response contained no choices".into()))
            })
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatClient {
    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, has_user = user.is_some()))]
    async fn complete(&self, system: &str, user: Option<&str>) -> Result<String> {
        let mut messages = vec![ChatMessage {
            role: "system",
            content: system,
        }];
        if let Some(content) = user {
            messages.push(ChatMessage {
                role: "user",
                content,
            });
        }
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
        };

        let text = with_retry(&self.retry, "chat completion", || self.attempt(&request)).await?;
        debug!(chars = text.chars().count(), "completion received");
        Ok(text)
    }
}
