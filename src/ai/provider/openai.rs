//! OpenAI-Compatible Chat Completions Client
//!
//! Serves both OpenAI and Groq; they differ only in base URL.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ClientConfig, CompletionRequest, ModelClient, build_http_client, check_status, network_error,
    validate_api_base,
};
use crate::types::{MarksortError, Provider, Result};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";

/// Chat Completions client with secure API key handling
pub struct OpenAiClient {
    provider: Provider,
    api_key: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("provider", &self.provider)
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let api_base = match (&config.api_base, config.provider) {
            (Some(base), provider) => validate_api_base(provider, base)?,
            (None, Provider::Groq) => GROQ_API_BASE.to_string(),
            (None, Provider::OpenAi) => OPENAI_API_BASE.to_string(),
            (None, other) => {
                return Err(MarksortError::Config(format!(
                    "{} is not an OpenAI-compatible provider",
                    other
                )));
            }
        };

        Ok(Self {
            provider: config.provider,
            api_key: SecretString::from(config.require_key()?),
            api_base,
            client: build_http_client(config.timeout_secs)?,
        })
    }

    fn build_request(request: &CompletionRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        ChatCompletionRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: Some(request.max_output_tokens),
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        debug!(provider = %self.provider, model = %request.model, "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&Self::build_request(request))
            .send()
            .await
            .map_err(|e| network_error(self.provider, e))?;

        let response = check_status(self.provider, response).await?;
        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            MarksortError::llm(format!("Failed to parse {} response: {}", self.provider, e))
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| MarksortError::llm(format!("No content in {} response", self.provider)))
    }

    fn provider(&self) -> Provider {
        self.provider
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
