//! Anthropic Messages API Client

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ClientConfig, CompletionRequest, ModelClient, build_http_client, check_status, network_error,
    validate_api_base,
};
use crate::types::{MarksortError, Provider, Result};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    api_key: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl AnthropicClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let api_base = match &config.api_base {
            Some(base) => validate_api_base(Provider::Anthropic, base)?,
            None => DEFAULT_API_BASE.to_string(),
        };
        Ok(Self {
            api_key: SecretString::from(config.require_key()?),
            api_base,
            client: build_http_client(config.timeout_secs)?,
        })
    }

    fn build_request(request: &CompletionRequest) -> MessagesRequest {
        MessagesRequest {
            model: request.model.clone(),
            max_tokens: request.max_output_tokens,
            system: request.system.clone(),
            temperature: request.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/v1/messages", self.api_base);
        debug!(model = %request.model, "Sending request to Anthropic API");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&Self::build_request(request))
            .send()
            .await
            .map_err(|e| network_error(Provider::Anthropic, e))?;

        let response = check_status(Provider::Anthropic, response).await?;
        let body: MessagesResponse = response.json().await.map_err(|e| {
            MarksortError::llm(format!("Failed to parse Anthropic response: {}", e))
        })?;

        let text: String = body
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect();

        if text.is_empty() {
            return Err(MarksortError::llm("No content in Anthropic response"));
        }
        Ok(text)
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}
