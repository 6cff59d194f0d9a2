//! Model Client Abstraction
//!
//! Every provider is reached with a single JSON POST that returns raw text.
//! Clients map non-2xx responses to `MarksortError::Provider` so the queue and
//! the fallback cascade can route on the HTTP status.
//!
//! ## Modules
//!
//! - `catalog`: static model lists and capability ordering
//! - `gemini`, `openai`, `anthropic`: HTTP clients (Groq uses the OpenAI client)

mod anthropic;
mod catalog;
mod gemini;
mod openai;

pub use anthropic::AnthropicClient;
pub use catalog::{Capability, ModelCandidate, ModelCatalog, SizeClass};
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::constants::network;
use crate::types::{MarksortError, Provider, Result};

/// Longest provider error body kept in error messages
const MAX_ERROR_BODY_CHARS: usize = 500;

// =============================================================================
// Completion Request
// =============================================================================

/// A single text completion addressed to one model
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            temperature: network::DEFAULT_TEMPERATURE,
            max_output_tokens: network::DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Connection settings for one provider
///
/// API keys are never serialized and are redacted in debug output. Clients
/// wrap the key in `SecretString` internally.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub provider: Provider,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Base URL override (tests, proxies)
    #[serde(default)]
    pub api_base: Option<String>,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(provider: Provider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: Some(api_key.into()),
            api_base: None,
            timeout_secs: network::DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    fn require_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                MarksortError::Config(format!(
                    "{} API key not found. Set {} or add it to the settings store",
                    self.provider,
                    self.provider.env_key()
                ))
            })
    }
}

// =============================================================================
// Model Client Trait
// =============================================================================

/// Text completion against one provider
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send one completion request and return the model's raw text
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Provider this client talks to
    fn provider(&self) -> Provider;
}

/// Shared model client for concurrent access
pub type SharedModelClient = Arc<dyn ModelClient>;

/// Create a shared client from configuration
pub fn create_client(config: &ClientConfig) -> Result<SharedModelClient> {
    match config.provider {
        Provider::Gemini => Ok(Arc::new(GeminiClient::new(config)?)),
        Provider::OpenAi | Provider::Groq => Ok(Arc::new(OpenAiClient::new(config)?)),
        Provider::Anthropic => Ok(Arc::new(AnthropicClient::new(config)?)),
    }
}

// =============================================================================
// Shared HTTP Helpers
// =============================================================================

pub(crate) fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(network::CONNECTION_TIMEOUT_SECS))
        .build()
        .map_err(|e| MarksortError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Validate an endpoint override and strip the trailing slash
pub(crate) fn validate_api_base(provider: Provider, endpoint: &str) -> Result<String> {
    let url = url::Url::parse(endpoint).map_err(|e| {
        MarksortError::Config(format!(
            "Invalid {} endpoint URL '{}': {}",
            provider, endpoint, e
        ))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(MarksortError::Config(format!(
            "{} endpoint must use http or https scheme, got: {}",
            provider,
            url.scheme()
        )));
    }

    if url.scheme() == "http"
        && let Some(host) = url.host_str()
        && !matches!(host, "localhost" | "127.0.0.1" | "::1")
    {
        warn!(
            "{} endpoint uses plain http on a remote host: {}. API keys will be sent unencrypted.",
            provider, host
        );
    }

    let mut result = url.to_string();
    if result.ends_with('/') {
        result.pop();
    }
    Ok(result)
}

pub(crate) fn network_error(provider: Provider, err: reqwest::Error) -> MarksortError {
    let message = if err.is_timeout() {
        format!("request timed out: {}", err)
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    };
    MarksortError::Network { provider, message }
}

/// Turn a non-2xx response into a provider error carrying the status
pub(crate) async fn check_status(
    provider: Provider,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(MarksortError::Provider {
        provider,
        status: status.as_u16(),
        message: error_message_from_body(&body, status.canonical_reason()),
    })
}

/// Pull `error.message` out of a JSON error body, else keep a bounded prefix
fn error_message_from_body(body: &str, reason: Option<&str>) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .and_then(|m| m.as_str().map(str::to_string))
    });

    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => reason.unwrap_or("no response body").to_string(),
        None => body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#;
        assert_eq!(
            error_message_from_body(body, Some("Service Unavailable")),
            "The model is overloaded."
        );
        assert_eq!(
            error_message_from_body(r#"{"error":"bad key"}"#, None),
            "bad key"
        );
        assert_eq!(
            error_message_from_body("", Some("Service Unavailable")),
            "Service Unavailable"
        );
        assert_eq!(error_message_from_body(&"x".repeat(900), None).len(), 500);
    }

    #[test]
    fn test_validate_api_base() {
        assert_eq!(
            validate_api_base(Provider::OpenAi, "https://proxy.example.com/v1/").unwrap(),
            "https://proxy.example.com/v1"
        );
        assert!(validate_api_base(Provider::OpenAi, "ftp://example.com").is_err());
        assert!(validate_api_base(Provider::OpenAi, "not a url").is_err());
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let config = ClientConfig {
            provider: Provider::Anthropic,
            api_key: Some("  ".to_string()),
            api_base: None,
            timeout_secs: 5,
        };
        let err = create_client(&config).err().unwrap();
        assert!(matches!(err, MarksortError::Config(_)));
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let config = ClientConfig::new(Provider::Gemini, "secret-key");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("[REDACTED]"));
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret-key"));
    }
}
