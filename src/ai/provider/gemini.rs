//! Google Gemini Client
//!
//! `POST {base}/v1beta/models/{model}:generateContent` with the key in the
//! `x-goog-api-key` header.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    ClientConfig, CompletionRequest, ModelClient, build_http_client, check_status, network_error,
    validate_api_base,
};
use crate::types::{MarksortError, Provider, Result};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiClient {
    api_key: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl GeminiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let api_base = match &config.api_base {
            Some(base) => validate_api_base(Provider::Gemini, base)?,
            None => DEFAULT_API_BASE.to_string(),
        };
        Ok(Self {
            api_key: SecretString::from(config.require_key()?),
            api_base,
            client: build_http_client(config.timeout_secs)?,
        })
    }

    fn build_request(request: &CompletionRequest) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(request.prompt.clone()),
                }],
            }],
            system_instruction: request.system.as_ref().map(|s| Content {
                role: None,
                parts: vec![Part {
                    text: Some(s.clone()),
                }],
            }),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
                response_mime_type: "application/json".to_string(),
            },
        }
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, request.model
        );
        debug!(model = %request.model, "Sending request to Gemini API");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&Self::build_request(request))
            .send()
            .await
            .map_err(|e| network_error(Provider::Gemini, e))?;

        let response = check_status(Provider::Gemini, response).await?;
        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| MarksortError::llm(format!("Failed to parse Gemini response: {}", e)))?;

        let candidate = body
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| MarksortError::llm("No candidates in Gemini response"))?;

        if candidate.finish_reason.as_deref() == Some("MAX_TOKENS") {
            debug!(model = %request.model, "Gemini stopped at the output token limit");
        }

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(MarksortError::llm("No content in Gemini response"));
        }
        Ok(text)
    }

    fn provider(&self) -> Provider {
        Provider::Gemini
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new(&ClientConfig::new(Provider::Gemini, "test-key").with_api_base(server.uri()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_joins_text_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "[{\"id\":1,"}, {"text": "\"category\":\"Dev\"}]"}]},
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server)
            .complete(&CompletionRequest::new("gemini-2.0-flash", "hi").with_system("sys"))
            .await
            .unwrap();
        assert_eq!(text, r#"[{"id":1,"category":"Dev"}]"#);
    }

    #[tokio::test]
    async fn test_status_maps_to_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "error": {"code": 503, "message": "The model is overloaded.", "status": "UNAVAILABLE"}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(&CompletionRequest::new("gemini-2.0-flash", "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn test_request_shape() {
        let body = serde_json::to_value(GeminiClient::build_request(
            &CompletionRequest::new("m", "prompt").with_max_output_tokens(100),
        ))
        .unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "prompt");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 100);
        assert!(body.get("systemInstruction").is_none());
    }
}
