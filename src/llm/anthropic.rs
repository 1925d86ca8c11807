//! Anthropic Claude client.

use super::{
    CallFailureKind, CompletionRequest, LlmHttpConfig, LlmProvider, ProviderFailure,
    build_http_client, send_json,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Anthropic messages API client bound to one model.
pub struct AnthropicClient {
    /// API key.
    api_key: Option<SecretString>,
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// HTTP client.
    client: reqwest::blocking::Client,
}

impl AnthropicClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.anthropic.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "claude-3-haiku-20240307";

    /// API version header value.
    const API_VERSION: &'static str = "2023-06-01";

    /// Creates a new Anthropic client, reading `ANTHROPIC_API_KEY`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            client: build_http_client(LlmHttpConfig::from_env()),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key: String = key.into();
        self.api_key = (!key.trim().is_empty()).then(|| SecretString::from(key));
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets HTTP client timeouts.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.client = build_http_client(config);
        self
    }

    /// Checks if an API key has a plausible format.
    ///
    /// Valid keys start with `sk-ant-`, are at least 40 characters, and hold
    /// only alphanumerics, hyphens and underscores.
    fn is_valid_api_key_format(key: &str) -> bool {
        const MIN_KEY_LENGTH: usize = 40;
        const PREFIX: &str = "sk-ant-";

        key.starts_with(PREFIX)
            && key.len() >= MIN_KEY_LENGTH
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    fn build_body(&self, request: &CompletionRequest) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
        }
    }
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmProvider for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderFailure> {
        let key = self.api_key.as_ref().ok_or_else(|| {
            ProviderFailure::new(CallFailureKind::Authentication, "ANTHROPIC_API_KEY not set")
        })?;
        if !Self::is_valid_api_key_format(key.expose_secret()) {
            return Err(ProviderFailure::new(
                CallFailureKind::Authentication,
                "invalid API key format: expected 'sk-ant-' prefix",
            ));
        }

        tracing::debug!(provider = "anthropic", model = %self.model, "Making LLM request");

        let builder = self
            .client
            .post(format!("{}/messages", self.endpoint))
            .timeout(request.timeout)
            .header("x-api-key", key.expose_secret())
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&self.build_body(request));

        let response: MessagesResponse = send_json(builder, "anthropic")?;
        let text: String = response
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect();
        if text.is_empty() {
            return Err(ProviderFailure::new(
                CallFailureKind::MalformedResponse,
                "no text content in response",
            ));
        }
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> CompletionRequest {
        CompletionRequest {
            prompt: "hello".to_string(),
            system: Some("be brief".to_string()),
            temperature: 0.5,
            max_tokens: 32,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_api_key_format() {
        let valid = format!("sk-ant-api03-{}", "a".repeat(40));
        assert!(AnthropicClient::is_valid_api_key_format(&valid));
        assert!(!AnthropicClient::is_valid_api_key_format("sk-ant-short"));
        assert!(!AnthropicClient::is_valid_api_key_format(&"x".repeat(50)));
        let with_space = format!("sk-ant-api03-{} x", "a".repeat(40));
        assert!(!AnthropicClient::is_valid_api_key_format(&with_space));
    }

    #[test]
    fn test_missing_key_is_authentication_failure() {
        let mut client = AnthropicClient::new();
        client.api_key = None;
        let err = client.complete(&request()).unwrap_err();
        assert_eq!(err.kind, CallFailureKind::Authentication);
    }

    #[test]
    fn test_malformed_key_is_authentication_failure() {
        let client = AnthropicClient::new().with_api_key("not-a-key");
        let err = client.complete(&request()).unwrap_err();
        assert_eq!(err.kind, CallFailureKind::Authentication);
    }

    #[test]
    fn test_body_carries_system_prompt() {
        let client = AnthropicClient::new().with_model("claude-3-5-sonnet");
        let body = serde_json::to_value(client.build_body(&request())).unwrap();
        assert_eq!(body["model"], "claude-3-5-sonnet");
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_text_blocks_concatenate() {
        let json = r#"{"content":[{"type":"text","text":"a"},{"type":"tool_use"},{"type":"text","text":"b"}]}"#;
        let response: MessagesResponse = serde_json::from_str(json).unwrap();
        let text: String = response
            .content
            .into_iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text)
            .collect();
        assert_eq!(text, "ab");
    }
}
