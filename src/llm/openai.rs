//! OpenAI-compatible chat completions client.
//!
//! Serves `OpenRouter` (the default), `OpenAI` and LM Studio, which all speak
//! the same `/chat/completions` protocol.

use super::{
    CallFailureKind, CompletionRequest, LlmHttpConfig, LlmProvider, ProviderFailure,
    build_http_client, send_json,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// OpenAI-compatible LLM client bound to one model.
pub struct OpenAiClient {
    /// Provider name reported in logs and metrics.
    name: &'static str,
    /// API key; optional for local servers.
    api_key: Option<SecretString>,
    /// Whether calls without a key are rejected.
    key_required: bool,
    /// API base endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// HTTP client.
    client: reqwest::blocking::Client,
}

impl OpenAiClient {
    /// `OpenRouter` API endpoint.
    pub const OPENROUTER_ENDPOINT: &'static str = "https://openrouter.ai/api/v1";

    /// `OpenAI` API endpoint.
    pub const OPENAI_ENDPOINT: &'static str = "https://api.openai.com/v1";

    /// LM Studio local endpoint.
    pub const LMSTUDIO_ENDPOINT: &'static str = "http://localhost:1234/v1";

    /// Application title sent to `OpenRouter`.
    pub const APP_TITLE: &'static str = "NeuroPrompt";

    fn base(name: &'static str, endpoint: &str, model: &str, key_required: bool) -> Self {
        Self {
            name,
            api_key: None,
            key_required,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            client: build_http_client(LlmHttpConfig::from_env()),
        }
    }

    /// Creates an `OpenRouter` client, reading `OPENROUTER_API_KEY`.
    #[must_use]
    pub fn openrouter(model: impl Into<String>) -> Self {
        let client = Self::base("openrouter", Self::OPENROUTER_ENDPOINT, &model.into(), true);
        match std::env::var("OPENROUTER_API_KEY") {
            Ok(key) => client.with_api_key(key),
            Err(_) => client,
        }
    }

    /// Creates an `OpenAI` client, reading `OPENAI_API_KEY`.
    #[must_use]
    pub fn openai(model: impl Into<String>) -> Self {
        let client = Self::base("openai", Self::OPENAI_ENDPOINT, &model.into(), true);
        match std::env::var("OPENAI_API_KEY") {
            Ok(key) => client.with_api_key(key),
            Err(_) => client,
        }
    }

    /// Creates an LM Studio client. No key is required.
    #[must_use]
    pub fn lmstudio(model: impl Into<String>) -> Self {
        let endpoint = std::env::var("LMSTUDIO_ENDPOINT")
            .unwrap_or_else(|_| Self::LMSTUDIO_ENDPOINT.to_string());
        Self::base("lmstudio", &endpoint, &model.into(), false)
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key: String = key.into();
        self.api_key = if key.trim().is_empty() {
            None
        } else {
            Some(SecretString::from(key))
        };
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

    /// Model identifier.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Reasoning models take `max_completion_tokens` and reject `temperature`.
    fn is_reasoning_model(&self) -> bool {
        let model = self.model.rsplit('/').next().unwrap_or(&self.model);
        model.starts_with("gpt-5") || model.starts_with("o1") || model.starts_with("o3")
    }

    fn build_body(&self, request: &CompletionRequest) -> ChatCompletionRequest {
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

        if self.is_reasoning_model() {
            ChatCompletionRequest {
                model: self.model.clone(),
                messages,
                max_tokens: None,
                max_completion_tokens: Some(request.max_tokens),
                temperature: None,
            }
        } else {
            ChatCompletionRequest {
                model: self.model.clone(),
                messages,
                max_tokens: Some(request.max_tokens),
                max_completion_tokens: None,
                temperature: Some(request.temperature),
            }
        }
    }
}

impl LlmProvider for OpenAiClient {
    fn name(&self) -> &'static str {
        self.name
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderFailure> {
        if self.key_required && self.api_key.is_none() {
            return Err(ProviderFailure::new(
                CallFailureKind::Authentication,
                format!("no API key configured for {}", self.name),
            ));
        }

        tracing::debug!(provider = self.name, model = %self.model, "Making LLM request");

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .timeout(request.timeout)
            .header("Content-Type", "application/json")
            .json(&self.build_body(request));
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }
        if self.name == "openrouter" {
            builder = builder
                .header("HTTP-Referer", "https://github.com/neuroprompt/neuroprompt")
                .header("X-Title", Self::APP_TITLE);
        }

        let response: ChatCompletionResponse = send_json(builder, self.name)?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                ProviderFailure::new(CallFailureKind::MalformedResponse, "no choices in response")
            })
    }
}

/// Request to the Chat Completions API.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// A message in the chat.
#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Response from the Chat Completions API.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> CompletionRequest {
        CompletionRequest {
            prompt: "hello".to_string(),
            system: Some("be brief".to_string()),
            temperature: 0.3,
            max_tokens: 64,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_openrouter_defaults() {
        let client = OpenAiClient::openrouter("anthropic/claude-3-haiku");
        assert_eq!(client.name(), "openrouter");
        assert_eq!(client.endpoint, OpenAiClient::OPENROUTER_ENDPOINT);
        assert_eq!(client.model(), "anthropic/claude-3-haiku");
    }

    #[test]
    fn test_missing_key_is_authentication_failure() {
        let client = OpenAiClient::base("openai", OpenAiClient::OPENAI_ENDPOINT, "gpt-4o", true);
        let err = client.complete(&request()).unwrap_err();
        assert_eq!(err.kind, CallFailureKind::Authentication);
    }

    #[test]
    fn test_blank_key_is_ignored() {
        let client = OpenAiClient::openai("gpt-4o").with_api_key("  ");
        assert!(client.api_key.is_none());
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let client = OpenAiClient::lmstudio("local").with_endpoint("http://host:1234/v1/");
        assert_eq!(client.endpoint, "http://host:1234/v1");
    }

    #[test]
    fn test_body_includes_system_and_temperature() {
        let client = OpenAiClient::openai("gpt-4o-mini");
        let body = serde_json::to_value(client.build_body(&request())).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["max_tokens"], 64);
        assert!(body.get("max_completion_tokens").is_none());
    }

    #[test]
    fn test_reasoning_model_body() {
        let client = OpenAiClient::openrouter("openai/o3-mini");
        let body = serde_json::to_value(client.build_body(&request())).unwrap();
        assert_eq!(body["max_completion_tokens"], 64);
        assert!(body.get("temperature").is_none());
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_unreachable_server_is_retriable() {
        let client = OpenAiClient::lmstudio("local").with_endpoint("http://127.0.0.1:9");
        let err = client.complete(&request()).unwrap_err();
        assert!(err.kind.is_retriable());
    }
}
