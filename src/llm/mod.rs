//! Model access layer.
//!
//! Provides a unified interface over remote language models: provider
//! adapters ([`OpenAiClient`], [`AnthropicClient`], [`OllamaClient`]), a
//! concurrency-limiting [`BulkheadLlmProvider`], and the fallback-aware
//! [`ModelAccessLayer`] that every role agent calls through.

mod access;
mod anthropic;
mod availability;
mod bulkhead;
mod factory;
mod ollama;
mod openai;

pub use access::ModelAccessLayer;
pub use anthropic::AnthropicClient;
pub use availability::{Availability, AvailabilityConfig, AvailabilityTable, ModelHealth};
pub use bulkhead::{BulkheadConfig, BulkheadLlmProvider};
pub use factory::{ModelEndpoint, build_access_layer, build_provider};
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use thiserror::Error as ThisError;

/// Why a single model call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallFailureKind {
    /// The provider did not answer before the deadline.
    Timeout,
    /// The provider throttled the call.
    RateLimited,
    /// Transient provider or network failure.
    ServerError,
    /// The response was empty, undecodable or too large.
    MalformedResponse,
    /// Credentials were rejected.
    Authentication,
    /// The request was permanently rejected or no model accepts it.
    InvalidRequest,
    /// Every model in the chain failed or was cooling down.
    Exhausted,
}

impl CallFailureKind {
    /// Returns true if falling back to another model may succeed.
    ///
    /// `Exhausted` is reported as retriable: the chain may recover once
    /// cooldowns elapse, even though the current call is over.
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        !matches!(self, Self::Authentication | Self::InvalidRequest)
    }

    /// Returns the kind as a metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::MalformedResponse => "malformed_response",
            Self::Authentication => "authentication",
            Self::InvalidRequest => "invalid_request",
            Self::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for CallFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed provider call.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("{kind}: {message}")]
pub struct ProviderFailure {
    /// Failure kind.
    pub kind: CallFailureKind,
    /// Detail, never containing credentials.
    pub message: String,
}

impl ProviderFailure {
    /// Creates a provider failure.
    #[must_use]
    pub fn new(kind: CallFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A single completion request sent to one provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// User prompt.
    pub prompt: String,
    /// Optional system prompt.
    pub system: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token limit.
    pub max_tokens: u32,
    /// Time allowed for this call.
    pub timeout: Duration,
}

/// Trait for LLM providers.
///
/// A provider is bound to one model; the access layer owns one provider
/// per [`ModelSpec`](crate::models::ModelSpec).
pub trait LlmProvider: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Generates a completion.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderFailure`] classified by [`CallFailureKind`].
    fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, ProviderFailure>;
}

impl<P: LlmProvider + ?Sized> LlmProvider for std::sync::Arc<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, ProviderFailure> {
        (**self).complete(request)
    }
}

/// Options for one generation through the access layer.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token limit.
    pub max_tokens: u32,
    /// Per-model-call deadline.
    pub deadline: Duration,
    /// Optional system prompt.
    pub system: Option<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
            deadline: Duration::from_secs(60),
            system: None,
        }
    }
}

impl GenerateOptions {
    /// Sets the temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the output token limit.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the per-call deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Outcome of one generation through the access layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelCallResult {
    /// A model answered.
    Success {
        /// Response text.
        text: String,
        /// Latency of the successful attempt.
        latency: Duration,
        /// Identifier of the model that answered.
        model_used: String,
    },
    /// No model answered.
    Failure {
        /// Failure kind.
        kind: CallFailureKind,
        /// Whether a later call may succeed.
        retriable: bool,
        /// Detail of the last failure.
        message: String,
        /// Models actually called, in order.
        attempted: Vec<String>,
    },
}

impl ModelCallResult {
    /// Returns the response text on success.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Success { text, .. } => Some(text),
            Self::Failure { .. } => None,
        }
    }

    /// Returns true on success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Something that can turn a prompt into text.
///
/// Implemented by [`ModelAccessLayer`]; role agents depend only on this
/// trait so tests can script responses.
pub trait TextGenerator: Send + Sync {
    /// Generates text for a prompt.
    fn generate(&self, prompt: &str, options: &GenerateOptions) -> ModelCallResult;
}

impl<G: TextGenerator + ?Sized> TextGenerator for std::sync::Arc<G> {
    fn generate(&self, prompt: &str, options: &GenerateOptions) -> ModelCallResult {
        (**self).generate(prompt, options)
    }
}

/// HTTP client configuration for LLM providers.
#[derive(Debug, Clone, Copy)]
pub struct LlmHttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl LlmHttpConfig {
    /// Loads HTTP configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("NEUROPROMPT_LLM_TIMEOUT_MS")
            && let Ok(timeout_ms) = v.parse::<u64>()
        {
            self.timeout_ms = timeout_ms;
        }
        if let Ok(v) = std::env::var("NEUROPROMPT_LLM_CONNECT_TIMEOUT_MS")
            && let Ok(connect_timeout_ms) = v.parse::<u64>()
        {
            self.connect_timeout_ms = connect_timeout_ms;
        }
        self
    }
}

/// Builds a blocking HTTP client for LLM requests with configured timeouts.
///
/// Per-call deadlines are applied on each request on top of these defaults.
#[must_use]
pub fn build_http_client(config: LlmHttpConfig) -> reqwest::blocking::Client {
    let mut builder = reqwest::blocking::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build LLM HTTP client: {err}");
        reqwest::blocking::Client::new()
    })
}

/// Maps an HTTP status code to a failure kind.
#[must_use]
pub const fn classify_status(status: u16) -> CallFailureKind {
    match status {
        401 | 403 => CallFailureKind::Authentication,
        408 => CallFailureKind::Timeout,
        429 => CallFailureKind::RateLimited,
        400 | 404 | 413 | 422 => CallFailureKind::InvalidRequest,
        _ => CallFailureKind::ServerError,
    }
}

/// Maps a transport error to a failure kind.
#[must_use]
pub fn classify_transport(err: &reqwest::Error) -> CallFailureKind {
    if err.is_timeout() {
        CallFailureKind::Timeout
    } else if err.is_decode() {
        CallFailureKind::MalformedResponse
    } else if let Some(status) = err.status() {
        classify_status(status.as_u16())
    } else {
        CallFailureKind::ServerError
    }
}

/// Sends a request and decodes a JSON body, classifying every failure.
pub(crate) fn send_json<T: DeserializeOwned>(
    builder: reqwest::blocking::RequestBuilder,
    provider: &'static str,
) -> std::result::Result<T, ProviderFailure> {
    let response = builder.send().map_err(|e| {
        ProviderFailure::new(classify_transport(&e), format!("{provider} request failed: {e}"))
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(ProviderFailure::new(
            classify_status(status.as_u16()),
            format!("{provider} returned {status}: {}", truncate(&body, 200)),
        ));
    }

    response.json::<T>().map_err(|e| {
        let kind = if e.is_timeout() {
            CallFailureKind::Timeout
        } else {
            CallFailureKind::MalformedResponse
        };
        ProviderFailure::new(kind, format!("{provider} response undecodable: {e}"))
    })
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Extracts JSON from LLM response, handling markdown code blocks.
#[must_use]
pub fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    // ```json ... ``` blocks
    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // ``` ... ``` blocks without a language marker
    if let Some(start) = trimmed.find("```") {
        let content_start = start + 3;
        let after_marker = &trimmed[content_start..];
        let json_start = after_marker
            .find('{')
            .map_or(content_start, |pos| content_start + pos);
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    if let Some(start) = trimmed.find('{')
        && let Some(end) = trimmed.rfind('}')
        && end > start
    {
        return &trimmed[start..=end];
    }

    if let Some(start) = trimmed.find('[')
        && let Some(end) = trimmed.rfind(']')
        && end > start
    {
        return &trimmed[start..=end];
    }

    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_raw() {
        let response = r#"{"key": "value"}"#;
        assert_eq!(extract_json_from_response(response), response);
    }

    #[test]
    fn test_extract_json_markdown() {
        let response = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(extract_json_from_response(response), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_extract_json_with_prefix() {
        let response = "Here is the critique: {\"score\": 55} hope this helps";
        assert_eq!(extract_json_from_response(response), r#"{"score": 55}"#);
    }

    #[test]
    fn test_extract_json_array() {
        let response = r#"["a", "b"]"#;
        assert_eq!(extract_json_from_response(response), response);
    }

    #[test]
    fn test_extract_json_no_json() {
        assert_eq!(extract_json_from_response("  plain text "), "plain text");
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(401), CallFailureKind::Authentication);
        assert_eq!(classify_status(403), CallFailureKind::Authentication);
        assert_eq!(classify_status(400), CallFailureKind::InvalidRequest);
        assert_eq!(classify_status(413), CallFailureKind::InvalidRequest);
        assert_eq!(classify_status(408), CallFailureKind::Timeout);
        assert_eq!(classify_status(429), CallFailureKind::RateLimited);
        assert_eq!(classify_status(502), CallFailureKind::ServerError);
    }

    #[test]
    fn test_retriable_kinds() {
        assert!(CallFailureKind::Timeout.is_retriable());
        assert!(CallFailureKind::RateLimited.is_retriable());
        assert!(CallFailureKind::ServerError.is_retriable());
        assert!(CallFailureKind::MalformedResponse.is_retriable());
        assert!(!CallFailureKind::Authentication.is_retriable());
        assert!(!CallFailureKind::InvalidRequest.is_retriable());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }

    #[test]
    fn test_generate_options_builder() {
        let opts = GenerateOptions::default()
            .with_temperature(0.2)
            .with_max_tokens(50)
            .with_deadline(Duration::from_millis(10))
            .with_system("be terse");
        assert!((opts.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(opts.max_tokens, 50);
        assert_eq!(opts.deadline, Duration::from_millis(10));
        assert_eq!(opts.system.as_deref(), Some("be terse"));
    }
}
