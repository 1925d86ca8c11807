//! Builds provider clients and the access layer from configuration.

use super::{
    AnthropicClient, AvailabilityTable, BulkheadConfig, BulkheadLlmProvider, LlmHttpConfig,
    LlmProvider, ModelAccessLayer, OllamaClient, OpenAiClient,
};
use crate::Result;
use crate::models::{ModelSpec, ProviderKind};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

/// Everything needed to reach one configured model.
#[derive(Debug, Clone)]
pub struct ModelEndpoint {
    /// Model description.
    pub spec: ModelSpec,
    /// Endpoint override.
    pub endpoint: Option<String>,
    /// Inline API key.
    pub api_key: Option<SecretString>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
}

impl ModelEndpoint {
    /// Creates an endpoint using provider defaults.
    #[must_use]
    pub const fn new(spec: ModelSpec) -> Self {
        Self {
            spec,
            endpoint: None,
            api_key: None,
            api_key_env: None,
        }
    }

    /// Resolves the API key: inline key first, then the named variable.
    ///
    /// `None` leaves the client's provider default (`OPENROUTER_API_KEY`,
    /// `ANTHROPIC_API_KEY`, ...) in effect.
    fn resolve_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.expose_secret().to_string());
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

/// Builds the provider client for one model.
#[must_use]
pub fn build_provider(model: &ModelEndpoint, http: LlmHttpConfig) -> Arc<dyn LlmProvider> {
    let key = model.resolve_key();
    let id = model.spec.id.as_str();

    match model.spec.provider {
        ProviderKind::OpenRouter | ProviderKind::OpenAi | ProviderKind::LmStudio => {
            let mut client = match model.spec.provider {
                ProviderKind::OpenAi => OpenAiClient::openai(id),
                ProviderKind::LmStudio => OpenAiClient::lmstudio(id),
                _ => OpenAiClient::openrouter(id),
            };
            if let Some(key) = key {
                client = client.with_api_key(key);
            }
            if let Some(endpoint) = &model.endpoint {
                client = client.with_endpoint(endpoint);
            }
            Arc::new(client.with_http_config(http))
        },
        ProviderKind::Anthropic => {
            let mut client = AnthropicClient::new().with_model(id);
            if let Some(key) = key {
                client = client.with_api_key(key);
            }
            if let Some(endpoint) = &model.endpoint {
                client = client.with_endpoint(endpoint);
            }
            Arc::new(client.with_http_config(http))
        },
        ProviderKind::Ollama => {
            let mut client = OllamaClient::new().with_model(id);
            if let Some(endpoint) = &model.endpoint {
                client = client.with_endpoint(endpoint);
            }
            Arc::new(client.with_http_config(http))
        },
    }
}

/// Builds the access layer over every configured model.
///
/// Each provider is wrapped in its own bulkhead when `bulkhead` is set.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidInput`] if the models do not form a total
/// fallback order.
pub fn build_access_layer(
    models: &[ModelEndpoint],
    availability: Arc<AvailabilityTable>,
    bulkhead: Option<&BulkheadConfig>,
    http: LlmHttpConfig,
) -> Result<ModelAccessLayer> {
    let chain = models
        .iter()
        .map(|model| {
            let provider = build_provider(model, http);
            let provider: Arc<dyn LlmProvider> = match bulkhead {
                Some(config) => Arc::new(BulkheadLlmProvider::new(provider, config.clone())),
                None => provider,
            };
            tracing::debug!(
                model = %model.spec.id,
                provider = %model.spec.provider,
                tier = model.spec.tier,
                "Configured model"
            );
            (model.spec.clone(), provider)
        })
        .collect();

    ModelAccessLayer::new(chain, availability)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(id: &str, provider: ProviderKind, tier: u32) -> ModelEndpoint {
        ModelEndpoint::new(ModelSpec::new(id, provider, tier))
    }

    #[test]
    fn test_build_provider_names() {
        let http = LlmHttpConfig::default();
        assert_eq!(
            build_provider(&endpoint("m", ProviderKind::OpenRouter, 1), http).name(),
            "openrouter"
        );
        assert_eq!(
            build_provider(&endpoint("m", ProviderKind::Anthropic, 1), http).name(),
            "anthropic"
        );
        assert_eq!(
            build_provider(&endpoint("m", ProviderKind::Ollama, 1), http).name(),
            "ollama"
        );
        assert_eq!(
            build_provider(&endpoint("m", ProviderKind::LmStudio, 1), http).name(),
            "lmstudio"
        );
    }

    #[test]
    fn test_inline_key_wins() {
        let mut model = endpoint("m", ProviderKind::OpenAi, 1);
        model.api_key = Some(SecretString::from("inline".to_string()));
        model.api_key_env = Some("NEUROPROMPT_TEST_UNSET_KEY_VAR".to_string());
        assert_eq!(model.resolve_key().as_deref(), Some("inline"));
    }

    #[test]
    fn test_unset_env_key_resolves_to_none() {
        let mut model = endpoint("m", ProviderKind::OpenAi, 1);
        model.api_key_env = Some("NEUROPROMPT_TEST_UNSET_KEY_VAR".to_string());
        assert!(model.resolve_key().is_none());
    }

    #[test]
    fn test_build_access_layer_orders_chain() {
        let models = vec![
            endpoint("local", ProviderKind::Ollama, 1),
            endpoint("remote", ProviderKind::OpenRouter, 5),
        ];
        let layer = build_access_layer(
            &models,
            Arc::new(AvailabilityTable::default()),
            Some(&BulkheadConfig::default()),
            LlmHttpConfig::default(),
        )
        .unwrap();
        let ids: Vec<_> = layer.chain().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["remote", "local"]);
    }

    #[test]
    fn test_build_access_layer_rejects_tied_tiers() {
        let models = vec![
            endpoint("a", ProviderKind::Ollama, 1),
            endpoint("b", ProviderKind::Ollama, 1),
        ];
        assert!(
            build_access_layer(
                &models,
                Arc::new(AvailabilityTable::default()),
                None,
                LlmHttpConfig::default(),
            )
            .is_err()
        );
    }
}
