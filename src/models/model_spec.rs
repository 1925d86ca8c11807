//! Backing model descriptions.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Provider family a model is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// `OpenRouter` (OpenAI-compatible chat completions).
    #[default]
    OpenRouter,
    /// `OpenAI` chat completions.
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// Ollama (local).
    Ollama,
    /// LM Studio (local, OpenAI-compatible).
    LmStudio,
}

impl ProviderKind {
    /// Parses a provider string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openrouter" => Some(Self::OpenRouter),
            "openai" => Some(Self::OpenAi),
            "anthropic" | "claude" => Some(Self::Anthropic),
            "ollama" => Some(Self::Ollama),
            "lmstudio" | "lm_studio" | "lm-studio" => Some(Self::LmStudio),
            _ => None,
        }
    }

    /// Returns the provider as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenRouter => "openrouter",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
            Self::LmStudio => "lmstudio",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backing model in the fallback chain.
///
/// Immutable once loaded. The capability `tier` is the fallback rank: the
/// chain is ordered by descending tier and tiers must be unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Provider-side model identifier (e.g. `anthropic/claude-3-haiku`).
    pub id: String,
    /// Provider family.
    pub provider: ProviderKind,
    /// Capability tier; higher tiers are tried first.
    pub tier: u32,
    /// Largest prompt, in characters, this model accepts.
    pub max_request_chars: usize,
    /// Largest response, in characters, accepted from this model.
    pub max_response_chars: usize,
    /// Relative cost of one call.
    pub cost_weight: f64,
}

impl ModelSpec {
    /// Default request limit in characters.
    pub const DEFAULT_MAX_REQUEST_CHARS: usize = 48_000;

    /// Default response limit in characters.
    pub const DEFAULT_MAX_RESPONSE_CHARS: usize = 24_000;

    /// Creates a model spec with default limits and unit cost.
    #[must_use]
    pub fn new(id: impl Into<String>, provider: ProviderKind, tier: u32) -> Self {
        Self {
            id: id.into(),
            provider,
            tier,
            max_request_chars: Self::DEFAULT_MAX_REQUEST_CHARS,
            max_response_chars: Self::DEFAULT_MAX_RESPONSE_CHARS,
            cost_weight: 1.0,
        }
    }

    /// Sets the request and response size limits.
    #[must_use]
    pub const fn with_limits(mut self, max_request_chars: usize, max_response_chars: usize) -> Self {
        self.max_request_chars = max_request_chars;
        self.max_response_chars = max_response_chars;
        self
    }

    /// Sets the cost weight.
    #[must_use]
    pub const fn with_cost_weight(mut self, cost_weight: f64) -> Self {
        self.cost_weight = cost_weight;
        self
    }

    /// Returns true if a prompt of `chars` characters fits this model.
    #[must_use]
    pub const fn accepts_prompt(&self, chars: usize) -> bool {
        chars <= self.max_request_chars
    }
}

/// Checks that a set of specs forms a total fallback order.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the set is empty, an id is blank or
/// repeated, or two specs share a tier.
pub fn validate_fallback_order(specs: &[ModelSpec]) -> Result<()> {
    if specs.is_empty() {
        return Err(Error::InvalidInput(
            "at least one model must be configured".to_string(),
        ));
    }

    let mut tiers = HashSet::new();
    let mut ids = HashSet::new();
    for spec in specs {
        if spec.id.trim().is_empty() {
            return Err(Error::InvalidInput("model id must not be empty".to_string()));
        }
        if !ids.insert(spec.id.as_str()) {
            return Err(Error::InvalidInput(format!(
                "model '{}' is configured more than once",
                spec.id
            )));
        }
        if !tiers.insert(spec.tier) {
            return Err(Error::InvalidInput(format!(
                "model '{}' shares tier {} with another model; fallback order must have no ties",
                spec.id, spec.tier
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!(ProviderKind::parse("OpenRouter"), Some(ProviderKind::OpenRouter));
        assert_eq!(ProviderKind::parse("lm-studio"), Some(ProviderKind::LmStudio));
        assert_eq!(ProviderKind::parse("claude"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::parse("bard"), None);
    }

    #[test]
    fn test_accepts_prompt() {
        let spec = ModelSpec::new("small", ProviderKind::Ollama, 1).with_limits(10, 100);
        assert!(spec.accepts_prompt(10));
        assert!(!spec.accepts_prompt(11));
    }

    #[test]
    fn test_validate_rejects_tied_tiers() {
        let specs = vec![
            ModelSpec::new("a", ProviderKind::OpenAi, 2),
            ModelSpec::new("b", ProviderKind::OpenAi, 2),
        ];
        let err = validate_fallback_order(&specs).unwrap_err();
        assert!(err.to_string().contains("no ties"));
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let specs = vec![
            ModelSpec::new("a", ProviderKind::OpenAi, 2),
            ModelSpec::new("a", ProviderKind::Anthropic, 1),
        ];
        assert!(validate_fallback_order(&specs).is_err());
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(validate_fallback_order(&[]).is_err());
    }

    #[test]
    fn test_validate_accepts_total_order() {
        let specs = vec![
            ModelSpec::new("a", ProviderKind::OpenAi, 3),
            ModelSpec::new("b", ProviderKind::Anthropic, 2),
            ModelSpec::new("c", ProviderKind::Ollama, 1),
        ];
        assert!(validate_fallback_order(&specs).is_ok());
    }
}
