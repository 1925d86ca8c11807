//! Configuration management.
//!
//! [`NeuropromptConfig`] is assembled in three layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`--config`, or `config.toml` under the platform config dir)
//! 3. `NEUROPROMPT_*` environment variables (after loading `.env`)
//!
//! ```toml
//! [pipeline]
//! acceptance_threshold = 80
//! max_iterations = 3
//!
//! [[models]]
//! id = "anthropic/claude-3-haiku:free"
//! provider = "openrouter"
//! tier = 2
//! api_key_env = "OPENROUTER_API_KEY"
//!
//! [[models]]
//! id = "llama3.2"
//! provider = "ollama"
//! tier = 1
//!
//! [feedback]
//! backend = "sqlite"
//! path = "~/.local/share/neuroprompt/feedback.db"
//! ```

use crate::engine::PipelineConfig;
use crate::feedback::{FeedbackBackend, FeedbackConfig, default_data_dir};
use crate::llm::{AvailabilityConfig, BulkheadConfig, LlmHttpConfig, ModelEndpoint};
use crate::models::{ModelSpec, ProviderKind, validate_fallback_order};
use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Model used when no `[[models]]` are configured.
pub const DEFAULT_MODEL_ID: &str = "anthropic/claude-3-haiku:free";

/// Main configuration.
#[derive(Debug, Clone)]
pub struct NeuropromptConfig {
    /// Pipeline tuning.
    pub pipeline: PipelineConfig,
    /// Model chain, any order; tiers decide fallback order.
    pub models: Vec<ModelEndpoint>,
    /// Cooldown settings.
    pub availability: AvailabilityConfig,
    /// Per-provider concurrency limit, if enabled.
    pub bulkhead: Option<BulkheadConfig>,
    /// HTTP client timeouts.
    pub http: LlmHttpConfig,
    /// Directory of framework documents; `None` uses the embedded catalog.
    pub frameworks_dir: Option<PathBuf>,
    /// Feedback store.
    pub feedback: FeedbackConfig,
    /// Rubric file; `None` uses the default rubric.
    pub rubric_path: Option<PathBuf>,
    /// Logging and metrics settings.
    pub observability: ObservabilitySettings,
    /// File the configuration was loaded from.
    pub source: Option<PathBuf>,
}

/// Logging and metrics sections of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservabilitySettings {
    /// `[logging]`.
    pub logging: Option<LoggingSettings>,
    /// `[metrics]`.
    pub metrics: Option<MetricsSettings>,
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive (e.g. `info`, `neuroprompt=debug`).
    pub level: Option<String>,
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// `[metrics]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSettings {
    /// Installs the Prometheus recorder.
    pub enabled: Option<bool>,
    /// Port for the HTTP scrape listener.
    pub port: Option<u16>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// `[pipeline]`.
    pub pipeline: Option<ConfigFilePipeline>,
    /// `[[models]]`.
    #[serde(default)]
    pub models: Vec<ConfigFileModel>,
    /// `[availability]`.
    pub availability: Option<ConfigFileAvailability>,
    /// `[bulkhead]`.
    pub bulkhead: Option<ConfigFileBulkhead>,
    /// `[http]`.
    pub http: Option<ConfigFileHttp>,
    /// `[frameworks]`.
    pub frameworks: Option<ConfigFileFrameworks>,
    /// `[feedback]`.
    pub feedback: Option<ConfigFileFeedback>,
    /// `[rubric]`.
    pub rubric: Option<ConfigFileRubric>,
    /// `[logging]`.
    pub logging: Option<LoggingSettings>,
    /// `[metrics]`.
    pub metrics: Option<MetricsSettings>,
}

/// Pipeline section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFilePipeline {
    /// Acceptance threshold (0-100).
    pub acceptance_threshold: Option<f64>,
    /// Iteration cap.
    pub max_iterations: Option<u32>,
    /// Consecutive misses before early stop.
    pub stagnation_limit: Option<u32>,
    /// Technique note cap.
    pub max_techniques: Option<usize>,
    /// Past runs loaded per request.
    pub history_limit: Option<usize>,
    /// Base sampling temperature.
    pub temperature: Option<f32>,
    /// Output token limit.
    pub max_tokens: Option<u32>,
    /// Per-call deadline in milliseconds.
    pub call_deadline_ms: Option<u64>,
}

/// One `[[models]]` entry.
#[derive(Debug, Deserialize)]
pub struct ConfigFileModel {
    /// Provider model identifier.
    pub id: String,
    /// Provider name.
    pub provider: Option<String>,
    /// Capability tier (higher tried first).
    pub tier: u32,
    /// Endpoint override.
    pub endpoint: Option<String>,
    /// Inline API key.
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    /// Request size limit in characters.
    pub max_request_chars: Option<usize>,
    /// Response size limit in characters.
    pub max_response_chars: Option<usize>,
    /// Relative call cost.
    pub cost_weight: Option<f64>,
}

/// Availability section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileAvailability {
    /// Consecutive failures before cooldown.
    pub failure_threshold: Option<u32>,
    /// Cooldown in milliseconds.
    pub cooldown_ms: Option<u64>,
}

/// Bulkhead section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileBulkhead {
    /// Enables the bulkhead (default true when the section is present).
    pub enabled: Option<bool>,
    /// Concurrent calls per provider.
    pub max_concurrent: Option<usize>,
    /// Permit wait limit in milliseconds.
    pub acquire_timeout_ms: Option<u64>,
    /// Fail instead of waiting when full.
    pub fail_fast: Option<bool>,
}

/// HTTP section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileHttp {
    /// Request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,
}

/// Frameworks section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileFrameworks {
    /// Directory of framework documents.
    pub dir: Option<PathBuf>,
}

/// Feedback section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileFeedback {
    /// `jsonl`, `sqlite`, `memory` or `none`.
    pub backend: Option<String>,
    /// Store path.
    pub path: Option<PathBuf>,
}

/// Rubric section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileRubric {
    /// Rubric JSON file.
    pub path: Option<PathBuf>,
}

impl Default for NeuropromptConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            models: vec![default_model()],
            availability: AvailabilityConfig::default(),
            bulkhead: None,
            http: LlmHttpConfig::default(),
            frameworks_dir: None,
            feedback: FeedbackConfig::default(),
            rubric_path: None,
            observability: ObservabilitySettings::default(),
            source: None,
        }
    }
}

fn default_model() -> ModelEndpoint {
    let id = std::env::var("OPENROUTER_MODEL_ID")
        .ok()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string());
    ModelEndpoint::new(ModelSpec::new(id, ProviderKind::OpenRouter, 1))
}

impl NeuropromptConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path, then applies env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// model chain is invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parses TOML text, then applies env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid config or the model chain
    /// is invalid.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        let config = Self::from_config_file(file)?.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from the default location.
    ///
    /// Loads `.env` first, then checks the platform config dir
    /// (`~/.config/neuroprompt/config.toml` on Linux). Falls back to
    /// defaults with env overrides when no file exists or it is invalid.
    #[must_use]
    pub fn load_default() -> Self {
        let _ = dotenvy::dotenv();

        if let Some(path) = Self::default_path()
            && path.exists()
        {
            match Self::load_from_file(&path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring invalid config file");
                },
            }
        }

        Self::default().with_env_overrides()
    }

    /// Default config file path.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "neuroprompt")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(pipeline) = file.pipeline {
            let p = &mut config.pipeline;
            if let Some(v) = pipeline.acceptance_threshold {
                p.acceptance_threshold = v;
            }
            if let Some(v) = pipeline.max_iterations {
                p.max_iterations = v;
            }
            if let Some(v) = pipeline.stagnation_limit {
                p.stagnation_limit = v;
            }
            if let Some(v) = pipeline.max_techniques {
                p.max_techniques = v;
            }
            if let Some(v) = pipeline.history_limit {
                p.history_limit = v;
            }
            if let Some(v) = pipeline.temperature {
                p.generate.temperature = v;
            }
            if let Some(v) = pipeline.max_tokens {
                p.generate.max_tokens = v;
            }
            if let Some(v) = pipeline.call_deadline_ms {
                p.generate.deadline = Duration::from_millis(v);
            }
        }

        if !file.models.is_empty() {
            config.models = file
                .models
                .into_iter()
                .map(model_endpoint)
                .collect::<Result<_>>()?;
        }

        if let Some(availability) = file.availability {
            if let Some(v) = availability.failure_threshold {
                config.availability = config.availability.with_failure_threshold(v);
            }
            if let Some(v) = availability.cooldown_ms {
                config.availability = config.availability.with_cooldown(Duration::from_millis(v));
            }
        }

        if let Some(bulkhead) = file.bulkhead
            && bulkhead.enabled.unwrap_or(true)
        {
            let mut b = BulkheadConfig::new();
            if let Some(v) = bulkhead.max_concurrent {
                b = b.with_max_concurrent(v.max(1));
            }
            if let Some(v) = bulkhead.acquire_timeout_ms {
                b = b.with_acquire_timeout_ms(v);
            }
            if let Some(v) = bulkhead.fail_fast {
                b = b.with_fail_fast(v);
            }
            config.bulkhead = Some(b);
        }

        if let Some(http) = file.http {
            if let Some(v) = http.timeout_ms {
                config.http.timeout_ms = v;
            }
            if let Some(v) = http.connect_timeout_ms {
                config.http.connect_timeout_ms = v;
            }
        }

        config.frameworks_dir = file.frameworks.and_then(|f| f.dir).map(|d| expand_home(&d));
        config.rubric_path = file.rubric.and_then(|r| r.path).map(|p| expand_home(&p));

        if let Some(feedback) = file.feedback {
            if let Some(backend) = feedback.backend {
                config.feedback.backend = FeedbackBackend::parse(&backend).ok_or_else(|| {
                    Error::InvalidInput(format!("unknown feedback backend '{backend}'"))
                })?;
                if feedback.path.is_none() {
                    config.feedback.path = default_feedback_path(config.feedback.backend);
                }
            }
            if let Some(path) = feedback.path {
                config.feedback.path = Some(expand_home(&path));
            }
        }

        config.observability = ObservabilitySettings {
            logging: file.logging,
            metrics: file.metrics,
        };

        Ok(config)
    }

    /// Applies `NEUROPROMPT_*` environment overrides.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `NEUROPROMPT_ACCEPTANCE_THRESHOLD` | `pipeline.acceptance_threshold` |
    /// | `NEUROPROMPT_MAX_ITERATIONS` | `pipeline.max_iterations` |
    /// | `NEUROPROMPT_MAX_TECHNIQUES` | `pipeline.max_techniques` |
    /// | `NEUROPROMPT_FRAMEWORKS_DIR` | `frameworks_dir` |
    /// | `NEUROPROMPT_FEEDBACK_BACKEND` | `feedback.backend` |
    /// | `NEUROPROMPT_FEEDBACK_PATH` | `feedback.path` |
    /// | `NEUROPROMPT_RUBRIC_PATH` | `rubric_path` |
    ///
    /// Availability, bulkhead and HTTP settings take their own
    /// `NEUROPROMPT_*` overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse::<f64>("NEUROPROMPT_ACCEPTANCE_THRESHOLD") {
            self.pipeline.acceptance_threshold = v;
        }
        if let Some(v) = env_parse::<u32>("NEUROPROMPT_MAX_ITERATIONS") {
            self.pipeline.max_iterations = v;
        }
        if let Some(v) = env_parse::<usize>("NEUROPROMPT_MAX_TECHNIQUES") {
            self.pipeline.max_techniques = v;
        }
        if let Some(v) = env_string("NEUROPROMPT_FRAMEWORKS_DIR") {
            self.frameworks_dir = Some(expand_home(Path::new(&v)));
        }
        if let Some(backend) =
            env_string("NEUROPROMPT_FEEDBACK_BACKEND").and_then(|v| FeedbackBackend::parse(&v))
        {
            self.feedback.backend = backend;
            self.feedback.path = default_feedback_path(backend);
        }
        if let Some(v) = env_string("NEUROPROMPT_FEEDBACK_PATH") {
            self.feedback.path = Some(expand_home(Path::new(&v)));
        }
        if let Some(v) = env_string("NEUROPROMPT_RUBRIC_PATH") {
            self.rubric_path = Some(expand_home(Path::new(&v)));
        }

        self.availability = self.availability.with_env_overrides();
        self.bulkhead = self.bulkhead.map(BulkheadConfig::with_env_overrides);
        self.http = self.http.with_env_overrides();
        self.clamp();
        self
    }

    /// Clamps out-of-range pipeline values.
    fn clamp(&mut self) {
        let p = &mut self.pipeline;
        if !p.acceptance_threshold.is_finite() {
            p.acceptance_threshold = PipelineConfig::default().acceptance_threshold;
        }
        p.acceptance_threshold = p.acceptance_threshold.clamp(0.0, 100.0);
        p.max_iterations = p.max_iterations.max(1);
        p.stagnation_limit = p.stagnation_limit.max(1);
        p.max_techniques = p.max_techniques.max(1);
        p.generate.temperature = p.generate.temperature.clamp(0.0, 2.0);
        p.generate.max_tokens = p.generate.max_tokens.max(1);
    }

    /// Checks the model chain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if models share a tier or an id.
    pub fn validate(&self) -> Result<()> {
        let specs: Vec<ModelSpec> = self.models.iter().map(|m| m.spec.clone()).collect();
        validate_fallback_order(&specs)
    }
}

fn model_endpoint(model: ConfigFileModel) -> Result<ModelEndpoint> {
    let provider = match model.provider.as_deref() {
        None => ProviderKind::default(),
        Some(name) => ProviderKind::parse(name)
            .ok_or_else(|| Error::InvalidInput(format!("unknown provider '{name}'")))?,
    };
    let mut spec = ModelSpec::new(model.id, provider, model.tier);
    if let Some(v) = model.max_request_chars {
        spec.max_request_chars = v.max(1);
    }
    if let Some(v) = model.max_response_chars {
        spec.max_response_chars = v.max(1);
    }
    if let Some(v) = model.cost_weight {
        spec = spec.with_cost_weight(v.max(0.0));
    }
    Ok(ModelEndpoint {
        spec,
        endpoint: model.endpoint,
        api_key: model.api_key.map(SecretString::from),
        api_key_env: model.api_key_env,
    })
}

fn default_feedback_path(backend: FeedbackBackend) -> Option<PathBuf> {
    let file = match backend {
        FeedbackBackend::Jsonl => "feedback.jsonl",
        FeedbackBackend::Sqlite => "feedback.db",
        FeedbackBackend::Memory | FeedbackBackend::None => return None,
    };
    default_data_dir().map(|dir| dir.join(file))
}

/// Expands a leading `~/` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(base) = directories::BaseDirs::new()
    {
        return base.home_dir().join(rest);
    }
    path.to_path_buf()
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}
