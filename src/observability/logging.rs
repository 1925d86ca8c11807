//! Structured logging configuration.

use crate::config::LoggingSettings;
use std::path::PathBuf;

/// Default filter directive.
const DEFAULT_LEVEL: &str = "warn";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name; unknown names are pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// Append to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LEVEL.to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Builds logging configuration from config settings with env overrides.
    ///
    /// | Variable | Effect |
    /// |----------|--------|
    /// | `NEUROPROMPT_LOG` | Filter directive (wins over `RUST_LOG`) |
    /// | `RUST_LOG` | Filter directive |
    /// | `NEUROPROMPT_LOG_FORMAT` | `pretty` or `json` |
    /// | `NEUROPROMPT_LOG_FILE` | Log file path |
    ///
    /// `verbose` raises the crate's own events to debug.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        let mut config = Self::default();
        if let Some(settings) = settings {
            if let Some(level) = settings.level.as_deref().filter(|l| !l.trim().is_empty()) {
                config.filter = level.trim().to_string();
            }
            if let Some(format) = &settings.format {
                config.format = LogFormat::parse(format);
            }
            config.file.clone_from(&settings.file);
        }

        if let Some(filter) = env_value("NEUROPROMPT_LOG").or_else(|| env_value("RUST_LOG")) {
            config.filter = filter;
        }
        if let Some(format) = env_value("NEUROPROMPT_LOG_FORMAT") {
            config.format = LogFormat::parse(&format);
        }
        if let Some(file) = env_value("NEUROPROMPT_LOG_FILE") {
            config.file = Some(PathBuf::from(file));
        }
        if verbose {
            config.filter = format!("{},neuroprompt=debug", config.filter);
        }
        config
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
