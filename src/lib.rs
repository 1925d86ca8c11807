//! # NeuroPrompt
//!
//! Generates optimized natural-language prompts by routing a request through a
//! pipeline of reasoning roles backed by a fallback-aware model access layer.
//!
//! A request flows Researcher → Generator → (Critic ↔ Optimizer)* until the
//! critique score clears the acceptance threshold, the iteration cap is hit,
//! or the optimizer stops making progress on high-severity findings.
//!
//! ## Components
//!
//! - [`llm`]: model access layer with fallback chains, cooldowns and bulkheads
//! - [`frameworks`]: catalog of prompt frameworks (SCQA, PECRA, RISEN, ...)
//! - [`agents`]: the four role agents
//! - [`engine`]: the orchestration state machine
//! - [`feedback`]: append-only run history
//! - [`cli`]: request input and prompt output for the binary
//!
//! ## Example
//!
//! ```rust,ignore
//! use neuroprompt::{NeuropromptConfig, Orchestrator};
//!
//! let config = NeuropromptConfig::load_default();
//! let orchestrator = Orchestrator::from_config(&config)?;
//! let result = orchestrator.run("summarize a technical document for executives")?;
//! println!("{}", result.prompt);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod agents;
pub mod cli;
pub mod config;
pub mod engine;
pub mod feedback;
pub mod frameworks;
pub mod llm;
pub mod models;
pub mod observability;

pub use config::NeuropromptConfig;
pub use engine::{CancellationToken, Orchestrator};
pub use feedback::FeedbackStore;
pub use frameworks::FrameworkRepository;
pub use llm::{LlmProvider, ModelAccessLayer, TextGenerator};
pub use models::{
    Critique, FailureKind, Framework, ModelSpec, PromptDraft, RunFailure, RunOutcome, RunRecord,
    RunResult, Stage,
};

/// Error type for configuration, catalog and storage operations.
///
/// Pipeline failures are reported separately as [`RunFailure`], which names
/// exactly one [`FailureKind`] and the stage it occurred in.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Bad config values, duplicate model tiers, out-of-order iterations |
/// | `OperationFailed` | I/O errors, `SQLite` failures, serialization failures |
/// | `NotFound` | Unknown framework or model requested by name |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A named entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type alias for neuroprompt operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::OperationFailed {
            operation: "append_run_record".to_string(),
            cause: "disk full".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "operation 'append_run_record' failed: disk full"
        );

        let err = Error::NotFound("framework 'XYZ'".to_string());
        assert_eq!(err.to_string(), "not found: framework 'XYZ'");
    }

    #[test]
    fn test_current_timestamp_is_positive() {
        assert!(current_timestamp() > 0);
    }
}
