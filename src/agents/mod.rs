//! Role agents.
//!
//! Four single-purpose transformations share one capability trait,
//! [`RoleAgent`]:
//!
//! | Agent | Input | Output |
//! |-------|-------|--------|
//! | [`Researcher`] | request, catalog, history | framework + technique notes |
//! | [`Generator`] | request, framework, techniques | first [`PromptDraft`] |
//! | [`Critic`] | draft | [`Critique`] |
//! | [`Optimizer`] | draft, critique, history | revised draft |
//!
//! Agents are stateless between invocations and reach models only through
//! a [`TextGenerator`], so tests can script every response.
//!
//! [`PromptDraft`]: crate::models::PromptDraft
//! [`Critique`]: crate::models::Critique

mod critic;
mod generator;
mod optimizer;
mod parse;
mod prompts;
mod researcher;
mod rubric;

pub use critic::{Critic, CriticInput};
pub use generator::{Generator, GeneratorInput};
pub use optimizer::{Optimizer, OptimizerInput, Revision};
pub use parse::{is_placeholder, parse_sections};
pub use researcher::{Research, ResearchInput, Researcher, classify_request};
pub use rubric::{Criterion, Rubric};

use crate::llm::{CallFailureKind, GenerateOptions, ModelCallResult, TextGenerator};
use crate::models::{FailureKind, Stage};
use thiserror::Error as ThisError;

/// Capability shared by every role agent.
pub trait RoleAgent: Send + Sync {
    /// Borrowed input for one invocation.
    type Input<'a>;
    /// Produced value.
    type Output;
    /// Pipeline stage the agent runs in.
    const STAGE: Stage;

    /// Runs the agent once.
    ///
    /// # Errors
    ///
    /// Returns an [`AgentError`] naming the run-level failure kind.
    fn invoke(&self, input: Self::Input<'_>) -> Result<Self::Output, AgentError>;
}

/// Failure of one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum AgentError {
    /// The fallback chain was exhausted.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// A provider rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// The request cannot be served by any model.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The model left framework sections missing or blank.
    #[error("generation incomplete, missing sections: {}", missing.join(", "))]
    GenerationIncomplete {
        /// Missing section names, in framework order.
        missing: Vec<String>,
    },

    /// The model response did not have the expected shape.
    #[error("could not parse model response: {0}")]
    ParseFailure(String),

    /// The pipeline broke one of its own invariants.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Maps the error onto the run-level taxonomy.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::ModelUnavailable(_) => FailureKind::ModelUnavailable,
            Self::AuthFailure(_) => FailureKind::AuthFailure,
            Self::InvalidRequest(_) => FailureKind::InvalidRequest,
            Self::GenerationIncomplete { .. } => FailureKind::GenerationIncomplete,
            Self::ParseFailure(_) => FailureKind::ParseFailure,
            Self::Internal(_) => FailureKind::Internal,
        }
    }

    /// Returns true if the stage may be attempted once more.
    ///
    /// Only content problems qualify; model availability has already been
    /// handled by the fallback chain.
    #[must_use]
    pub const fn is_stage_retriable(&self) -> bool {
        matches!(
            self,
            Self::GenerationIncomplete { .. } | Self::ParseFailure(_)
        )
    }

    /// Instruction appended to the re-attempt prompt.
    #[must_use]
    pub fn corrective_instruction(&self) -> String {
        match self {
            Self::GenerationIncomplete { missing } => format!(
                "Your previous answer left these sections missing or empty: {}. \
                 Fill in every section with concrete text.",
                missing.join(", ")
            ),
            Self::ParseFailure(reason) => format!(
                "Your previous answer could not be parsed ({reason}). \
                 Respond with a single JSON object in exactly the requested shape and nothing else."
            ),
            other => format!("Your previous attempt failed: {other}."),
        }
    }
}

/// Calls the model and maps failures onto [`AgentError`].
pub(crate) fn call_model(
    generator: &dyn TextGenerator,
    prompt: &str,
    options: &GenerateOptions,
) -> Result<String, AgentError> {
    match generator.generate(prompt, options) {
        ModelCallResult::Success {
            text, model_used, ..
        } => {
            tracing::debug!(model = %model_used, chars = text.len(), "Model answered");
            Ok(text)
        },
        ModelCallResult::Failure { kind, message, .. } => Err(match kind {
            CallFailureKind::Authentication => AgentError::AuthFailure(message),
            CallFailureKind::InvalidRequest => AgentError::InvalidRequest(message),
            _ => AgentError::ModelUnavailable(message),
        }),
    }
}

/// Appends a corrective instruction from a failed attempt, if any.
pub(crate) fn with_correction(prompt: String, correction: Option<&str>) -> String {
    match correction {
        Some(correction) if !correction.trim().is_empty() => {
            format!("{prompt}\n\n<correction>\n{}\n</correction>", correction.trim())
        },
        _ => prompt,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedGenerator;
    use super::*;

    #[test]
    fn test_call_model_maps_failures() {
        let options = GenerateOptions::default();
        let auth = ScriptedGenerator::failing(CallFailureKind::Authentication);
        assert!(matches!(
            call_model(&auth, "p", &options),
            Err(AgentError::AuthFailure(_))
        ));

        let invalid = ScriptedGenerator::failing(CallFailureKind::InvalidRequest);
        assert!(matches!(
            call_model(&invalid, "p", &options),
            Err(AgentError::InvalidRequest(_))
        ));

        let exhausted = ScriptedGenerator::failing(CallFailureKind::Exhausted);
        let err = call_model(&exhausted, "p", &options).unwrap_err();
        assert_eq!(err.kind(), FailureKind::ModelUnavailable);
        assert!(!err.is_stage_retriable());
    }

    #[test]
    fn test_stage_retriable_kinds() {
        assert!(AgentError::ParseFailure("x".into()).is_stage_retriable());
        assert!(
            AgentError::GenerationIncomplete {
                missing: vec!["Answer".into()]
            }
            .is_stage_retriable()
        );
        assert!(!AgentError::AuthFailure("x".into()).is_stage_retriable());
    }

    #[test]
    fn test_corrective_instruction_names_sections() {
        let err = AgentError::GenerationIncomplete {
            missing: vec!["Question".into(), "Answer".into()],
        };
        let text = err.corrective_instruction();
        assert!(text.contains("Question, Answer"));
    }

    #[test]
    fn test_with_correction() {
        assert_eq!(with_correction("base".into(), None), "base");
        assert_eq!(with_correction("base".into(), Some("  ")), "base");
        let out = with_correction("base".into(), Some("fix it"));
        assert!(out.starts_with("base"));
        assert!(out.contains("<correction>\nfix it\n</correction>"));
    }
}
