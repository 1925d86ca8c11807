//! Data models for the prompt pipeline.
//!
//! Core types:
//! - [`ModelSpec`]: one backing model in the fallback chain
//! - [`Framework`]: an ordered template of prompt sections
//! - [`PromptDraft`] / [`Critique`]: the per-iteration artifacts
//! - [`RunRecord`] / [`RunResult`]: the history and outcome of one run

mod draft;
mod framework;
mod model_spec;
mod run;

pub use draft::{CriterionScore, Critique, DraftSection, Finding, PromptDraft, Severity};
pub use framework::{Framework, FrameworkSection};
pub use model_spec::{ModelSpec, ProviderKind, validate_fallback_order};
pub use run::{
    Annotation, FailureKind, Iteration, RequestFingerprint, RunFailure, RunOutcome, RunRecord,
    RunRecorder, RunResult, Stage,
};
