//! Run bookkeeping: fingerprints, stages, outcomes and records.

use super::{Critique, PromptDraft};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error as ThisError;

/// SHA-256 fingerprint of a normalized request.
///
/// Normalization trims, lowercases and collapses runs of whitespace, so
/// `"  Summarize  THIS "` and `"summarize this"` share a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    /// Fingerprints a request.
    #[must_use]
    pub fn of(request: &str) -> Self {
        let normalized = request
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Hex-encoded digest (64 characters).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Framework and technique selection.
    Research,
    /// First draft.
    Generate,
    /// Scoring.
    Critique,
    /// Revision.
    Optimize,
}

impl Stage {
    /// Returns the stage as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Research => "RESEARCH",
            Self::Generate => "GENERATE",
            Self::Critique => "CRITIQUE",
            Self::Optimize => "OPTIMIZE",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run-level failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Every model in the fallback chain failed or was cooling down.
    ModelUnavailable,
    /// A provider rejected the credentials.
    AuthFailure,
    /// The Generator could not populate every framework section.
    GenerationIncomplete,
    /// A model response could not be parsed into the expected shape.
    ParseFailure,
    /// No model accepts the request, or a provider permanently rejected it.
    InvalidRequest,
    /// The run was cancelled between stages.
    Cancelled,
    /// The pipeline broke one of its own invariants.
    Internal,
}

impl FailureKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ModelUnavailable => "model_unavailable",
            Self::AuthFailure => "auth_failure",
            Self::GenerationIncomplete => "generation_incomplete",
            Self::ParseFailure => "parse_failure",
            Self::InvalidRequest => "invalid_request",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-fatal conditions recorded on a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Annotation {
    /// The framework catalog failed to load; the embedded set was used.
    CatalogDegraded,
    /// The feedback store could not be read.
    FeedbackUnavailable,
    /// Technique notes came from built-in defaults instead of a model.
    ResearchDegraded,
}

impl Annotation {
    /// Returns the annotation as a label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CatalogDegraded => "catalog_degraded",
            Self::FeedbackUnavailable => "feedback_unavailable",
            Self::ResearchDegraded => "research_degraded",
        }
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// A critique cleared the acceptance threshold.
    Accepted,
    /// The iteration cap was reached; the best draft was accepted.
    ExhaustedBudget,
    /// The optimizer stopped making progress; the best draft was accepted.
    EarlyStopped,
    /// The run aborted.
    Failed {
        /// Failure kind.
        kind: FailureKind,
        /// Stage the failure occurred in.
        stage: Stage,
    },
}

impl RunOutcome {
    /// Returns true for outcomes that produce a usable prompt.
    #[must_use]
    pub const fn is_accepting(self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Returns the outcome as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::ExhaustedBudget => "exhausted_budget",
            Self::EarlyStopped => "early_stopped",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { kind, stage } => write!(f, "failed ({kind} at {stage})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// One (draft, critique) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    /// The draft that was scored.
    pub draft: PromptDraft,
    /// Its critique.
    pub critique: Critique,
}

/// The persisted history of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier (`UUIDv7`).
    pub run_id: String,
    /// Fingerprint of the normalized request.
    pub fingerprint: RequestFingerprint,
    /// Original request text.
    pub request: String,
    /// Content tags detected in the request.
    pub tags: Vec<String>,
    /// Framework chosen by the Researcher, if research completed.
    pub framework: Option<String>,
    /// Scored iterations, in order.
    pub iterations: Vec<Iteration>,
    /// Highest critique score, if any draft was scored.
    pub final_score: Option<f64>,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Non-fatal conditions.
    pub annotations: Vec<Annotation>,
    /// Finding targets left unaddressed until the run stopped early.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stalled_targets: Vec<String>,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end.
    pub completed_at: DateTime<Utc>,
}

impl RunRecord {
    /// Returns the best-scoring iteration (the latest on ties).
    #[must_use]
    pub fn best(&self) -> Option<&Iteration> {
        best_of(&self.iterations)
    }

    /// Returns true if the run was accepted with at least `threshold`.
    #[must_use]
    pub fn accepted_with(&self, threshold: f64) -> bool {
        self.outcome.is_accepting() && self.final_score.is_some_and(|s| s >= threshold)
    }

    /// Returns true if the record carries an annotation.
    #[must_use]
    pub fn has_annotation(&self, annotation: Annotation) -> bool {
        self.annotations.contains(&annotation)
    }
}

fn best_of(iterations: &[Iteration]) -> Option<&Iteration> {
    iterations.iter().fold(None, |best, it| match best {
        Some(b) if b.critique.score > it.critique.score => Some(b),
        _ => Some(it),
    })
}

/// Accumulates a run as it progresses.
///
/// Owned by the engine until [`finish`](Self::finish) turns it into an
/// immutable [`RunRecord`].
#[derive(Debug)]
pub struct RunRecorder {
    run_id: String,
    fingerprint: RequestFingerprint,
    request: String,
    tags: Vec<String>,
    framework: Option<String>,
    iterations: Vec<Iteration>,
    annotations: Vec<Annotation>,
    stalled_targets: Vec<String>,
    started_at: DateTime<Utc>,
}

impl RunRecorder {
    /// Starts recording a run for `request`.
    #[must_use]
    pub fn start(request: &str) -> Self {
        Self {
            run_id: uuid::Uuid::now_v7().to_string(),
            fingerprint: RequestFingerprint::of(request),
            request: request.to_string(),
            tags: Vec::new(),
            framework: None,
            iterations: Vec::new(),
            annotations: Vec::new(),
            stalled_targets: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Run identifier.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Request fingerprint.
    #[must_use]
    pub const fn fingerprint(&self) -> &RequestFingerprint {
        &self.fingerprint
    }

    /// Records the detected content tags.
    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.tags = tags;
    }

    /// Records the chosen framework.
    pub fn set_framework(&mut self, framework: &str) {
        self.framework = Some(framework.to_string());
    }

    /// Adds an annotation once.
    pub fn annotate(&mut self, annotation: Annotation) {
        if !self.annotations.contains(&annotation) {
            self.annotations.push(annotation);
        }
    }

    /// Records the finding targets that stopped the run early.
    pub fn set_stalled_targets(&mut self, targets: Vec<String>) {
        self.stalled_targets = targets;
    }

    /// Annotations recorded so far.
    #[must_use]
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Appends a scored iteration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] unless the draft's iteration number is
    /// 1 for the first pair and strictly greater than the previous one after.
    pub fn push_iteration(&mut self, draft: PromptDraft, critique: Critique) -> Result<()> {
        let expected_min = self
            .iterations
            .last()
            .map_or(1, |last| last.draft.iteration().saturating_add(1));
        let valid = if self.iterations.is_empty() {
            draft.iteration() == 1
        } else {
            draft.iteration() >= expected_min
        };
        if !valid {
            return Err(Error::InvalidInput(format!(
                "iteration {} out of order (expected at least {expected_min})",
                draft.iteration()
            )));
        }
        self.iterations.push(Iteration { draft, critique });
        Ok(())
    }

    /// Scored iterations so far.
    #[must_use]
    pub fn iterations(&self) -> &[Iteration] {
        &self.iterations
    }

    /// Best-scoring iteration so far (the latest on ties).
    #[must_use]
    pub fn best(&self) -> Option<&Iteration> {
        best_of(&self.iterations)
    }

    /// Closes the run.
    #[must_use]
    pub fn finish(self, outcome: RunOutcome) -> RunRecord {
        let final_score = self.best().map(|it| it.critique.score);
        RunRecord {
            run_id: self.run_id,
            fingerprint: self.fingerprint,
            request: self.request,
            tags: self.tags,
            framework: self.framework,
            iterations: self.iterations,
            final_score,
            outcome,
            annotations: self.annotations,
            stalled_targets: self.stalled_targets,
            started_at: self.started_at,
            completed_at: Utc::now(),
        }
    }
}

/// Result of a run that produced a usable prompt.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Run identifier.
    pub run_id: String,
    /// Final prompt text.
    pub prompt: String,
    /// The accepted draft.
    pub draft: PromptDraft,
    /// Framework used.
    pub framework: String,
    /// Number of scored iterations.
    pub iterations: usize,
    /// Score of the accepted draft.
    pub final_score: f64,
    /// Accepting outcome.
    pub outcome: RunOutcome,
    /// Non-fatal conditions.
    pub annotations: Vec<Annotation>,
    /// Technique notes from research.
    pub techniques: Vec<String>,
}

impl RunResult {
    /// Returns true if the result carries an annotation.
    #[must_use]
    pub fn has_annotation(&self, annotation: Annotation) -> bool {
        self.annotations.contains(&annotation)
    }
}

/// A structured run failure naming exactly one kind and the stage.
#[derive(Debug, Clone, ThisError, Serialize)]
#[error("{kind} at {stage}: {message}")]
pub struct RunFailure {
    /// Failure kind.
    pub kind: FailureKind,
    /// Stage the failure occurred in.
    pub stage: Stage,
    /// Human-readable detail.
    pub message: String,
    /// Run identifier.
    pub run_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DraftSection;

    fn draft() -> PromptDraft {
        PromptDraft::new("SCQA", vec![DraftSection::new("Situation", "x")])
    }

    fn critique(score: f64) -> Critique {
        Critique::new(score, vec![], vec![], "")
    }

    #[test]
    fn test_fingerprint_normalizes() {
        let a = RequestFingerprint::of("  Summarize  THIS\tdoc ");
        let b = RequestFingerprint::of("summarize this doc");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_ne!(a, RequestFingerprint::of("summarize that doc"));
    }

    #[test]
    fn test_push_iteration_requires_start_at_one() {
        let mut rec = RunRecorder::start("req");
        let second = draft().revise(vec![DraftSection::new("Situation", "y")]);
        assert!(rec.push_iteration(second, critique(10.0)).is_err());
    }

    #[test]
    fn test_push_iteration_rejects_repeat() {
        let mut rec = RunRecorder::start("req");
        rec.push_iteration(draft(), critique(10.0)).unwrap();
        assert!(rec.push_iteration(draft(), critique(20.0)).is_err());
    }

    #[test]
    fn test_final_score_is_max_and_best_prefers_latest_on_tie() {
        let mut rec = RunRecorder::start("req");
        let first = draft();
        let second = first.revise(vec![DraftSection::new("Situation", "y")]);
        let third = second.revise(vec![DraftSection::new("Situation", "z")]);
        rec.push_iteration(first, critique(70.0)).unwrap();
        rec.push_iteration(second, critique(70.0)).unwrap();
        rec.push_iteration(third, critique(40.0)).unwrap();

        let record = rec.finish(RunOutcome::ExhaustedBudget);
        assert_eq!(record.final_score, Some(70.0));
        assert_eq!(record.best().unwrap().draft.iteration(), 2);
    }

    #[test]
    fn test_annotate_is_idempotent() {
        let mut rec = RunRecorder::start("req");
        rec.annotate(Annotation::CatalogDegraded);
        rec.annotate(Annotation::CatalogDegraded);
        assert_eq!(rec.annotations(), [Annotation::CatalogDegraded]);
    }

    #[test]
    fn test_run_id_is_uuid_v7() {
        let rec = RunRecorder::start("req");
        let parsed = uuid::Uuid::parse_str(rec.run_id()).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
    }

    #[test]
    fn test_outcome_display() {
        let failed = RunOutcome::Failed {
            kind: FailureKind::ModelUnavailable,
            stage: Stage::Generate,
        };
        assert_eq!(failed.to_string(), "failed (model_unavailable at GENERATE)");
        assert!(!failed.is_accepting());
        assert!(RunOutcome::EarlyStopped.is_accepting());
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let mut rec = RunRecorder::start("req");
        rec.set_framework("SCQA");
        rec.push_iteration(draft(), critique(88.0)).unwrap();
        let record = rec.finish(RunOutcome::Accepted);
        let json = serde_json::to_string(&record).unwrap();
        let back: RunRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        assert!(back.accepted_with(80.0));
    }
}
