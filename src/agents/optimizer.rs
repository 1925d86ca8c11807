//! Optimizer: revises a draft to address its critique.
//!
//! Feedback history steers the edit policy:
//!
//! - the best accepted past draft for the same request is offered as an
//!   exemplar,
//! - sections that drew high-severity findings in several past runs of the
//!   same framework are emphasized,
//! - the sampling temperature drops when past runs of the framework
//!   improved steadily and rises when they stalled.

use super::parse::{is_placeholder, parse_sections};
use super::prompts::{OPTIMIZER_SYSTEM, sections_format, tagged};
use super::{AgentError, RoleAgent, call_model, with_correction};
use crate::llm::{GenerateOptions, TextGenerator};
use crate::models::{
    Critique, DraftSection, Finding, PromptDraft, RequestFingerprint, RunRecord, Stage,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Average improvement (score points) at which a framework counts as converging.
const CONVERGED_IMPROVEMENT: f64 = 15.0;
/// Average improvement below which a framework counts as stalled.
const STALLED_IMPROVEMENT: f64 = 5.0;
const CONVERGED_TEMPERATURE: f32 = 0.5;
const STALLED_TEMPERATURE: f32 = 0.9;
/// Past runs a section must be flagged in before it is emphasized.
const RECURRING_FLAGS: usize = 2;

/// Input to the Optimizer.
#[derive(Debug, Clone, Copy)]
pub struct OptimizerInput<'a> {
    /// Draft to revise.
    pub draft: &'a PromptDraft,
    /// Its critique.
    pub critique: &'a Critique,
    /// The request the draft serves.
    pub request: &'a str,
    /// Past runs, most recent first.
    pub history: &'a [RunRecord],
    /// Corrective instruction from a failed attempt.
    pub correction: Option<&'a str>,
}

/// A revised draft.
#[derive(Debug, Clone)]
pub struct Revision {
    /// The new draft (iteration + 1).
    pub draft: PromptDraft,
    /// High-severity findings whose target section was left unchanged.
    pub unaddressed: Vec<Finding>,
}

/// The Optimizer agent.
pub struct Optimizer {
    generator: Arc<dyn TextGenerator>,
    options: GenerateOptions,
}

impl Optimizer {
    /// Creates an optimizer.
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>, options: GenerateOptions) -> Self {
        Self {
            generator,
            options: options.with_system(OPTIMIZER_SYSTEM),
        }
    }

    /// Sampling temperature for a framework given past runs.
    #[must_use]
    pub fn temperature_for(&self, framework: &str, history: &[RunRecord]) -> f32 {
        let improvements: Vec<f64> = history
            .iter()
            .filter(|r| r.framework.as_deref() == Some(framework))
            .filter_map(|r| {
                let first = r.iterations.first()?.critique.score;
                let best = r.best()?.critique.score;
                (r.iterations.len() > 1).then_some(best - first)
            })
            .collect();
        if improvements.is_empty() {
            return self.options.temperature;
        }

        #[allow(clippy::cast_precision_loss)]
        let average = improvements.iter().sum::<f64>() / improvements.len() as f64;
        if average >= CONVERGED_IMPROVEMENT {
            CONVERGED_TEMPERATURE
        } else if average < STALLED_IMPROVEMENT {
            STALLED_TEMPERATURE
        } else {
            self.options.temperature
        }
    }

    fn build_prompt(input: &OptimizerInput<'_>) -> String {
        let draft = input.draft;
        let names: Vec<&str> = draft.sections().iter().map(|s| s.name.as_str()).collect();
        let findings = input
            .critique
            .findings
            .iter()
            .map(|f| {
                format!(
                    "- [{}] {}: {}",
                    f.severity,
                    f.section.as_deref().unwrap_or("whole prompt"),
                    f.suggestion
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut prompt = format!(
            "Revise the prompt below so it addresses the critique. It scored {:.0}/100.\n\n{}\n\n{}\n\n{}",
            input.critique.score,
            tagged("request", input.request),
            tagged("prompt", draft.full_text()),
            tagged(
                "critique",
                &format!("{}\n{findings}", input.critique.summary)
            ),
        );

        let recurring = recurring_weak_sections(draft.framework(), input.history);
        if !recurring.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&tagged(
                "recurring_weaknesses",
                &format!(
                    "Past prompts of this framework were repeatedly weak in: {}. Give these sections extra care.",
                    recurring.join(", ")
                ),
            ));
        }
        if let Some(exemplar) = exemplar(input.request, draft.framework(), input.history) {
            prompt.push_str("\n\n");
            prompt.push_str(&tagged("accepted_example", exemplar.full_text()));
        }

        prompt.push_str("\n\n");
        prompt.push_str(&sections_format(&names));
        with_correction(prompt, input.correction)
    }
}

/// The best draft from an accepted past run of the same request and framework.
fn exemplar<'h>(request: &str, framework: &str, history: &'h [RunRecord]) -> Option<&'h PromptDraft> {
    let fingerprint = RequestFingerprint::of(request);
    let mut best: Option<(&'h PromptDraft, f64)> = None;
    for record in history.iter().filter(|r| {
        r.outcome.is_accepting()
            && r.fingerprint == fingerprint
            && r.framework.as_deref() == Some(framework)
    }) {
        if let Some(it) = record.best()
            && best.is_none_or(|(_, score)| it.critique.score > score)
        {
            best = Some((&it.draft, it.critique.score));
        }
    }
    best.map(|(draft, _)| draft)
}

/// Sections flagged high-severity in at least [`RECURRING_FLAGS`] past runs
/// of the framework, most flagged first.
fn recurring_weak_sections(framework: &str, history: &[RunRecord]) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in history
        .iter()
        .filter(|r| r.framework.as_deref() == Some(framework))
    {
        let mut flagged: Vec<&str> = record
            .iterations
            .iter()
            .flat_map(|it| it.critique.high_severity())
            .filter_map(|f| f.section.as_deref())
            .collect();
        flagged.sort_unstable();
        flagged.dedup();
        for section in flagged {
            *counts.entry(section.to_string()).or_default() += 1;
        }
    }

    let mut recurring: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, n)| *n >= RECURRING_FLAGS)
        .collect();
    recurring.sort_by(|a, b| b.1.cmp(&a.1));
    recurring.into_iter().map(|(name, _)| name).collect()
}

/// High-severity findings the revision did not act on.
///
/// A finding about a section is unaddressed when that section's text is
/// unchanged; a finding about the whole prompt is unaddressed when no
/// section changed.
fn unaddressed_findings(critique: &Critique, before: &PromptDraft, after: &PromptDraft) -> Vec<Finding> {
    let unchanged = |name: &str| {
        before.section_text(name).map(str::trim) == after.section_text(name).map(str::trim)
    };
    let nothing_changed = before
        .sections()
        .iter()
        .all(|s| unchanged(s.name.as_str()));

    critique
        .high_severity()
        .filter(|f| match f.section.as_deref() {
            Some(section) => before.section_text(section).is_some() && unchanged(section),
            None => nothing_changed,
        })
        .cloned()
        .collect()
}

impl RoleAgent for Optimizer {
    type Input<'a> = OptimizerInput<'a>;
    type Output = Revision;
    const STAGE: Stage = Stage::Optimize;

    fn invoke(&self, input: OptimizerInput<'_>) -> Result<Revision, AgentError> {
        let draft = input.draft;
        let names: Vec<&str> = draft.sections().iter().map(|s| s.name.as_str()).collect();

        let temperature = self.temperature_for(draft.framework(), input.history);
        let options = self.options.clone().with_temperature(temperature);
        let reply = call_model(self.generator.as_ref(), &Self::build_prompt(&input), &options)?;

        let revised = parse_sections(&reply, &names);
        if revised.is_empty() {
            return Err(AgentError::ParseFailure(
                "revision contains no framework sections".to_string(),
            ));
        }

        // Omitted or placeholder sections carry over unchanged.
        let sections: Vec<DraftSection> = draft
            .sections()
            .iter()
            .map(|old| {
                revised
                    .iter()
                    .find(|s| s.name == old.name && !is_placeholder(&s.text))
                    .cloned()
                    .unwrap_or_else(|| old.clone())
            })
            .collect();
        let next = draft.revise(sections);
        let unaddressed = unaddressed_findings(input.critique, draft, &next);

        tracing::info!(
            iteration = next.iteration(),
            temperature,
            unaddressed = unaddressed.len(),
            "Draft revised"
        );
        Ok(Revision {
            draft: next,
            unaddressed,
        })
    }
}
