//! Critic: scores a draft against the rubric.
//!
//! Parsing is deterministic: the same reply always yields the same
//! [`Critique`]. A reply without per-criterion scores or an overall score
//! is a [`AgentError::ParseFailure`].

use super::prompts::{CRITIC_SYSTEM, CRITIQUE_FORMAT, tagged};
use super::rubric::Rubric;
use super::{AgentError, RoleAgent, call_model, with_correction};
use crate::llm::{GenerateOptions, TextGenerator, extract_json_from_response};
use crate::models::{Critique, Finding, PromptDraft, Severity, Stage};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sampling temperature for critiques.
const CRITIC_TEMPERATURE: f32 = 0.2;

/// Input to the Critic.
#[derive(Debug, Clone, Copy)]
pub struct CriticInput<'a> {
    /// Draft to score.
    pub draft: &'a PromptDraft,
    /// The request the draft serves.
    pub request: &'a str,
    /// Corrective instruction from a failed attempt.
    pub correction: Option<&'a str>,
}

/// The Critic agent.
pub struct Critic {
    generator: Arc<dyn TextGenerator>,
    options: GenerateOptions,
    rubric: Rubric,
}

impl Critic {
    /// Creates a critic using the default rubric.
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>, options: GenerateOptions) -> Self {
        Self {
            generator,
            options: options
                .with_temperature(CRITIC_TEMPERATURE)
                .with_system(CRITIC_SYSTEM),
            rubric: Rubric::default(),
        }
    }

    /// Replaces the rubric.
    #[must_use]
    pub fn with_rubric(mut self, rubric: Rubric) -> Self {
        self.rubric = rubric;
        self
    }

    /// The rubric in use.
    #[must_use]
    pub const fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    fn build_prompt(&self, input: &CriticInput<'_>) -> String {
        let sections = input
            .draft
            .sections()
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = format!(
            "Evaluate the prompt below, written with the {} framework (sections: {sections}).\n\n{}\n\n{}\n\n{}\n\n{}",
            input.draft.framework(),
            tagged("request", input.request),
            tagged("prompt", input.draft.full_text()),
            tagged("rubric", &self.rubric.render()),
            CRITIQUE_FORMAT,
        );
        with_correction(prompt, input.correction)
    }

    /// Turns a model reply into a critique.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ParseFailure`] if the reply is not a JSON object
    /// carrying every rubric criterion or an overall `score`.
    pub fn parse_critique(&self, reply: &str, draft: &PromptDraft) -> Result<Critique, AgentError> {
        let value: Value = serde_json::from_str(extract_json_from_response(reply))
            .map_err(|e| AgentError::ParseFailure(format!("critique is not JSON: {e}")))?;
        let Value::Object(object) = value else {
            return Err(AgentError::ParseFailure(
                "critique is not a JSON object".to_string(),
            ));
        };

        let raw: BTreeMap<String, f64> = object
            .get("criteria")
            .and_then(Value::as_object)
            .map(|criteria| {
                criteria
                    .iter()
                    .filter_map(|(name, v)| number(v).map(|n| (name.clone(), n)))
                    .collect()
            })
            .unwrap_or_default();

        let (score, criteria) = match self.rubric.breakdown(&raw) {
            Ok(criteria) => (Rubric::score(&criteria), criteria),
            Err(missing) => match object.get("score").and_then(number) {
                Some(score) => (score, Vec::new()),
                None => {
                    return Err(AgentError::ParseFailure(format!(
                        "critique lacks a score and criteria: {}",
                        missing.join(", ")
                    )));
                },
            },
        };

        let findings = object
            .get("findings")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|item| finding(item, draft)).collect())
            .unwrap_or_default();
        let summary = object
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok(Critique::new(score, criteria, findings, summary))
    }
}

/// Reads a finite number, a numeric string, or an object with a numeric
/// `score`.
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(o) => o.get("score").and_then(number),
        _ => None,
    };
    n.filter(|v| v.is_finite())
}

/// Reads one finding. Unknown severities count as medium; the target
/// section is mapped onto the draft's canonical section name when it
/// matches one.
fn finding(item: &Value, draft: &PromptDraft) -> Option<Finding> {
    if let Some(text) = item.as_str() {
        let text = text.trim();
        return (!text.is_empty()).then(|| Finding::new(Severity::Medium, None, text));
    }
    let suggestion = ["suggestion", "issue", "text"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    let severity = item
        .get("severity")
        .and_then(Value::as_str)
        .and_then(Severity::parse)
        .unwrap_or(Severity::Medium);
    let section = item.get("section").and_then(Value::as_str).map(|name| {
        let name = name.trim().trim_matches('*').trim();
        draft
            .sections()
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map_or(name, |s| s.name.as_str())
    });
    Some(Finding::new(severity, section, suggestion))
}

impl RoleAgent for Critic {
    type Input<'a> = CriticInput<'a>;
    type Output = Critique;
    const STAGE: Stage = Stage::Critique;

    fn invoke(&self, input: CriticInput<'_>) -> Result<Critique, AgentError> {
        let reply = call_model(self.generator.as_ref(), &self.build_prompt(&input), &self.options)?;
        let critique = self.parse_critique(&reply, input.draft)?;
        tracing::info!(
            iteration = input.draft.iteration(),
            score = critique.score,
            findings = critique.findings.len(),
            high = critique.high_severity().count(),
            "Draft critiqued"
        );
        Ok(critique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::ScriptedGenerator;
    use crate::models::DraftSection;

    fn draft() -> PromptDraft {
        PromptDraft::new(
            "SCQA",
            vec![
                DraftSection::new("Situation", "s"),
                DraftSection::new("Complication", "c"),
                DraftSection::new("Question", "q"),
                DraftSection::new("Answer", "a"),
            ],
        )
    }

    fn critic() -> Critic {
        Critic::new(Arc::new(ScriptedGenerator::new(Vec::<String>::new())), GenerateOptions::default())
    }

    #[test]
    fn test_parse_criteria() {
        let reply = r#"{
            "criteria": {"clarity": 4, "specificity": 3, "context": 2,
                         "structure": 5, "completeness": 1, "effectiveness": 0},
            "findings": [{"severity": "high", "section": "complication", "suggestion": "Quantify it"}],
            "summary": "Needs numbers"
        }"#;
        let critique = critic().parse_critique(reply, &draft()).unwrap();
        assert!((critique.score - 56.0).abs() < 1e-9);
        assert_eq!(critique.criteria.len(), 6);
        assert_eq!(critique.findings[0].section.as_deref(), Some("Complication"));
        assert!(critique.findings[0].is_high());
        assert_eq!(critique.summary, "Needs numbers");
    }

    #[test]
    fn test_parse_overall_score() {
        let reply = r#"Here you go: {"score": "55", "findings": ["Add an audience"]}"#;
        let critique = critic().parse_critique(reply, &draft()).unwrap();
        assert!((critique.score - 55.0).abs() < f64::EPSILON);
        assert!(critique.criteria.is_empty());
        assert_eq!(critique.findings[0].severity, Severity::Medium);
        assert!(critique.findings[0].section.is_none());
    }

    #[test]
    fn test_non_finite_score_is_parse_failure() {
        for score in ["NaN", "inf", "-Infinity"] {
            let reply = format!(r#"{{"score": "{score}", "findings": []}}"#);
            let err = critic().parse_critique(&reply, &draft()).unwrap_err();
            assert!(matches!(err, AgentError::ParseFailure(_)), "{score}");
        }
    }

    #[test]
    fn test_parse_is_deterministic() {
        let reply = r#"{"score": 70, "findings": [
            {"severity": "critical", "section": "Answer", "suggestion": "x"},
            {"severity": "whatever", "suggestion": "y"},
            {"severity": "low"}
        ]}"#;
        let c = critic();
        let a = c.parse_critique(reply, &draft()).unwrap();
        let b = c.parse_critique(reply, &draft()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.findings.len(), 2);
        assert_eq!(a.findings[0].severity, Severity::High);
        assert_eq!(a.findings[1].severity, Severity::Medium);
    }

    #[test]
    fn test_score_is_clamped() {
        let critique = critic()
            .parse_critique(r#"{"score": 140}"#, &draft())
            .unwrap();
        assert!((critique.score - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_failures() {
        let c = critic();
        assert!(matches!(
            c.parse_critique("looks fine to me", &draft()),
            Err(AgentError::ParseFailure(_))
        ));
        assert!(matches!(
            c.parse_critique("[1, 2]", &draft()),
            Err(AgentError::ParseFailure(_))
        ));
        assert!(matches!(
            c.parse_critique(r#"{"criteria": {"clarity": 3}}"#, &draft()),
            Err(AgentError::ParseFailure(_))
        ));
    }

    #[test]
    fn test_invoke_sends_rubric() {
        let generator = Arc::new(ScriptedGenerator::new([r#"{"score": 88}"#]));
        let critic = Critic::new(generator.clone(), GenerateOptions::default());
        let d = draft();
        let critique = critic
            .invoke(CriticInput {
                draft: &d,
                request: "r",
                correction: None,
            })
            .unwrap();
        assert!((critique.score - 88.0).abs() < f64::EPSILON);
        let prompts = generator.prompts();
        let (prompt, temperature) = &prompts[0];
        assert!(prompt.contains("- clarity (weight 0.25)"));
        assert!((temperature - CRITIC_TEMPERATURE).abs() < f32::EPSILON);
    }
}
