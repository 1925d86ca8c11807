//! Prompt drafts and critiques.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One filled section of a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSection {
    /// Section name, matching a framework section.
    pub name: String,
    /// Filled text.
    pub text: String,
}

impl DraftSection {
    /// Creates a draft section.
    #[must_use]
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// A structured prompt produced by the Generator or the Optimizer.
///
/// Drafts are never mutated: revising a draft produces a new one with the
/// next iteration number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptDraft {
    framework: String,
    sections: Vec<DraftSection>,
    full_text: String,
    iteration: u32,
}

impl PromptDraft {
    /// Creates the first draft (iteration 1).
    #[must_use]
    pub fn new(framework: impl Into<String>, sections: Vec<DraftSection>) -> Self {
        let framework = framework.into();
        let full_text = render(&framework, &sections);
        Self {
            framework,
            sections,
            full_text,
            iteration: 1,
        }
    }

    /// Produces the next draft from revised sections.
    #[must_use]
    pub fn revise(&self, sections: Vec<DraftSection>) -> Self {
        let full_text = render(&self.framework, &sections);
        Self {
            framework: self.framework.clone(),
            sections,
            full_text,
            iteration: self.iteration.saturating_add(1),
        }
    }

    /// Name of the framework the draft follows.
    #[must_use]
    pub fn framework(&self) -> &str {
        &self.framework
    }

    /// Ordered sections.
    #[must_use]
    pub fn sections(&self) -> &[DraftSection] {
        &self.sections
    }

    /// Rendered prompt text.
    #[must_use]
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// Iteration number, starting at 1.
    #[must_use]
    pub const fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Text of a section (case-insensitive name lookup).
    #[must_use]
    pub fn section_text(&self, name: &str) -> Option<&str> {
        let name = name.trim();
        self.sections
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| s.text.as_str())
    }
}

fn render(framework: &str, sections: &[DraftSection]) -> String {
    let mut out = format!("# Prompt using {framework} Framework\n");
    for section in sections {
        out.push_str("\n**");
        out.push_str(&section.name);
        out.push_str(":** ");
        out.push_str(section.text.trim());
        out.push('\n');
    }
    out
}

/// Severity of a critique finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Cosmetic.
    Low,
    /// Worth fixing.
    Medium,
    /// Blocks acceptance.
    High,
}

impl Severity {
    /// Parses a severity string, tolerating common synonyms.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" | "minor" | "info" => Some(Self::Low),
            "medium" | "moderate" | "warning" => Some(Self::Medium),
            "high" | "critical" | "major" | "severe" => Some(Self::High),
            _ => None,
        }
    }

    /// Returns the severity as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One critique finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Severity.
    pub severity: Severity,
    /// Target section, if the finding is about one section.
    pub section: Option<String>,
    /// Suggested fix.
    pub suggestion: String,
}

impl Finding {
    /// Creates a finding.
    #[must_use]
    pub fn new(severity: Severity, section: Option<&str>, suggestion: impl Into<String>) -> Self {
        Self {
            severity,
            section: section
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            suggestion: suggestion.into(),
        }
    }

    /// Key used to track a finding across iterations: the lowercased target
    /// section, or `*` for findings about the whole draft.
    #[must_use]
    pub fn target_key(&self) -> String {
        self.section
            .as_deref()
            .map_or_else(|| "*".to_string(), str::to_lowercase)
    }

    /// Returns true for high-severity findings.
    #[must_use]
    pub fn is_high(&self) -> bool {
        self.severity == Severity::High
    }
}

/// Score for one rubric criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    /// Criterion name (e.g. "clarity").
    pub name: String,
    /// Raw score on the 0–5 scale.
    pub score: f64,
    /// Normalized weight of the criterion.
    pub weight: f64,
}

/// The Critic's assessment of one draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    /// Overall score in `0.0..=100.0`.
    pub score: f64,
    /// Per-criterion breakdown (empty when the model reported only a total).
    pub criteria: Vec<CriterionScore>,
    /// Ordered findings.
    pub findings: Vec<Finding>,
    /// One-line summary.
    pub summary: String,
}

impl Critique {
    /// Creates a critique, clamping the score into `0.0..=100.0`.
    ///
    /// A non-finite score is treated as zero.
    #[must_use]
    pub fn new(
        score: f64,
        criteria: Vec<CriterionScore>,
        findings: Vec<Finding>,
        summary: impl Into<String>,
    ) -> Self {
        let score = if score.is_finite() {
            score.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            score,
            criteria,
            findings,
            summary: summary.into(),
        }
    }

    /// Iterates over the high-severity findings.
    pub fn high_severity(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_high())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sections() -> Vec<DraftSection> {
        vec![
            DraftSection::new("Situation", "A long technical report"),
            DraftSection::new("Answer", "Summarize for executives"),
        ]
    }

    #[test]
    fn test_render_full_text() {
        let draft = PromptDraft::new("SCQA", sections());
        assert!(draft.full_text().starts_with("# Prompt using SCQA Framework\n"));
        assert!(draft.full_text().contains("**Situation:** A long technical report"));
        assert_eq!(draft.iteration(), 1);
    }

    #[test]
    fn test_revise_increments_iteration_and_keeps_original() {
        let first = PromptDraft::new("SCQA", sections());
        let second = first.revise(vec![DraftSection::new("Situation", "Revised")]);
        assert_eq!(second.iteration(), 2);
        assert_eq!(second.framework(), "SCQA");
        assert_eq!(first.section_text("situation"), Some("A long technical report"));
        assert_eq!(second.section_text("Situation"), Some("Revised"));
    }

    #[test]
    fn test_critique_clamps_score() {
        assert!((Critique::new(140.0, vec![], vec![], "").score - 100.0).abs() < f64::EPSILON);
        assert!(Critique::new(-3.0, vec![], vec![], "").score.abs() < f64::EPSILON);
        assert!(Critique::new(f64::NAN, vec![], vec![], "").score.abs() < f64::EPSILON);
    }

    #[test]
    fn test_finding_target_key() {
        let f = Finding::new(Severity::High, Some(" Answer "), "be concise");
        assert_eq!(f.target_key(), "answer");
        let f = Finding::new(Severity::Low, Some(""), "overall tone");
        assert_eq!(f.section, None);
        assert_eq!(f.target_key(), "*");
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(Severity::parse("Critical"), Some(Severity::High));
        assert_eq!(Severity::parse("moderate"), Some(Severity::Medium));
        assert_eq!(Severity::parse("?"), None);
        assert!(Severity::High > Severity::Low);
    }

    #[test]
    fn test_high_severity_filter() {
        let critique = Critique::new(
            50.0,
            vec![],
            vec![
                Finding::new(Severity::High, Some("Situation"), "a"),
                Finding::new(Severity::Low, None, "b"),
                Finding::new(Severity::High, None, "c"),
            ],
            "",
        );
        assert_eq!(critique.high_severity().count(), 2);
    }
}
