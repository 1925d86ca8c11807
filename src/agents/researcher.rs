//! Researcher: picks a framework and gathers technique notes.
//!
//! Framework choice is heuristic and never fails:
//!
//! 1. a framework named in the request,
//! 2. the best accepted framework from feedback history for the same
//!    request or overlapping content tags,
//! 3. content-type votes from request keywords,
//! 4. the repository's tag-based selection (which falls back to PECRA).
//!
//! A degraded catalog skips all of the above and uses the default framework.
//!
//! Technique notes come from the model. When the chain is exhausted or the
//! reply cannot be parsed, built-in notes for the detected content types are
//! used instead and the research is flagged as degraded.

use super::prompts::{RESEARCH_FORMAT, RESEARCHER_SYSTEM, tagged};
use super::{AgentError, RoleAgent, call_model, with_correction};
use crate::frameworks::{FrameworkRepository, tag_matches, tokenize};
use crate::llm::{GenerateOptions, TextGenerator, extract_json_from_response};
use crate::models::{Framework, RequestFingerprint, RunRecord, Stage};
use serde::Deserialize;
use std::sync::Arc;

/// Content type detected from a request keyword.
struct ContentType {
    keyword: &'static str,
    tag: &'static str,
    /// Preferred frameworks, strongest first.
    frameworks: [&'static str; 2],
    technique: &'static str,
}

const CONTENT_TYPES: &[ContentType] = &[
    ContentType {
        keyword: "write",
        tag: "writing",
        frameworks: ["PECRA", "RISEN"],
        technique: "Assign a clear writer persona and state audience, tone and length up front",
    },
    ContentType {
        keyword: "generate",
        tag: "content-generation",
        frameworks: ["PECRA", "RTF"],
        technique: "Specify the output format explicitly and give one short exemplar",
    },
    ContentType {
        keyword: "create",
        tag: "creative-work",
        frameworks: ["RTF", "PECRA"],
        technique: "Iterate with focused feedback rounds instead of one exhaustive instruction",
    },
    ContentType {
        keyword: "analyze",
        tag: "analytical",
        frameworks: ["ReAct", "SCQA"],
        technique: "Ask for step-by-step reasoning before the conclusion",
    },
    ContentType {
        keyword: "explain",
        tag: "explanatory",
        frameworks: ["RISEN", "PECRA"],
        technique: "Pair each instruction with a positive and a negative example",
    },
    ContentType {
        keyword: "summarize",
        tag: "summarization",
        frameworks: ["SCQA", "ReAct"],
        technique: "Frame the summary around the situation, the complication and the key question",
    },
    ContentType {
        keyword: "creative",
        tag: "creative",
        frameworks: ["RTF", "PECRA"],
        technique: "Leave room for originality while fixing the constraints that matter",
    },
    ContentType {
        keyword: "technical",
        tag: "technical",
        frameworks: ["RISEN", "SCQA"],
        technique: "Break the task into explicit numbered steps and define domain terms",
    },
    ContentType {
        keyword: "scientific",
        tag: "scientific",
        frameworks: ["ReAct", "SCQA"],
        technique: "Use chain-of-verification: have the model check its claims before answering",
    },
    ContentType {
        keyword: "code",
        tag: "code",
        frameworks: ["ReAct", "RISEN"],
        technique: "State language, constraints and expected interfaces, and ask for tests",
    },
    ContentType {
        keyword: "business",
        tag: "business",
        frameworks: ["SCQA", "PECRA"],
        technique: "Lead with the decision the reader must make and quantify the stakes",
    },
];

/// Notes used for every request when the model cannot be consulted.
const GENERAL_TECHNIQUES: &[&str] = &[
    "Be specific about the desired format and level of detail",
    "Include clear success criteria",
    "Provide context about the target audience",
];

/// Tag recorded when no content type is detected.
const GENERAL_TAG: &str = "general";

/// Detects content-type tags from request keywords, in table order.
#[must_use]
pub fn classify_request(request: &str) -> Vec<&'static str> {
    let words = tokenize(request);
    let tags: Vec<&'static str> = CONTENT_TYPES
        .iter()
        .filter(|ct| words.iter().any(|w| tag_matches(ct.keyword, w)))
        .map(|ct| ct.tag)
        .collect();
    if tags.is_empty() {
        vec![GENERAL_TAG]
    } else {
        tags
    }
}

/// Input to the Researcher.
#[derive(Debug, Clone, Copy)]
pub struct ResearchInput<'a> {
    /// User request.
    pub request: &'a str,
    /// Framework catalog.
    pub repository: &'a FrameworkRepository,
    /// Past runs, most recent first.
    pub history: &'a [RunRecord],
    /// Corrective instruction from a failed attempt.
    pub correction: Option<&'a str>,
}

/// Research findings.
#[derive(Debug, Clone)]
pub struct Research {
    /// Recommended framework.
    pub framework: Framework,
    /// Technique notes, at most `max_techniques`.
    pub techniques: Vec<String>,
    /// Content tags detected in the request.
    pub tags: Vec<String>,
    /// Why the framework was chosen.
    pub rationale: String,
    /// True if the technique notes are built-in defaults.
    pub degraded: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TechniqueReply {
    Object {
        techniques: Vec<String>,
        #[serde(default)]
        rationale: String,
    },
    List(Vec<String>),
}

/// The Researcher agent.
pub struct Researcher {
    generator: Arc<dyn TextGenerator>,
    options: GenerateOptions,
    max_techniques: usize,
    acceptance_threshold: f64,
}

impl Researcher {
    /// Default cap on technique notes.
    pub const DEFAULT_MAX_TECHNIQUES: usize = 5;

    /// Creates a researcher.
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>, options: GenerateOptions) -> Self {
        Self {
            generator,
            options: options.with_system(RESEARCHER_SYSTEM),
            max_techniques: Self::DEFAULT_MAX_TECHNIQUES,
            acceptance_threshold: 80.0,
        }
    }

    /// Sets the cap on technique notes (at least 1).
    #[must_use]
    pub fn with_max_techniques(mut self, max: usize) -> Self {
        self.max_techniques = max.max(1);
        self
    }

    /// Sets the score a past run must reach to bias selection.
    #[must_use]
    pub const fn with_acceptance_threshold(mut self, threshold: f64) -> Self {
        self.acceptance_threshold = threshold;
        self
    }

    fn choose_framework<'r>(
        &self,
        input: &ResearchInput<'r>,
        tags: &[&str],
    ) -> (&'r Framework, String) {
        let repo = input.repository;

        if repo.is_degraded() {
            let framework = repo.default_framework();
            return (
                framework,
                format!("{} is the default while the catalog is degraded", framework.name()),
            );
        }

        if let Some(framework) = repo.find_mentioned(input.request) {
            return (framework, format!("{} named in the request", framework.name()));
        }

        if let Some(framework) = self.from_history(input, tags) {
            return (
                framework,
                format!("{} scored best on similar past requests", framework.name()),
            );
        }

        if let Some(framework) = vote(repo, tags) {
            return (
                framework,
                format!("{} fits the detected content ({})", framework.name(), tags.join(", ")),
            );
        }

        let framework = repo.select(input.request);
        (framework, format!("{} selected by catalog tags", framework.name()))
    }

    /// Best accepted framework among past runs for the same request or with
    /// overlapping content tags. Exact fingerprint matches take precedence;
    /// score ties go to the most recent run.
    fn from_history<'r>(&self, input: &ResearchInput<'r>, tags: &[&str]) -> Option<&'r Framework> {
        let fingerprint = RequestFingerprint::of(input.request);
        let specific: Vec<&str> = tags.iter().copied().filter(|t| *t != GENERAL_TAG).collect();

        let mut best: Option<(&'r Framework, bool, f64)> = None;
        for record in input
            .history
            .iter()
            .filter(|r| r.accepted_with(self.acceptance_threshold))
        {
            let Some(framework) = record
                .framework
                .as_deref()
                .and_then(|name| input.repository.get(name))
            else {
                continue;
            };
            let exact = record.fingerprint == fingerprint;
            let overlap = record.tags.iter().any(|t| specific.contains(&t.as_str()));
            if !exact && !overlap {
                continue;
            }
            let score = record.final_score.unwrap_or(0.0);
            if best.is_none_or(|(_, e, s)| (exact, score) > (e, s)) {
                best = Some((framework, exact, score));
            }
        }
        best.map(|(framework, _, _)| framework)
    }

    fn request_prompt(input: &ResearchInput<'_>, framework: &Framework, tags: &[&str]) -> String {
        let sections = framework
            .sections()
            .iter()
            .map(|s| format!("- {}: {}", s.name, s.guidance))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Recommend prompt engineering techniques for the request below.\n\n{}\n\n{}\n\n{}\n\n{}",
            tagged("request", input.request),
            tagged(
                "framework",
                &format!("{}: {}\n{sections}", framework.name(), framework.description())
            ),
            tagged("content_types", &tags.join(", ")),
            RESEARCH_FORMAT,
        );
        with_correction(prompt, input.correction)
    }

    fn parse_techniques(&self, reply: &str) -> Result<(Vec<String>, String), AgentError> {
        let parsed: TechniqueReply = serde_json::from_str(extract_json_from_response(reply))
            .map_err(|e| AgentError::ParseFailure(format!("technique notes: {e}")))?;
        let (techniques, rationale) = match parsed {
            TechniqueReply::Object {
                techniques,
                rationale,
            } => (techniques, rationale),
            TechniqueReply::List(techniques) => (techniques, String::new()),
        };
        let techniques: Vec<String> = techniques
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .take(self.max_techniques)
            .collect();
        if techniques.is_empty() {
            return Err(AgentError::ParseFailure("no technique notes".to_string()));
        }
        Ok((techniques, rationale.trim().to_string()))
    }

    fn builtin_techniques(&self, tags: &[&str]) -> Vec<String> {
        CONTENT_TYPES
            .iter()
            .filter(|ct| tags.contains(&ct.tag))
            .map(|ct| ct.technique)
            .chain(GENERAL_TECHNIQUES.iter().copied())
            .take(self.max_techniques)
            .map(str::to_string)
            .collect()
    }
}

/// Votes for frameworks present in the catalog: two points for a content
/// type's first choice, one for its second. Ties keep catalog order.
fn vote<'r>(repo: &'r FrameworkRepository, tags: &[&str]) -> Option<&'r Framework> {
    let votes_for = |name: &str| -> usize {
        CONTENT_TYPES
            .iter()
            .filter(|ct| tags.contains(&ct.tag))
            .map(|ct| {
                if ct.frameworks[0].eq_ignore_ascii_case(name) {
                    2
                } else if ct.frameworks[1].eq_ignore_ascii_case(name) {
                    1
                } else {
                    0
                }
            })
            .sum()
    };

    let mut best: Option<(&'r Framework, usize)> = None;
    for framework in repo.list_frameworks() {
        let votes = votes_for(framework.name());
        if votes > 0 && best.is_none_or(|(_, v)| votes > v) {
            best = Some((framework, votes));
        }
    }
    best.map(|(framework, _)| framework)
}

impl RoleAgent for Researcher {
    type Input<'a> = ResearchInput<'a>;
    type Output = Research;
    const STAGE: Stage = Stage::Research;

    fn invoke(&self, input: ResearchInput<'_>) -> Result<Research, AgentError> {
        let tags = classify_request(input.request);
        let (framework, reason) = self.choose_framework(&input, &tags);
        tracing::info!(framework = framework.name(), reason = %reason, "Framework chosen");

        let prompt = Self::request_prompt(&input, framework, &tags);
        let reply = call_model(self.generator.as_ref(), &prompt, &self.options)
            .and_then(|reply| self.parse_techniques(&reply));

        let (techniques, rationale, degraded) = match reply {
            Ok((techniques, rationale)) => {
                let rationale = if rationale.is_empty() { reason } else { rationale };
                (techniques, rationale, false)
            },
            Err(err @ (AgentError::ModelUnavailable(_) | AgentError::ParseFailure(_))) => {
                tracing::warn!(error = %err, "Research degraded to built-in technique notes");
                metrics::counter!("research_degraded_total").increment(1);
                (self.builtin_techniques(&tags), reason, true)
            },
            Err(err) => return Err(err),
        };

        Ok(Research {
            framework: framework.clone(),
            techniques,
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            rationale,
            degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::ScriptedGenerator;
    use crate::llm::CallFailureKind;
    use crate::models::{Critique, DraftSection, PromptDraft, RunOutcome, RunRecorder};
    use test_case::test_case;

    fn researcher(generator: ScriptedGenerator) -> Researcher {
        Researcher::new(Arc::new(generator), GenerateOptions::default())
    }

    fn input<'a>(
        request: &'a str,
        repository: &'a FrameworkRepository,
        history: &'a [RunRecord],
    ) -> ResearchInput<'a> {
        ResearchInput {
            request,
            repository,
            history,
            correction: None,
        }
    }

    fn past_run(request: &str, framework: &str, tags: &[&str], score: f64) -> RunRecord {
        let mut recorder = RunRecorder::start(request);
        recorder.set_framework(framework);
        recorder.set_tags(tags.iter().map(|t| (*t).to_string()).collect());
        let draft = PromptDraft::new(framework, vec![DraftSection::new("Role", "x")]);
        recorder
            .push_iteration(draft, Critique::new(score, vec![], vec![], ""))
            .unwrap();
        recorder.finish(RunOutcome::Accepted)
    }

    #[test_case("summarize a technical document for executives", &["summarization", "technical"])]
    #[test_case("Write some Python code", &["writing", "code"])]
    #[test_case("hello", &["general"])]
    fn test_classify_request(request: &str, expected: &[&str]) {
        assert_eq!(classify_request(request), expected);
    }

    #[test]
    fn test_keyword_votes_pick_scqa() {
        let repo = FrameworkRepository::embedded();
        let agent = researcher(ScriptedGenerator::new([
            r#"{"techniques": ["Lead with the answer"], "rationale": "exec audience"}"#,
        ]));
        let research = agent
            .invoke(input(
                "summarize a technical document for executives",
                &repo,
                &[],
            ))
            .unwrap();
        assert_eq!(research.framework.name(), "SCQA");
        assert_eq!(research.techniques, ["Lead with the answer"]);
        assert_eq!(research.rationale, "exec audience");
        assert!(!research.degraded);
    }

    #[test]
    fn test_explicit_mention_wins() {
        let repo = FrameworkRepository::embedded();
        let agent = researcher(ScriptedGenerator::new([r#"["a"]"#]));
        let research = agent
            .invoke(input("use RTF to summarize the quarterly report", &repo, &[]))
            .unwrap();
        assert_eq!(research.framework.name(), "RTF");
    }

    #[test]
    fn test_history_biases_selection() {
        let repo = FrameworkRepository::embedded();
        let history = vec![
            past_run("summarize the board minutes", "RISEN", &["summarization"], 91.0),
            past_run("summarize the sales report", "ReAct", &["summarization"], 85.0),
            past_run("unrelated", "RTF", &["creative"], 99.0),
        ];
        let agent = researcher(ScriptedGenerator::new([r#"["a"]"#]));
        let research = agent
            .invoke(input("summarize this memo", &repo, &history))
            .unwrap();
        assert_eq!(research.framework.name(), "RISEN");
    }

    #[test]
    fn test_history_below_threshold_is_ignored() {
        let repo = FrameworkRepository::embedded();
        let history = vec![past_run("summarize a memo", "RTF", &["summarization"], 40.0)];
        let agent = researcher(ScriptedGenerator::new([r#"["a"]"#]));
        let research = agent
            .invoke(input("summarize a memo", &repo, &history))
            .unwrap();
        assert_eq!(research.framework.name(), "SCQA");
    }

    #[test]
    fn test_exact_fingerprint_beats_tag_overlap() {
        let repo = FrameworkRepository::embedded();
        let history = vec![
            past_run("summarize a memo", "ReAct", &["summarization"], 82.0),
            past_run("summarize something else", "RISEN", &["summarization"], 97.0),
        ];
        let agent = researcher(ScriptedGenerator::new([r#"["a"]"#]));
        let research = agent
            .invoke(input("Summarize a  memo", &repo, &history))
            .unwrap();
        assert_eq!(research.framework.name(), "ReAct");
    }

    #[test]
    fn test_no_keywords_uses_default() {
        let repo = FrameworkRepository::embedded();
        let agent = researcher(ScriptedGenerator::new([r#"["a"]"#]));
        let research = agent.invoke(input("hello there", &repo, &[])).unwrap();
        assert_eq!(research.framework.name(), "PECRA");
        assert_eq!(research.tags, ["general"]);
    }

    #[test]
    fn test_exhausted_chain_degrades() {
        let repo = FrameworkRepository::embedded();
        let agent = researcher(ScriptedGenerator::failing(CallFailureKind::Exhausted))
            .with_max_techniques(2);
        let research = agent
            .invoke(input("summarize a business report", &repo, &[]))
            .unwrap();
        assert!(research.degraded);
        assert_eq!(research.techniques.len(), 2);
        assert!(research.techniques[0].contains("situation"));
    }

    #[test]
    fn test_unparsable_reply_degrades() {
        let repo = FrameworkRepository::embedded();
        let agent = researcher(ScriptedGenerator::new(["no json here"]));
        let research = agent.invoke(input("explain DNS", &repo, &[])).unwrap();
        assert!(research.degraded);
        assert_eq!(research.framework.name(), "RISEN");
    }

    #[test]
    fn test_auth_failure_propagates() {
        let repo = FrameworkRepository::embedded();
        let agent = researcher(ScriptedGenerator::failing(CallFailureKind::Authentication));
        let err = agent.invoke(input("explain DNS", &repo, &[])).unwrap_err();
        assert!(matches!(err, AgentError::AuthFailure(_)));
    }

    #[test]
    fn test_techniques_capped() {
        let repo = FrameworkRepository::embedded();
        let agent = researcher(ScriptedGenerator::new([r#"["a", "b", "c", " ", "d"]"#]))
            .with_max_techniques(3);
        let research = agent.invoke(input("explain DNS", &repo, &[])).unwrap();
        assert_eq!(research.techniques, ["a", "b", "c"]);
    }

    #[test]
    fn test_degraded_catalog_uses_default_framework() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = FrameworkRepository::load(dir.path());
        let history = vec![past_run(
            "summarize a technical document for executives",
            "RISEN",
            &["summarization"],
            95.0,
        )];
        let agent = researcher(ScriptedGenerator::new([r#"["a"]"#]));
        let research = agent
            .invoke(input(
                "summarize a technical document for executives",
                &repo,
                &history,
            ))
            .unwrap();
        assert_eq!(research.framework.name(), "PECRA");
        assert!(research.rationale.contains("degraded"));
    }

    #[test]
    fn test_vote_skips_frameworks_missing_from_catalog() {
        let custom = Framework::new(
            "CARE",
            vec![crate::models::FrameworkSection::new("Context", "")],
        )
        .unwrap();
        let repo = FrameworkRepository::from_frameworks(vec![custom]);
        assert!(vote(&repo, &["summarization"]).is_none());
    }
}
