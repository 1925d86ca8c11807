//! Prompt templates for the role agents.
//!
//! Each agent gets a short system prompt naming its role and a user prompt
//! assembled from the run's data. Responses are requested as JSON; the
//! parsers still accept headed text.

/// System prompt for the Researcher.
pub const RESEARCHER_SYSTEM: &str = r"<role>researcher</role>
You are an expert in prompt engineering. You know current techniques such as
compositional prompting, chain-of-verification, few-shot exemplars and
explicit output contracts, and you judge which of them fit a given request.
Answer with JSON only.";

/// System prompt for the Generator.
pub const GENERATOR_SYSTEM: &str = r"<role>generator</role>
You write prompts for language models using structured prompt frameworks.
Every framework section must be filled with concrete, request-specific text.
Never leave a section empty and never add sections the framework lacks.
Answer with JSON only.";

/// System prompt for the Critic.
pub const CRITIC_SYSTEM: &str = r"<role>critic</role>
You evaluate prompts against a weighted rubric. Score every criterion from 0
(absent) to 5 (excellent), be strict and consistent, and tie each finding to
the framework section it concerns. Answer with JSON only.";

/// System prompt for the Optimizer.
pub const OPTIMIZER_SYSTEM: &str = r"<role>optimizer</role>
You revise prompts so that they address a critique. Change the sections the
critique flags, keep what already works, and preserve the framework's section
names. Answer with JSON only.";

/// Shape the Researcher must answer in.
pub const RESEARCH_FORMAT: &str = r#"<response_format>
{"techniques": ["<one technique note per entry>"], "rationale": "<one sentence>"}
</response_format>"#;

/// Shape the Critic must answer in.
pub const CRITIQUE_FORMAT: &str = r#"<response_format>
{
  "criteria": {"<criterion>": <0-5>, ...},
  "findings": [
    {"severity": "high|medium|low", "section": "<section name or null>", "suggestion": "<fix>"}
  ],
  "summary": "<one sentence>"
}
</response_format>"#;

/// Renders the JSON shape for a sectioned answer.
pub fn sections_format(section_names: &[&str]) -> String {
    let fields = section_names
        .iter()
        .map(|name| format!("    \"{name}\": \"<text>\""))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("<response_format>\n{{\n  \"sections\": {{\n{fields}\n  }}\n}}\n</response_format>")
}

/// Wraps text in a named tag.
pub fn tagged(tag: &str, body: &str) -> String {
    format!("<{tag}>\n{}\n</{tag}>", body.trim())
}
