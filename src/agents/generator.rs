//! Generator: drafts the first structured prompt.

use super::parse::{is_placeholder, parse_sections};
use super::prompts::{GENERATOR_SYSTEM, sections_format, tagged};
use super::{AgentError, RoleAgent, call_model, with_correction};
use crate::llm::{GenerateOptions, TextGenerator};
use crate::models::{Framework, PromptDraft, Stage};
use std::sync::Arc;

/// Input to the Generator.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorInput<'a> {
    /// User request.
    pub request: &'a str,
    /// Framework to fill.
    pub framework: &'a Framework,
    /// Technique notes from research.
    pub techniques: &'a [String],
    /// Corrective instruction from a failed attempt.
    pub correction: Option<&'a str>,
}

/// The Generator agent.
pub struct Generator {
    generator: Arc<dyn TextGenerator>,
    options: GenerateOptions,
}

impl Generator {
    /// Creates a generator.
    #[must_use]
    pub fn new(generator: Arc<dyn TextGenerator>, options: GenerateOptions) -> Self {
        Self {
            generator,
            options: options.with_system(GENERATOR_SYSTEM),
        }
    }

    fn build_prompt(input: &GeneratorInput<'_>) -> String {
        let framework = input.framework;
        let names: Vec<&str> = framework.section_names().collect();
        let sections = framework
            .sections()
            .iter()
            .map(|s| format!("- {}: {}", s.name, s.guidance))
            .collect::<Vec<_>>()
            .join("\n");

        let mut prompt = format!(
            "Write a prompt for the request below using the {} framework ({}).\n\n{}\n\n{}",
            framework.name(),
            framework.description(),
            tagged("request", input.request),
            tagged("sections", &sections),
        );
        if !framework.example().is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&tagged("example", framework.example()));
        }
        if !input.techniques.is_empty() {
            let notes = input
                .techniques
                .iter()
                .map(|t| format!("- {t}"))
                .collect::<Vec<_>>()
                .join("\n");
            prompt.push_str("\n\n");
            prompt.push_str(&tagged("techniques", &notes));
        }
        prompt.push_str("\n\n");
        prompt.push_str(&sections_format(&names));
        with_correction(prompt, input.correction)
    }
}

impl RoleAgent for Generator {
    type Input<'a> = GeneratorInput<'a>;
    type Output = PromptDraft;
    const STAGE: Stage = Stage::Generate;

    fn invoke(&self, input: GeneratorInput<'_>) -> Result<PromptDraft, AgentError> {
        let names: Vec<&str> = input.framework.section_names().collect();
        let reply = call_model(self.generator.as_ref(), &Self::build_prompt(&input), &self.options)?;
        let sections = parse_sections(&reply, &names);

        let missing: Vec<String> = names
            .iter()
            .filter(|name| {
                !sections
                    .iter()
                    .any(|s| s.name == **name && !is_placeholder(&s.text))
            })
            .map(|name| (*name).to_string())
            .collect();
        if !missing.is_empty() {
            tracing::warn!(
                framework = input.framework.name(),
                missing = %missing.join(", "),
                "Draft is missing sections"
            );
            return Err(AgentError::GenerationIncomplete { missing });
        }

        Ok(PromptDraft::new(input.framework.name(), sections))
    }
}
