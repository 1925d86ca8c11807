//! Prompt framework templates.

use crate::{Error, Result};
use serde::Serialize;

/// One named section of a framework, with a short guidance string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameworkSection {
    /// Section name (e.g. "Situation").
    pub name: String,
    /// What the section should contain.
    pub guidance: String,
}

impl FrameworkSection {
    /// Creates a section.
    #[must_use]
    pub fn new(name: impl Into<String>, guidance: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            guidance: guidance.into(),
        }
    }

    /// Parses a `Name: guidance` line.
    ///
    /// A line without a colon yields a section with empty guidance. Returns
    /// `None` when the name would be empty.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim().trim_start_matches(['-', '*']).trim();
        let (name, guidance) = line.split_once(':').unwrap_or((line, ""));
        let name = name.trim().trim_matches('*').trim();
        if name.is_empty() {
            return None;
        }
        Some(Self::new(name, guidance.trim_start_matches('*').trim()))
    }
}

/// An ordered prompt template.
///
/// The section list is never empty and its order is significant: drafts
/// are rendered in section order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Framework {
    name: String,
    description: String,
    sections: Vec<FrameworkSection>,
    tags: Vec<String>,
    example: String,
}

impl Framework {
    /// Creates a framework.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the name is blank, the section list
    /// is empty, or two sections share a name.
    pub fn new(name: impl Into<String>, sections: Vec<FrameworkSection>) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidInput(
                "framework name must not be empty".to_string(),
            ));
        }
        if sections.is_empty() {
            return Err(Error::InvalidInput(format!(
                "framework '{name}' must define at least one section"
            )));
        }
        for (i, section) in sections.iter().enumerate() {
            let duplicate = sections[..i]
                .iter()
                .any(|s| s.name.eq_ignore_ascii_case(&section.name));
            if duplicate {
                return Err(Error::InvalidInput(format!(
                    "framework '{name}' repeats section '{}'",
                    section.name
                )));
            }
        }

        Ok(Self {
            name,
            description: String::new(),
            sections,
            tags: Vec::new(),
            example: String::new(),
        })
    }

    /// Builds a framework from static parts known to be valid.
    pub(crate) fn builtin(
        name: &str,
        description: &str,
        sections: &[(&str, &str)],
        tags: &[&str],
        example: &str,
    ) -> Self {
        debug_assert!(!sections.is_empty());
        Self {
            name: name.to_string(),
            description: description.to_string(),
            sections: sections
                .iter()
                .map(|(n, g)| FrameworkSection::new(*n, *g))
                .collect(),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            example: example.to_string(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the applicability tags. Tags are lowercased.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = tags
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    /// Sets the example exemplar.
    #[must_use]
    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.example = example.into();
        self
    }

    /// Framework name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Framework description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Ordered, non-empty section list.
    #[must_use]
    pub fn sections(&self) -> &[FrameworkSection] {
        &self.sections
    }

    /// Iterates over section names in order.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }

    /// Applicability tags.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Example exemplar.
    #[must_use]
    pub fn example(&self) -> &str {
        &self.example
    }

    /// Returns true if the framework has a section with this name (case-insensitive).
    #[must_use]
    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    /// Looks up a section by name (case-insensitive).
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&FrameworkSection> {
        let name = name.trim();
        self.sections
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}
