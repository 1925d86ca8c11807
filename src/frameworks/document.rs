//! Framework document parsing.
//!
//! Three formats are accepted:
//!
//! - Markdown: `# Title`, then `## Description`, `## Structure` (bullets of
//!   `Name: guidance`), `## Best For`, optional `## Tags`, `## Example`.
//! - YAML (`.yaml` / `.yml`) and JSON (`.json`) with fields `name`,
//!   `description`, `sections`, `tags` (or `best_for`), `example`.
//!
//! Missing optional fields are tolerated. A document without at least one
//! named section is invalid.

use crate::models::{Framework, FrameworkSection};
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Markdown.
    Markdown,
    /// YAML.
    Yaml,
    /// JSON.
    Json,
}

impl DocumentFormat {
    /// Detects the format from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "md" | "markdown" => Some(Self::Markdown),
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SectionEntry {
    Line(String),
    Named {
        name: String,
        #[serde(default)]
        guidance: String,
    },
    Pair(BTreeMap<String, String>),
}

#[derive(Debug, Deserialize)]
struct StructuredDocument {
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "structure")]
    sections: Vec<SectionEntry>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    best_for: Vec<String>,
    #[serde(default)]
    example: String,
}

/// Parses one framework document.
///
/// `fallback_name` (usually the file stem) names the framework when the
/// document does not.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the document cannot be decoded or has
/// no named section.
pub fn parse_document(
    content: &str,
    format: DocumentFormat,
    fallback_name: &str,
) -> Result<Framework> {
    match format {
        DocumentFormat::Markdown => parse_markdown(content, fallback_name),
        DocumentFormat::Yaml => {
            let doc: StructuredDocument = serde_yaml_ng::from_str(content)
                .map_err(|e| Error::InvalidInput(format!("invalid YAML framework: {e}")))?;
            build_structured(doc, fallback_name)
        },
        DocumentFormat::Json => {
            let doc: StructuredDocument = serde_json::from_str(content)
                .map_err(|e| Error::InvalidInput(format!("invalid JSON framework: {e}")))?;
            build_structured(doc, fallback_name)
        },
    }
}

fn build_structured(doc: StructuredDocument, fallback_name: &str) -> Result<Framework> {
    let sections = doc
        .sections
        .into_iter()
        .filter_map(|entry| match entry {
            SectionEntry::Line(line) => FrameworkSection::parse(&line),
            SectionEntry::Named { name, guidance } => {
                let name = name.trim();
                (!name.is_empty()).then(|| FrameworkSection::new(name, guidance.trim()))
            },
            SectionEntry::Pair(map) => map
                .into_iter()
                .next()
                .and_then(|(name, guidance)| FrameworkSection::parse(&format!("{name}: {guidance}"))),
        })
        .collect();

    let name = doc
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| fallback_name.to_string());
    let tags = if doc.tags.is_empty() {
        tags_from_phrases(&doc.best_for)
    } else {
        doc.tags
    };

    Ok(Framework::new(name, sections)?
        .with_description(doc.description.trim())
        .with_tags(tags)
        .with_example(doc.example.trim()))
}

type Blocks<'a> = Vec<(String, Vec<&'a str>)>;

fn parse_markdown(content: &str, fallback_name: &str) -> Result<Framework> {
    let mut title: Option<String> = None;
    let mut blocks: Blocks<'_> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("## ") {
            blocks.push((heading.trim().to_lowercase(), Vec::new()));
        } else if let Some(heading) = trimmed.strip_prefix("# ") {
            if title.is_none() {
                title = Some(heading.trim().to_string());
            }
        } else if let Some((_, lines)) = blocks.last_mut() {
            lines.push(line);
        }
    }

    let sections: Vec<FrameworkSection> = block_bullets(&blocks, "structure")
        .iter()
        .filter_map(|line| FrameworkSection::parse(line))
        .collect();

    let name = title
        .map(|t| {
            t.trim_end_matches("Framework")
                .trim_end_matches("framework")
                .trim()
                .to_string()
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| fallback_name.to_string());

    let explicit_tags: Vec<String> = block_bullets(&blocks, "tags")
        .iter()
        .flat_map(|line| line.split(','))
        .map(str::to_string)
        .collect();
    let tags = if explicit_tags.is_empty() {
        tags_from_phrases(&block_bullets(&blocks, "best for"))
    } else {
        explicit_tags
    };

    Ok(Framework::new(name, sections)?
        .with_description(block_text(&blocks, "description"))
        .with_tags(tags)
        .with_example(block_text(&blocks, "example")))
}

fn find_block<'b, 'a>(blocks: &'b Blocks<'a>, name: &str) -> Option<&'b [&'a str]> {
    blocks
        .iter()
        .find(|(heading, _)| heading == name)
        .map(|(_, lines)| lines.as_slice())
}

fn block_text(blocks: &Blocks<'_>, name: &str) -> String {
    find_block(blocks, name).map_or_else(String::new, |lines| lines.join("\n").trim().to_string())
}

fn block_bullets(blocks: &Blocks<'_>, name: &str) -> Vec<String> {
    find_block(blocks, name).map_or_else(Vec::new, |lines| {
        lines
            .iter()
            .map(|l| l.trim().trim_start_matches(['-', '*']).trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    })
}

/// Derives keyword tags from "best for" phrases: lowercase words of at
/// least four letters, deduplicated in order.
fn tags_from_phrases(phrases: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for phrase in phrases {
        for word in phrase.split(|c: char| !c.is_alphanumeric() && c != '-') {
            let word = word.to_lowercase();
            if word.len() >= 4 && !tags.contains(&word) {
                tags.push(word);
            }
        }
    }
    tags
}
