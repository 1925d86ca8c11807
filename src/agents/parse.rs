//! Lenient parsing of sectioned model output.
//!
//! Models answer either with JSON or with headed text blocks. Both are
//! reduced to the framework's section names, in framework order.

use crate::llm::extract_json_from_response;
use crate::models::DraftSection;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Creates a compile-time verified regex wrapped in [`LazyLock`].
macro_rules! lazy_regex {
    ($pattern:expr) => {
        LazyLock::new(|| Regex::new($pattern).unwrap_or_else(|_| unreachable!()))
    };
}

/// Template slots a model may echo back instead of writing content:
/// `<text>`, `[insert audience]`, `{{topic}}`, `TBD`, `...`.
static PLACEHOLDER_PATTERN: LazyLock<Regex> = lazy_regex!(
    r"(?i)^\s*(<[^<>]{1,40}>|\[(insert|add|your|todo)[^\]]*\]|\{\{\s*\w+\s*\}\}|tbd|todo|n/?a|\.\.\.|…)\s*$"
);

/// Extracts the expected sections from a model response.
///
/// JSON is tried first: `{"sections": {"Name": "text"}}`, a top-level
/// `{"Name": "text"}` map, or a list of `{"name", "text"}` objects. If no
/// expected section is found that way, the text is scanned for headers such
/// as `**Name:** text`, `Name: text` or `## Name`.
///
/// Only recognized sections are returned, in `expected` order and under
/// their canonical names. Text may be empty when a header had no content.
#[must_use]
pub fn parse_sections(text: &str, expected: &[&str]) -> Vec<DraftSection> {
    if let Some(pairs) = json_sections(text) {
        let found = collect(&pairs, expected);
        if !found.is_empty() {
            return found;
        }
    }
    collect(&headed_sections(text, expected), expected)
}

/// Returns true if a section's text is empty or only a template slot.
#[must_use]
pub fn is_placeholder(text: &str) -> bool {
    text.trim().is_empty() || PLACEHOLDER_PATTERN.is_match(text)
}

fn json_sections(text: &str) -> Option<Vec<(String, String)>> {
    let value: Value = serde_json::from_str(extract_json_from_response(text)).ok()?;
    let body = value.get("sections").unwrap_or(&value);
    let pairs = match body {
        Value::Object(map) => map
            .iter()
            .filter_map(|(name, v)| v.as_str().map(|s| (name.clone(), s.to_string())))
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?;
                let text = item.get("text").or_else(|| item.get("content"))?.as_str()?;
                Some((name.to_string(), text.to_string()))
            })
            .collect(),
        _ => return None,
    };
    Some(pairs)
}

fn collect(pairs: &[(String, String)], expected: &[&str]) -> Vec<DraftSection> {
    expected
        .iter()
        .filter_map(|name| {
            pairs
                .iter()
                .find(|(n, _)| clean_name(n).eq_ignore_ascii_case(name))
                .map(|(_, text)| DraftSection::new(*name, text.trim()))
        })
        .collect()
}

fn clean_name(name: &str) -> &str {
    name.trim().trim_matches(['*', '#', ':']).trim()
}

fn headed_sections(text: &str, expected: &[&str]) -> Vec<(String, String)> {
    // Longest names first so "Negative Example" wins over "Example".
    let mut names: Vec<&str> = expected.to_vec();
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));

    let mut sections: Vec<(String, Vec<String>)> = Vec::new();
    let mut current: Option<usize> = None;

    for line in text.lines() {
        if let Some((name, rest)) = match_header(line, &names) {
            let idx = if let Some(i) = sections.iter().position(|(n, _)| n == name) {
                i
            } else {
                sections.push((name.to_string(), Vec::new()));
                sections.len() - 1
            };
            if !rest.is_empty() {
                sections[idx].1.push(rest.to_string());
            }
            current = Some(idx);
        } else if let Some(idx) = current {
            sections[idx].1.push(line.to_string());
        }
    }

    sections
        .into_iter()
        .map(|(name, lines)| (name, lines.join("\n").trim().to_string()))
        .collect()
}

/// Recognizes a section header line, returning the section name and any
/// text following the header on the same line.
fn match_header<'a, 'n>(line: &'a str, names: &[&'n str]) -> Option<(&'n str, &'a str)> {
    let stripped = line.trim_start();
    let after_marks = stripped.trim_start_matches(['-', '#', '>']).trim_start();
    let (body, bold) = after_marks
        .strip_prefix("**")
        .map_or((after_marks, false), |b| (b, true));
    let marked = bold || stripped.starts_with('#');

    for name in names {
        let Some(head) = body.get(..name.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(name) {
            continue;
        }
        let rest = body[name.len()..].trim_start_matches('*');
        let rest = if let Some(after_colon) = rest.strip_prefix(':') {
            after_colon
        } else if rest.trim().is_empty() && marked {
            rest
        } else {
            continue;
        };
        return Some((*name, rest.trim_start_matches('*').trim()));
    }
    None
}
