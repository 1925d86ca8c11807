//! Framework repository.
//!
//! Holds the catalog of prompt frameworks and picks one for a request.
//! Loading never fails: a missing, empty or fully malformed directory puts
//! the repository in degraded mode backed by the embedded catalog.

mod defaults;
mod document;

pub use defaults::{DEFAULT_FRAMEWORK, embedded_catalog};
pub use document::{DocumentFormat, parse_document};

use crate::models::Framework;
use std::fs;
use std::path::{Path, PathBuf};

/// Read-mostly catalog of frameworks.
#[derive(Debug, Clone)]
pub struct FrameworkRepository {
    frameworks: Vec<Framework>,
    fallback: Framework,
    degraded: bool,
    source: Option<PathBuf>,
}

impl FrameworkRepository {
    /// Creates a repository over the embedded catalog.
    #[must_use]
    pub fn embedded() -> Self {
        Self {
            frameworks: embedded_catalog(),
            fallback: defaults::pecra(),
            degraded: false,
            source: None,
        }
    }

    /// Creates a repository over an explicit catalog.
    ///
    /// An empty catalog yields a degraded repository over the embedded set.
    #[must_use]
    pub fn from_frameworks(frameworks: Vec<Framework>) -> Self {
        if frameworks.is_empty() {
            return Self::degraded(None);
        }
        Self {
            frameworks,
            fallback: defaults::pecra(),
            degraded: false,
            source: None,
        }
    }

    fn degraded(source: Option<PathBuf>) -> Self {
        Self {
            degraded: true,
            source,
            ..Self::embedded()
        }
    }

    /// Loads every framework document in `dir`.
    ///
    /// Invalid documents are skipped with a warning. The result is degraded
    /// when the directory is missing or unreadable, holds no framework
    /// documents, or every document is invalid.
    #[must_use]
    pub fn load(dir: &Path) -> Self {
        let span = tracing::info_span!("frameworks.load", dir = %dir.display());
        let _enter = span.enter();

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Framework directory unreadable, using embedded catalog");
                metrics::counter!("framework_catalog_degraded_total").increment(1);
                return Self::degraded(Some(dir.to_path_buf()));
            },
        };

        let mut paths: Vec<(PathBuf, DocumentFormat)> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter_map(|path| DocumentFormat::from_path(&path).map(|format| (path, format)))
            .collect();
        paths.sort_by(|a, b| a.0.cmp(&b.0));

        let mut frameworks: Vec<Framework> = Vec::new();
        for (path, format) in &paths {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unnamed");
            let parsed = fs::read_to_string(path)
                .map_err(|e| crate::Error::OperationFailed {
                    operation: "read_framework_document".to_string(),
                    cause: e.to_string(),
                })
                .and_then(|content| parse_document(&content, *format, stem));

            match parsed {
                Ok(framework) => {
                    if frameworks
                        .iter()
                        .any(|f| f.name().eq_ignore_ascii_case(framework.name()))
                    {
                        tracing::warn!(
                            path = %path.display(),
                            name = framework.name(),
                            "Duplicate framework name, keeping the first"
                        );
                        continue;
                    }
                    frameworks.push(framework);
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping invalid framework document");
                },
            }
        }

        if frameworks.is_empty() {
            tracing::warn!(
                documents = paths.len(),
                "No valid framework documents, using embedded catalog"
            );
            metrics::counter!("framework_catalog_degraded_total").increment(1);
            return Self::degraded(Some(dir.to_path_buf()));
        }

        tracing::info!(count = frameworks.len(), "Loaded framework catalog");
        Self {
            frameworks,
            fallback: defaults::pecra(),
            degraded: false,
            source: Some(dir.to_path_buf()),
        }
    }

    /// Returns true if the catalog failed to load and the embedded set is in use.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Directory the catalog was loaded from, if any.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Lists the catalog in catalog order.
    #[must_use]
    pub fn list_frameworks(&self) -> &[Framework] {
        &self.frameworks
    }

    /// Looks up a framework by name (case-insensitive).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Framework> {
        let name = name.trim();
        self.frameworks
            .iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    /// The default framework: the catalog's PECRA, or the embedded one.
    #[must_use]
    pub fn default_framework(&self) -> &Framework {
        self.get(DEFAULT_FRAMEWORK).unwrap_or(&self.fallback)
    }

    /// Returns the first framework whose name appears as a word in `summary`.
    #[must_use]
    pub fn find_mentioned(&self, summary: &str) -> Option<&Framework> {
        let words = tokenize(summary);
        self.frameworks.iter().find(|f| {
            let name = f.name().to_lowercase();
            words.iter().any(|w| *w == name)
        })
    }

    /// Ranks frameworks by applicability-tag hits in `summary`.
    ///
    /// Only frameworks with at least one hit are returned, highest first;
    /// ties keep catalog order.
    #[must_use]
    pub fn rank(&self, summary: &str) -> Vec<(&Framework, usize)> {
        let words = tokenize(summary);
        let mut ranked: Vec<(&Framework, usize)> = self
            .frameworks
            .iter()
            .map(|f| (f, tag_hits(f, &words)))
            .filter(|(_, hits)| *hits > 0)
            .collect();
        // Stable sort keeps catalog order among equal scores.
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }

    /// Picks the best framework for a request summary.
    ///
    /// An explicit framework name wins; otherwise the framework with the most
    /// tag hits; otherwise the default framework. A degraded repository
    /// always returns the default framework.
    #[must_use]
    pub fn select(&self, summary: &str) -> &Framework {
        if self.degraded {
            return self.default_framework();
        }
        if let Some(framework) = self.find_mentioned(summary) {
            tracing::debug!(framework = framework.name(), "Framework mentioned explicitly");
            return framework;
        }
        self.rank(summary)
            .first()
            .map_or_else(|| self.default_framework(), |(f, _)| *f)
    }
}

impl Default for FrameworkRepository {
    fn default() -> Self {
        Self::embedded()
    }
}

/// Lowercases and splits text into words, keeping inner hyphens.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|w| w.trim_matches('-').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// A tag matches a word exactly, or as a prefix when the tag has at least
/// four characters (`executive` matches `executives`).
pub(crate) fn tag_matches(tag: &str, word: &str) -> bool {
    word == tag || (tag.len() >= 4 && word.starts_with(tag))
}

fn tag_hits(framework: &Framework, words: &[String]) -> usize {
    framework
        .tags()
        .iter()
        .filter(|tag| words.iter().any(|w| tag_matches(tag, w)))
        .count()
}
