//! Feedback store.
//!
//! Append-only history of finished runs. The Researcher and Optimizer read
//! it to bias framework choice and edits; a store that cannot be read never
//! fails a run.
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`JsonlFeedbackStore`] | One JSON record per line, default |
//! | [`SqliteFeedbackStore`] | Indexed queries over large histories |
//! | [`InMemoryFeedbackStore`] | Tests and ephemeral runs |

mod jsonl;
mod memory;
mod sqlite;

pub use jsonl::JsonlFeedbackStore;
pub use memory::InMemoryFeedbackStore;
pub use sqlite::SqliteFeedbackStore;

use crate::Result;
use crate::models::{RequestFingerprint, RunRecord};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Default cap on records returned by a query.
pub const DEFAULT_QUERY_LIMIT: usize = 20;

/// Selects past runs by request fingerprint or content tags.
///
/// A record matches when its fingerprint equals the query's or it shares a
/// tag with the query. A query with neither matches every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackQuery {
    /// Fingerprint to match.
    pub fingerprint: Option<RequestFingerprint>,
    /// Tags to match (any).
    pub tags: Vec<String>,
    /// Maximum records returned.
    pub limit: usize,
}

impl FeedbackQuery {
    /// Matches every record.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            fingerprint: None,
            tags: Vec::new(),
            limit: DEFAULT_QUERY_LIMIT,
        }
    }

    /// Matches runs of the same request or sharing a tag.
    #[must_use]
    pub fn for_request<I, S>(request: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fingerprint: Some(RequestFingerprint::of(request)),
            tags: tags.into_iter().map(Into::into).collect(),
            limit: DEFAULT_QUERY_LIMIT,
        }
    }

    /// Sets the record limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Returns true if the record matches.
    #[must_use]
    pub fn matches(&self, record: &RunRecord) -> bool {
        if self.fingerprint.is_none() && self.tags.is_empty() {
            return true;
        }
        self.fingerprint
            .as_ref()
            .is_some_and(|fp| *fp == record.fingerprint)
            || record.tags.iter().any(|t| self.tags.contains(t))
    }
}

impl Default for FeedbackQuery {
    fn default() -> Self {
        Self::all()
    }
}

/// Append-only run history.
///
/// Implementations must tolerate concurrent readers and appenders; each
/// append is atomic as a whole record.
pub trait FeedbackStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Appends a finished run.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn append(&self, record: &RunRecord) -> Result<()>;

    /// Returns matching runs, most recent first, at most `query.limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn query(&self, query: &FeedbackQuery) -> Result<Vec<RunRecord>>;
}

impl<S: FeedbackStore + ?Sized> FeedbackStore for Arc<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn append(&self, record: &RunRecord) -> Result<()> {
        (**self).append(record)
    }

    fn query(&self, query: &FeedbackQuery) -> Result<Vec<RunRecord>> {
        (**self).query(query)
    }
}

/// Stand-in for a store that could not be opened.
///
/// Every call fails, so runs annotate `FeedbackUnavailable` and continue.
#[derive(Debug, Clone)]
pub struct UnavailableFeedbackStore {
    cause: String,
}

impl UnavailableFeedbackStore {
    /// Creates a stand-in remembering why the real store failed.
    #[must_use]
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }

    fn error(&self, operation: &str) -> crate::Error {
        crate::Error::OperationFailed {
            operation: operation.to_string(),
            cause: self.cause.clone(),
        }
    }
}

impl FeedbackStore for UnavailableFeedbackStore {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn append(&self, _record: &RunRecord) -> Result<()> {
        Err(self.error("append_run_record"))
    }

    fn query(&self, _query: &FeedbackQuery) -> Result<Vec<RunRecord>> {
        Err(self.error("query_feedback"))
    }
}

/// Feedback backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackBackend {
    /// JSON lines file.
    #[default]
    Jsonl,
    /// `SQLite` database.
    Sqlite,
    /// Process memory.
    Memory,
    /// No feedback store.
    None,
}

impl FeedbackBackend {
    /// Parses a backend name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "jsonl" | "json" | "file" => Some(Self::Jsonl),
            "sqlite" | "db" => Some(Self::Sqlite),
            "memory" | "in-memory" => Some(Self::Memory),
            "none" | "off" | "disabled" => Some(Self::None),
            _ => None,
        }
    }
}

/// Feedback store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackConfig {
    /// Backend.
    pub backend: FeedbackBackend,
    /// File or database path for persistent backends.
    pub path: Option<PathBuf>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            backend: FeedbackBackend::Jsonl,
            path: default_data_dir().map(|dir| dir.join("feedback.jsonl")),
        }
    }
}

/// Platform data directory for the crate.
#[must_use]
pub fn default_data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "neuroprompt").map(|d| d.data_dir().to_path_buf())
}

/// Opens the configured store. `Ok(None)` means feedback is disabled.
///
/// # Errors
///
/// Returns an error if a persistent backend has no path or cannot be opened.
pub fn open_store(config: &FeedbackConfig) -> Result<Option<Arc<dyn FeedbackStore>>> {
    let path = || {
        config.path.clone().ok_or_else(|| {
            crate::Error::InvalidInput(format!(
                "feedback backend {:?} requires a path",
                config.backend
            ))
        })
    };
    let store: Arc<dyn FeedbackStore> = match config.backend {
        FeedbackBackend::None => return Ok(None),
        FeedbackBackend::Memory => Arc::new(InMemoryFeedbackStore::new()),
        FeedbackBackend::Jsonl => Arc::new(JsonlFeedbackStore::open(path()?)?),
        FeedbackBackend::Sqlite => Arc::new(SqliteFeedbackStore::new(path()?)?),
    };
    tracing::debug!(backend = store.name(), "Opened feedback store");
    Ok(Some(store))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Record builders shared by store tests.

    use crate::models::{
        Critique, DraftSection, PromptDraft, RunOutcome, RunRecord, RunRecorder,
    };

    pub fn record(request: &str, tags: &[&str], score: f64) -> RunRecord {
        let mut recorder = RunRecorder::start(request);
        recorder.set_framework("SCQA");
        recorder.set_tags(tags.iter().map(|t| (*t).to_string()).collect());
        recorder
            .push_iteration(
                PromptDraft::new("SCQA", vec![DraftSection::new("Situation", request)]),
                Critique::new(score, vec![], vec![], ""),
            )
            .unwrap();
        recorder.finish(RunOutcome::Accepted)
    }
}
