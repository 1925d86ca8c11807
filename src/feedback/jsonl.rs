//! JSON lines feedback store.
//!
//! One [`RunRecord`] per line. Appends write the whole line in a single call
//! while holding the store lock, so concurrent appenders never interleave.
//! Lines that are not UTF-8 or fail to parse are skipped with a warning.

use super::{FeedbackQuery, FeedbackStore};
use crate::models::RunRecord;
use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Feedback store backed by an append-only JSON lines file.
#[derive(Debug)]
pub struct JsonlFeedbackStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlFeedbackStore {
    /// Opens (creating if needed) the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory or file cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_feedback_dir".to_string(),
                cause: e.to_string(),
            })?;
        }
        Self::open_append(&path).map_err(|e| Error::OperationFailed {
            operation: "open_feedback_file".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_append(path: &Path) -> std::io::Result<File> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            OpenOptions::new()
                .create(true)
                .append(true)
                .mode(0o600)
                .open(path)
        }

        #[cfg(not(unix))]
        {
            OpenOptions::new().create(true).append(true).open(path)
        }
    }

    fn read_all(&self) -> Result<Vec<RunRecord>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::OperationFailed {
                    operation: "read_feedback_file".to_string(),
                    cause: e.to_string(),
                });
            },
        };

        let mut records = Vec::new();
        for (number, line) in BufReader::new(file).split(b'\n').enumerate() {
            let bytes = line.map_err(|e| Error::OperationFailed {
                operation: "read_feedback_file".to_string(),
                cause: e.to_string(),
            })?;
            let parsed = std::str::from_utf8(&bytes)
                .map_err(|e| e.to_string())
                .and_then(|line| {
                    if line.trim().is_empty() {
                        return Ok(None);
                    }
                    serde_json::from_str::<RunRecord>(line)
                        .map(Some)
                        .map_err(|e| e.to_string())
                });
            match parsed {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {},
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = number + 1,
                        error = %e,
                        "Skipping malformed feedback record"
                    );
                    metrics::counter!("feedback_malformed_records_total").increment(1);
                },
            }
        }
        Ok(records)
    }
}

impl FeedbackStore for JsonlFeedbackStore {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn append(&self, record: &RunRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).map_err(|e| Error::OperationFailed {
            operation: "serialize_run_record".to_string(),
            cause: e.to_string(),
        })?;
        line.push('\n');

        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut file = Self::open_append(&self.path).map_err(|e| Error::OperationFailed {
            operation: "open_feedback_file".to_string(),
            cause: e.to_string(),
        })?;
        file.write_all(line.as_bytes())
            .map_err(|e| Error::OperationFailed {
                operation: "append_run_record".to_string(),
                cause: e.to_string(),
            })?;

        tracing::debug!(run_id = %record.run_id, outcome = %record.outcome, "Appended run record");
        Ok(())
    }

    fn query(&self, query: &FeedbackQuery) -> Result<Vec<RunRecord>> {
        let records = {
            let _guard = self
                .lock
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            self.read_all()?
        };
        Ok(records
            .into_iter()
            .rev()
            .filter(|r| query.matches(r))
            .take(query.limit)
            .collect())
    }
}
