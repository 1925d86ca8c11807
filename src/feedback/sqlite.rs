//! `SQLite` feedback store.
//!
//! Records are stored whole as JSON with the fingerprint and tags broken
//! out into indexed columns. Insertion order is kept by an autoincrement
//! sequence so "most recent first" survives identical timestamps.

use super::{FeedbackQuery, FeedbackStore};
use crate::models::RunRecord;
use crate::{Error, Result};
use rusqlite::{Connection, params, params_from_iter, types::Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Feedback store backed by a `SQLite` database.
pub struct SqliteFeedbackStore {
    /// Connection to the `SQLite` database.
    conn: Mutex<Connection>,
    /// Path to the `SQLite` database.
    db_path: PathBuf,
}

impl SqliteFeedbackStore {
    /// Opens (creating if needed) the database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_feedback_dir".to_string(),
                cause: e.to_string(),
            })?;
        }

        let conn = Connection::open(&db_path).map_err(|e| Error::OperationFailed {
            operation: "open_feedback_db".to_string(),
            cause: e.to_string(),
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
            operation: "open_feedback_db_memory".to_string(),
            cause: e.to_string(),
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Returns the database path.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "busy_timeout", "5000");

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS feedback_runs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL UNIQUE,
                fingerprint TEXT NOT NULL,
                framework TEXT,
                outcome TEXT NOT NULL,
                final_score REAL,
                record TEXT NOT NULL,
                completed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_feedback_runs_fingerprint
                ON feedback_runs(fingerprint);
            CREATE TABLE IF NOT EXISTS feedback_run_tags (
                run_id TEXT NOT NULL,
                tag TEXT NOT NULL,
                PRIMARY KEY (run_id, tag)
            );
            CREATE INDEX IF NOT EXISTS idx_feedback_run_tags_tag
                ON feedback_run_tags(tag);",
        )
        .map_err(|e| Error::OperationFailed {
            operation: "create_feedback_tables".to_string(),
            cause: e.to_string(),
        })?;

        Ok(())
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| Error::OperationFailed {
            operation: "lock_feedback_db".to_string(),
            cause: e.to_string(),
        })
    }

    /// Number of stored runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the count query fails.
    pub fn count(&self) -> Result<u64> {
        let conn = self.lock_conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM feedback_runs", [], |row| row.get(0))
            .map_err(|e| Error::OperationFailed {
                operation: "count_feedback_runs".to_string(),
                cause: e.to_string(),
            })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

impl FeedbackStore for SqliteFeedbackStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn append(&self, record: &RunRecord) -> Result<()> {
        let json = serde_json::to_string(record).map_err(|e| Error::OperationFailed {
            operation: "serialize_run_record".to_string(),
            cause: e.to_string(),
        })?;

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction().map_err(|e| Error::OperationFailed {
            operation: "begin_feedback_append".to_string(),
            cause: e.to_string(),
        })?;

        tx.execute(
            "INSERT INTO feedback_runs
             (run_id, fingerprint, framework, outcome, final_score, record, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.run_id,
                record.fingerprint.as_str(),
                record.framework,
                record.outcome.as_str(),
                record.final_score,
                json,
                record.completed_at.timestamp(),
            ],
        )
        .map_err(|e| Error::OperationFailed {
            operation: "append_run_record".to_string(),
            cause: e.to_string(),
        })?;

        for tag in &record.tags {
            tx.execute(
                "INSERT OR IGNORE INTO feedback_run_tags (run_id, tag) VALUES (?1, ?2)",
                params![record.run_id, tag],
            )
            .map_err(|e| Error::OperationFailed {
                operation: "append_run_tags".to_string(),
                cause: e.to_string(),
            })?;
        }

        tx.commit().map_err(|e| Error::OperationFailed {
            operation: "commit_feedback_append".to_string(),
            cause: e.to_string(),
        })?;

        tracing::debug!(run_id = %record.run_id, outcome = %record.outcome, "Stored run record");
        Ok(())
    }

    fn query(&self, query: &FeedbackQuery) -> Result<Vec<RunRecord>> {
        let mut clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(fp) = &query.fingerprint {
            values.push(Value::Text(fp.as_str().to_string()));
            clauses.push(format!("fingerprint = ?{}", values.len()));
        }
        if !query.tags.is_empty() {
            let mut placeholders = Vec::with_capacity(query.tags.len());
            for tag in &query.tags {
                values.push(Value::Text(tag.clone()));
                placeholders.push(format!("?{}", values.len()));
            }
            clauses.push(format!(
                "run_id IN (SELECT run_id FROM feedback_run_tags WHERE tag IN ({}))",
                placeholders.join(", ")
            ));
        }

        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" OR "))
        };
        values.push(Value::Integer(i64::try_from(query.limit).unwrap_or(i64::MAX)));
        let sql = format!(
            "SELECT record FROM feedback_runs {filter} ORDER BY seq DESC LIMIT ?{}",
            values.len()
        );

        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&sql).map_err(|e| Error::OperationFailed {
            operation: "prepare_feedback_query".to_string(),
            cause: e.to_string(),
        })?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| row.get::<_, String>(0))
            .map_err(|e| Error::OperationFailed {
                operation: "query_feedback_runs".to_string(),
                cause: e.to_string(),
            })?;

        let mut records = Vec::new();
        for row in rows {
            let json = row.map_err(|e| Error::OperationFailed {
                operation: "read_feedback_row".to_string(),
                cause: e.to_string(),
            })?;
            match serde_json::from_str::<RunRecord>(&json) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed feedback record");
                    metrics::counter!("feedback_malformed_records_total").increment(1);
                },
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::testing::record;
    use tempfile::TempDir;

    #[test]
    fn test_query_by_fingerprint_or_tag() {
        let store = SqliteFeedbackStore::in_memory().unwrap();
        store
            .append(&record("summarize the memo", &["summarization"], 85.0))
            .unwrap();
        store.append(&record("write a poem", &["writing"], 60.0)).unwrap();
        store
            .append(&record("analyze the logs", &["analytical", "technical"], 75.0))
            .unwrap();

        let by_fp = store
            .query(&FeedbackQuery::for_request("Summarize the memo", Vec::<String>::new()))
            .unwrap();
        assert_eq!(by_fp.len(), 1);
        assert_eq!(by_fp[0].request, "summarize the memo");

        let by_tag = store
            .query(&FeedbackQuery::for_request("x", ["technical", "writing"]))
            .unwrap();
        let requests: Vec<_> = by_tag.iter().map(|r| r.request.as_str()).collect();
        assert_eq!(requests, ["analyze the logs", "write a poem"]);

        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_limit_and_order() {
        let store = SqliteFeedbackStore::in_memory().unwrap();
        for i in 0..5 {
            store.append(&record(&format!("r{i}"), &[], 50.0)).unwrap();
        }
        let recent = store.query(&FeedbackQuery::all().with_limit(2)).unwrap();
        let requests: Vec<_> = recent.iter().map(|r| r.request.as_str()).collect();
        assert_eq!(requests, ["r4", "r3"]);
    }

    #[test]
    fn test_duplicate_run_id_rejected() {
        let store = SqliteFeedbackStore::in_memory().unwrap();
        let rec = record("once", &[], 50.0);
        store.append(&rec).unwrap();
        assert!(store.append(&rec).is_err());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data/feedback.db");
        SqliteFeedbackStore::new(&path)
            .unwrap()
            .append(&record("kept", &["code"], 88.0))
            .unwrap();

        let reopened = SqliteFeedbackStore::new(&path).unwrap();
        assert_eq!(reopened.db_path(), path);
        let found = reopened
            .query(&FeedbackQuery::for_request("other", ["code"]))
            .unwrap();
        assert_eq!(found[0].final_score, Some(88.0));
    }
}
