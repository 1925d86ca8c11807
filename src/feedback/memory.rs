//! In-memory feedback store.

use super::{FeedbackQuery, FeedbackStore};
use crate::Result;
use crate::models::RunRecord;
use std::sync::RwLock;

/// Feedback store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryFeedbackStore {
    records: RwLock<Vec<RunRecord>>,
}

impl InMemoryFeedbackStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Returns true if nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FeedbackStore for InMemoryFeedbackStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn append(&self, record: &RunRecord) -> Result<()> {
        self.records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    fn query(&self, query: &FeedbackQuery) -> Result<Vec<RunRecord>> {
        let records = self
            .records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(records
            .iter()
            .rev()
            .filter(|r| query.matches(r))
            .take(query.limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::testing::record;

    #[test]
    fn test_query_most_recent_first() {
        let store = InMemoryFeedbackStore::new();
        store.append(&record("first", &["a"], 10.0)).unwrap();
        store.append(&record("second", &["a"], 20.0)).unwrap();
        store.append(&record("third", &["b"], 30.0)).unwrap();

        let found = store
            .query(&FeedbackQuery::for_request("zzz", ["a"]))
            .unwrap();
        let requests: Vec<_> = found.iter().map(|r| r.request.as_str()).collect();
        assert_eq!(requests, ["second", "first"]);

        let limited = store.query(&FeedbackQuery::all().with_limit(1)).unwrap();
        assert_eq!(limited[0].request, "third");
        assert_eq!(store.len(), 3);
    }
}
