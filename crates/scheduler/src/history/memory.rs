//! In-memory implementation of HistoryStore for testing

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{HistoryError, HistoryRecord, HistoryStore};
use crate::task::TaskId;

/// In-memory implementation of HistoryStore
///
/// Records are kept in insertion order.
///
/// # Example
///
/// ```
/// use conveyor_scheduler::InMemoryHistoryStore;
///
/// let store = InMemoryHistoryStore::new();
/// assert!(store.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    records: RwLock<Vec<HistoryRecord>>,
}

impl InMemoryHistoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, oldest first
    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records.read().clone()
    }

    /// Records belonging to one owner, oldest first
    pub fn for_owner(&self, owner_id: &str) -> Vec<HistoryRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect()
    }

    /// The record written for a task, if any
    pub fn for_task(&self, task_id: TaskId) -> Option<HistoryRecord> {
        self.records
            .read()
            .iter()
            .find(|r| r.task_id == task_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.records.write().clear();
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn save(&self, record: HistoryRecord) -> Result<(), HistoryError> {
        self.records.write().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskRecord, TaskRequest};
    use chrono::Utc;
    use serde_json::json;

    fn record_for(owner: &str) -> HistoryRecord {
        let mut task = TaskRecord::from_request(TaskRequest::new(owner, json!({})));
        let now = Utc::now();
        task.mark_processing(now);
        task.mark_failed(now, "boom");
        HistoryRecord::from_task(&task, None)
    }

    #[tokio::test]
    async fn test_filters_by_owner_and_task() {
        let store = InMemoryHistoryStore::new();
        let first = record_for("a");
        let first_task = first.task_id;
        store.save(first).await.unwrap();
        store.save(record_for("b")).await.unwrap();
        store.save(record_for("a")).await.unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.for_owner("a").len(), 2);
        assert_eq!(store.for_owner("c").len(), 0);
        assert_eq!(
            store.for_task(first_task).unwrap().error.as_deref(),
            Some("boom")
        );

        store.clear();
        assert!(store.is_empty());
    }
}
