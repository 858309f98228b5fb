//! Terminal outcome history
//!
//! This module provides:
//! - [`HistoryRecord`] - Append-only audit entry written once per terminal task
//! - [`HistoryStore`] - Persistence backend trait
//! - [`HistoryRecorder`] - Best-effort writer used by the dispatcher
//! - [`InMemoryHistoryStore`] - Store for tests and local runs
//! - `PostgresHistoryStore` - Durable store (requires the `postgres` feature)
//!
//! A task's outcome is authoritative whether or not its history was written;
//! store failures are logged and swallowed.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::task::{Metadata, TaskId, TaskPriority, TaskRecord, TaskStatus};

pub use memory::InMemoryHistoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresHistoryStore;

/// Error type for history stores
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Save did not finish in time
    #[error("history save timed out after {0:?}")]
    Timeout(Duration),
}

/// Durable trace of a finished task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Final human-readable progress message
    pub message: String,
    pub processing_time_ms: Option<i64>,
    /// Domain result summary (COMPLETED only)
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: Metadata,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Build the record for a task that just reached a terminal status
    pub fn from_task(task: &TaskRecord, result: Option<serde_json::Value>) -> Self {
        let completed_at = task.completed_at.unwrap_or_else(Utc::now);
        Self {
            id: Uuid::now_v7(),
            owner_id: task.owner_id.clone(),
            task_id: task.id,
            status: task.status,
            priority: task.priority,
            message: task.progress.message.clone(),
            processing_time_ms: task.processing_time_ms,
            result,
            error: task.error.clone(),
            metadata: task.metadata.clone(),
            started_at: task.started_at.unwrap_or(completed_at),
            completed_at,
        }
    }
}

/// Persistence backend for history records
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    /// Append one record
    async fn save(&self, record: HistoryRecord) -> Result<(), HistoryError>;
}

#[async_trait]
impl<S: HistoryStore + ?Sized> HistoryStore for Arc<S> {
    async fn save(&self, record: HistoryRecord) -> Result<(), HistoryError> {
        (**self).save(record).await
    }
}

/// Writes history records without ever failing the caller
#[derive(Clone)]
pub struct HistoryRecorder {
    store: Arc<dyn HistoryStore>,
    timeout: Duration,
}

impl HistoryRecorder {
    pub fn new(store: Arc<dyn HistoryStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Save a record; returns whether it was persisted
    pub async fn record(&self, record: HistoryRecord) -> bool {
        let task_id = record.task_id;
        let owner_id = record.owner_id.clone();

        let outcome = match tokio::time::timeout(self.timeout, self.store.save(record)).await {
            Ok(result) => result,
            Err(_) => Err(HistoryError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(()) => {
                debug!(%task_id, owner_id = %owner_id, "Task history saved");
                true
            }
            Err(e) => {
                error!(%task_id, owner_id = %owner_id, error = %e, "Failed to save task history");
                false
            }
        }
    }
}

impl std::fmt::Debug for HistoryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryRecorder")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskRequest;
    use serde_json::json;

    struct BrokenStore;

    #[async_trait]
    impl HistoryStore for BrokenStore {
        async fn save(&self, _record: HistoryRecord) -> Result<(), HistoryError> {
            Err(HistoryError::Database("connection refused".into()))
        }
    }

    struct HangingStore;

    #[async_trait]
    impl HistoryStore for HangingStore {
        async fn save(&self, _record: HistoryRecord) -> Result<(), HistoryError> {
            std::future::pending().await
        }
    }

    fn completed_task() -> TaskRecord {
        let mut task = TaskRecord::from_request(
            TaskRequest::new("owner-7", json!({"doc": 1})).with_meta("source", json!("upload")),
        );
        let now = Utc::now();
        task.mark_processing(now);
        task.mark_completed(now + chrono::Duration::milliseconds(40), "Created 2 memories");
        task
    }

    #[test]
    fn test_record_from_task() {
        let task = completed_task();
        let record = HistoryRecord::from_task(&task, Some(json!({"created": 2})));

        assert_eq!(record.task_id, task.id);
        assert_eq!(record.owner_id, "owner-7");
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.message, "Created 2 memories");
        assert_eq!(record.processing_time_ms, Some(40));
        assert_eq!(record.metadata["source"], json!("upload"));
        assert_eq!(record.started_at, task.started_at.unwrap());
    }

    #[tokio::test]
    async fn test_recorder_saves() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let recorder = HistoryRecorder::new(store.clone(), Duration::from_secs(1));

        assert!(recorder.record(HistoryRecord::from_task(&completed_task(), None)).await);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_recorder_swallows_errors() {
        let recorder = HistoryRecorder::new(Arc::new(BrokenStore), Duration::from_secs(1));
        assert!(!recorder.record(HistoryRecord::from_task(&completed_task(), None)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recorder_times_out() {
        let recorder = HistoryRecorder::new(Arc::new(HangingStore), Duration::from_secs(5));
        assert!(!recorder.record(HistoryRecord::from_task(&completed_task(), None)).await);
    }
}
