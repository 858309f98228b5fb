//! Task records and their lifecycle
//!
//! A [`TaskRecord`] is created in [`TaskStatus::Pending`] by a submission and
//! is only ever moved forward: `Pending -> Processing -> Completed | Failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SubmitError;

/// Unique task identifier (UUID v7, ordered by submission time)
pub type TaskId = Uuid;

/// Free-form metadata forwarded to history
pub type Metadata = serde_json::Map<String, serde_json::Value>;

const DEFAULT_PENDING_MESSAGE: &str = "Waiting to be processed";

/// Task priority
///
/// Priority only affects where a task is inserted into the queue. `Low` is
/// currently inserted exactly like `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, waiting for admission
    Pending,

    /// Admitted; the worker is running
    Processing,

    /// Worker resolved
    Completed,

    /// Worker rejected (or panicked)
    Failed,
}

impl TaskStatus {
    /// Terminal statuses admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal lifecycle step
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Progress of a task, `current <= total` always holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub current: u32,
    pub total: u32,
    pub message: String,
}

impl TaskProgress {
    pub fn new(total: u32) -> Self {
        Self {
            current: 0,
            total,
            message: DEFAULT_PENDING_MESSAGE.to_string(),
        }
    }

    /// Replace the progress, clamping `current` into `0..=total`
    pub(crate) fn update(&mut self, current: u32, total: u32, message: impl Into<String>) {
        self.total = total;
        self.current = current.min(total);
        self.message = message.into();
    }

    pub(crate) fn finish(&mut self, message: impl Into<String>) {
        self.current = self.total;
        self.message = message.into();
    }
}

/// A request to run one unit of work
///
/// # Example
///
/// ```
/// use conveyor_scheduler::{TaskPriority, TaskRequest};
/// use serde_json::json;
///
/// let request = TaskRequest::new("user-42", json!({"document": "d-1"}))
///     .with_priority(TaskPriority::High)
///     .with_total_steps(3);
///
/// assert!(request.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub owner_id: String,
    pub payload: serde_json::Value,
    pub priority: TaskPriority,
    pub metadata: Metadata,
    pub total_steps: u32,
}

impl TaskRequest {
    pub fn new(owner_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            owner_id: owner_id.into(),
            payload,
            priority: TaskPriority::default(),
            metadata: Metadata::new(),
            total_steps: 0,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set a single metadata entry
    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Initial progress total, refined later by the worker's reports
    pub fn with_total_steps(mut self, total: u32) -> Self {
        self.total_steps = total;
        self
    }

    /// Reject requests without an owner or payload
    pub fn validate(&self) -> Result<(), SubmitError> {
        if self.owner_id.trim().is_empty() {
            return Err(SubmitError::InvalidOwner);
        }
        if self.payload.is_null() {
            return Err(SubmitError::MissingPayload);
        }
        Ok(())
    }
}

/// One unit of work and its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub owner_id: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub metadata: Metadata,
}

impl TaskRecord {
    pub(crate) fn from_request(request: TaskRequest) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id: request.owner_id,
            priority: request.priority,
            status: TaskStatus::Pending,
            progress: TaskProgress::new(request.total_steps),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            processing_time_ms: None,
            error: None,
            payload: request.payload,
            metadata: request.metadata,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Milliseconds since the task was admitted, if it was
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or(now);
        Some((end - started).num_milliseconds().max(0))
    }

    /// `Pending -> Processing`; returns `false` if the transition is illegal
    pub(crate) fn mark_processing(&mut self, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(TaskStatus::Processing) {
            return false;
        }
        self.status = TaskStatus::Processing;
        self.started_at = Some(now);
        self.progress.message = "Processing".to_string();
        true
    }

    pub(crate) fn mark_completed(&mut self, now: DateTime<Utc>, message: impl Into<String>) -> bool {
        if !self.finish(now, TaskStatus::Completed) {
            return false;
        }
        self.progress.finish(message);
        true
    }

    pub(crate) fn mark_failed(&mut self, now: DateTime<Utc>, error: impl Into<String>) -> bool {
        if !self.finish(now, TaskStatus::Failed) {
            return false;
        }
        let error = error.into();
        self.progress.message = format!("Failed: {}", error);
        self.error = Some(error);
        true
    }

    fn finish(&mut self, now: DateTime<Utc>, status: TaskStatus) -> bool {
        if !self.status.can_transition_to(status) {
            return false;
        }
        // started_at is always set once Processing; fall back to `now` rather than panic
        let started = *self.started_at.get_or_insert(now);
        self.status = status;
        self.completed_at = Some(now);
        self.processing_time_ms = Some((now - started).num_milliseconds());
        true
    }

    pub(crate) fn summary(&self, now: DateTime<Utc>) -> TaskSummary {
        TaskSummary {
            id: self.id,
            owner_id: self.owner_id.clone(),
            priority: self.priority,
            status: self.status,
            progress: self.progress.clone(),
            elapsed_ms: self.elapsed_ms(now),
        }
    }
}

/// Lightweight per-task view used in stats and queue snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub owner_id: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn record() -> TaskRecord {
        TaskRecord::from_request(TaskRequest::new("owner-1", json!({"k": 1})).with_total_steps(4))
    }

    #[test]
    fn test_request_validation() {
        assert!(TaskRequest::new("owner", json!(1)).validate().is_ok());
        assert!(matches!(
            TaskRequest::new("  ", json!(1)).validate(),
            Err(SubmitError::InvalidOwner)
        ));
        assert!(matches!(
            TaskRequest::new("owner", serde_json::Value::Null).validate(),
            Err(SubmitError::MissingPayload)
        ));
    }

    #[test]
    fn test_new_record_is_pending() {
        let task = record();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::Normal);
        assert_eq!(task.progress.total, 4);
        assert_eq!(task.progress.current, 0);
        assert!(task.started_at.is_none());
        assert!(task.elapsed_ms(Utc::now()).is_none());
    }

    #[test]
    fn test_completed_lifecycle_sets_timing() {
        let mut task = record();
        let start = Utc::now();
        assert!(task.mark_processing(start));

        let end = start + Duration::milliseconds(1250);
        assert!(task.mark_completed(end, "done"));

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.processing_time_ms, Some(1250));
        assert_eq!(task.completed_at, Some(end));
        assert_eq!(task.progress.current, 4);
        assert_eq!(task.progress.message, "done");
        assert!(task.error.is_none());
    }

    #[test]
    fn test_failed_lifecycle_records_error() {
        let mut task = record();
        let start = Utc::now();
        task.mark_processing(start);
        assert!(task.mark_failed(start + Duration::milliseconds(10), "boom"));

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("boom"));
        assert_eq!(task.processing_time_ms, Some(10));
    }

    #[test]
    fn test_terminal_is_final() {
        let mut task = record();
        let now = Utc::now();
        task.mark_processing(now);
        task.mark_completed(now, "ok");

        assert!(!task.mark_failed(now, "late"));
        assert!(!task.mark_processing(now));
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.error.is_none());
    }

    #[test]
    fn test_pending_cannot_complete() {
        let mut task = record();
        assert!(!task.mark_completed(Utc::now(), "skip"));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_progress_clamps_current() {
        let mut progress = TaskProgress::new(2);
        progress.update(7, 5, "over");
        assert_eq!(progress.current, 5);
        assert_eq!(progress.total, 5);
    }

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Processing));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Processing));
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(serde_json::to_string(&TaskPriority::High).unwrap(), "\"high\"");
    }
}
