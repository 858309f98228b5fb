// Scheduler event protocol
//
// A closed set of events published to the owner of a task. Consumers must
// treat them as hints (delivery is best-effort) and reconcile through the
// query API when in doubt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{TaskId, TaskProgress, TaskRecord, TaskStatus, TaskSummary};

// ============================================================================
// Event Type Constants
// ============================================================================

pub const QUEUE_SNAPSHOT: &str = "queue-snapshot";
pub const TASK_STARTED: &str = "task-started";
pub const TASK_PROGRESS: &str = "task-progress";
pub const TASK_TERMINAL: &str = "task-terminal";

// ============================================================================
// Payloads
// ============================================================================

/// Queue statistics as seen by one owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerStats {
    pub owner_id: String,
    pub queued: usize,
    pub in_flight: usize,
    pub concurrency_limit: usize,
    pub average_latency_ms: u64,
}

/// Aggregate stats plus the owner's queued and in-flight tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub stats: OwnerStats,
    /// Total queued tasks across all owners
    pub total_queued: usize,
    /// Total in-flight tasks across all owners
    pub total_in_flight: usize,
    /// In-flight tasks first, then queued tasks in admission order
    pub tasks: Vec<TaskSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStarted {
    pub task_id: TaskId,
    pub progress: TaskProgress,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgressed {
    pub task_id: TaskId,
    pub progress: TaskProgress,
    pub elapsed_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTerminal {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<i64>,
    /// Domain result summary (COMPLETED only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Worker error message (FAILED only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Event
// ============================================================================

/// Event published to a task owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SchedulerEvent {
    QueueSnapshot(QueueSnapshot),
    TaskStarted(TaskStarted),
    TaskProgress(TaskProgressed),
    TaskTerminal(TaskTerminal),
}

impl SchedulerEvent {
    pub fn queue_snapshot(snapshot: QueueSnapshot) -> Self {
        Self::QueueSnapshot(snapshot)
    }

    /// Built when a task is admitted; `None` if it has no start time yet
    pub fn task_started(task: &TaskRecord) -> Option<Self> {
        Some(Self::TaskStarted(TaskStarted {
            task_id: task.id,
            progress: task.progress.clone(),
            started_at: task.started_at?,
        }))
    }

    pub fn task_progress(task: &TaskRecord, now: DateTime<Utc>) -> Self {
        Self::TaskProgress(TaskProgressed {
            task_id: task.id,
            progress: task.progress.clone(),
            elapsed_ms: task.elapsed_ms(now).unwrap_or(0),
        })
    }

    pub fn task_terminal(task: &TaskRecord, result: Option<serde_json::Value>) -> Self {
        Self::TaskTerminal(TaskTerminal {
            task_id: task.id,
            status: task.status,
            progress: task.progress.clone(),
            processing_time_ms: task.processing_time_ms,
            result,
            error: task.error.clone(),
            completed_at: task.completed_at,
        })
    }

    /// Wire name of this event
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::QueueSnapshot(_) => QUEUE_SNAPSHOT,
            Self::TaskStarted(_) => TASK_STARTED,
            Self::TaskProgress(_) => TASK_PROGRESS,
            Self::TaskTerminal(_) => TASK_TERMINAL,
        }
    }

    /// Task the event is about, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::QueueSnapshot(_) => None,
            Self::TaskStarted(e) => Some(e.task_id),
            Self::TaskProgress(e) => Some(e.task_id),
            Self::TaskTerminal(e) => Some(e.task_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskRequest;
    use serde_json::json;

    fn processing_task() -> TaskRecord {
        let mut task = TaskRecord::from_request(TaskRequest::new("owner", json!({})));
        task.mark_processing(Utc::now());
        task
    }

    #[test]
    fn test_event_type_matches_wire_tag() {
        let task = processing_task();
        let event = SchedulerEvent::task_progress(&task, Utc::now());

        assert_eq!(event.event_type(), TASK_PROGRESS);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], TASK_PROGRESS);
        assert_eq!(value["task_id"], json!(task.id));
    }

    #[test]
    fn test_task_started_requires_start_time() {
        let pending = TaskRecord::from_request(TaskRequest::new("owner", json!({})));
        assert!(SchedulerEvent::task_started(&pending).is_none());

        let event = SchedulerEvent::task_started(&processing_task()).unwrap();
        assert_eq!(event.event_type(), TASK_STARTED);
    }

    #[test]
    fn test_terminal_event_carries_error() {
        let mut task = processing_task();
        task.mark_failed(Utc::now(), "boom");

        let event = SchedulerEvent::task_terminal(&task, None);
        match &event {
            SchedulerEvent::TaskTerminal(terminal) => {
                assert_eq!(terminal.status, TaskStatus::Failed);
                assert_eq!(terminal.error.as_deref(), Some("boom"));
                assert!(terminal.result.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(event.task_id(), Some(task.id));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], TASK_TERMINAL);
        assert!(value.get("result").is_none());
    }
}
