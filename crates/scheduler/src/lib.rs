//! # Conveyor Scheduler
//!
//! An in-process task scheduler that runs opaque units of work with a
//! self-tuning concurrency limit.
//!
//! ## Features
//!
//! - **Two-tier priority**: HIGH tasks are admitted ahead of everything else
//! - **Adaptive concurrency**: the admission limit follows recent task latency and backlog
//! - **Live events**: lifecycle, progress and queue snapshots fanned out per owner
//! - **Best-effort history**: terminal outcomes persisted without blocking failures
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                             │
//! │  (priority queue, in-flight set, admission, settlement)     │
//! └─────────────────────────────────────────────────────────────┘
//!        │                     │                      │
//!        ▼                     ▼                      ▼
//! ┌──────────────┐   ┌───────────────────┐   ┌──────────────────┐
//! │  TaskWorker  │   │ ConcurrencyCtrl   │   │ ProgressNotifier │
//! │ (your code)  │   │ (latency window)  │   │ (per-owner rooms)│
//! └──────────────┘   └───────────────────┘   └──────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HistoryStore                            │
//! │  (in-memory or PostgreSQL: task_history)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use conveyor_scheduler::prelude::*;
//!
//! let transport = Arc::new(BroadcastTransport::new());
//! let scheduler = Scheduler::builder(worker_fn(|payload, progress| async move {
//!     progress.report(1, 2, "Halfway");
//!     Ok(WorkerOutput::new(payload))
//! }))
//! .with_transport(transport.clone())
//! .with_history_store(Arc::new(InMemoryHistoryStore::new()))
//! .build()?;
//!
//! scheduler.start()?;
//! let task_id = scheduler.submit(TaskRequest::new("user-42", json!({ "doc": 7 })))?;
//! ```

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod history;
pub mod notifier;
pub mod queue;
pub mod task;
pub mod telemetry;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{RetentionConfig, SchedulerConfig};
    pub use crate::controller::ControllerConfig;
    pub use crate::dispatcher::{AggregateStats, Scheduler, SchedulerBuilder, SchedulerState};
    pub use crate::error::{SchedulerError, SubmitError};
    pub use crate::events::{OwnerStats, SchedulerEvent};
    pub use crate::history::{HistoryError, HistoryRecord, HistoryStore, InMemoryHistoryStore};
    pub use crate::notifier::{BroadcastTransport, NotificationTransport, NotifyError};
    pub use crate::task::{TaskId, TaskPriority, TaskRecord, TaskRequest, TaskStatus};
    pub use crate::worker::{
        worker_fn, ProgressReporter, TaskWorker, TimeoutWorker, WorkerError, WorkerOutput,
    };
    pub use async_trait::async_trait;
    pub use serde_json::json;
    pub use std::sync::Arc;
}

// Re-export key types at crate root
pub use config::{ConfigError, RetentionConfig, SchedulerConfig};
pub use controller::{Adjustment, AdjustmentReason, ConcurrencyController, ControllerConfig};
pub use dispatcher::{AggregateStats, Scheduler, SchedulerBuilder, SchedulerState};
pub use error::{SchedulerError, SubmitError};
pub use events::{OwnerStats, QueueSnapshot, SchedulerEvent};
#[cfg(feature = "postgres")]
pub use history::PostgresHistoryStore;
pub use history::{HistoryError, HistoryRecord, HistoryRecorder, HistoryStore, InMemoryHistoryStore};
pub use notifier::{BroadcastTransport, NoopTransport, NotificationTransport, NotifyError};
pub use task::{TaskId, TaskPriority, TaskProgress, TaskRecord, TaskRequest, TaskStatus, TaskSummary};
pub use worker::{
    worker_fn, FnWorker, ProgressReporter, TaskWorker, TimeoutWorker, WorkerError, WorkerOutput,
};
