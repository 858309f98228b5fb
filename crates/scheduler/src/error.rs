//! Scheduler error types

use crate::config::ConfigError;

/// Reasons a submission is refused
///
/// This is the only failure surfaced synchronously to callers; everything
/// that happens after admission is reported through the task's own status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// Owner id missing or blank
    #[error("owner id must not be empty")]
    InvalidOwner,

    /// Payload missing (null)
    #[error("task payload is required")]
    MissingPayload,

    /// The scheduler has been stopped
    #[error("scheduler is stopped")]
    Stopped,
}

/// Scheduler construction and lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Constructed outside a tokio runtime
    #[error("scheduler must be created inside a tokio runtime")]
    NoRuntime,

    /// `start()` called twice
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// `start()` called after `stop()`
    #[error("scheduler has been stopped")]
    Stopped,
}
