//! Worker contract
//!
//! The scheduler never looks inside a payload. It hands it to a
//! [`TaskWorker`], treats `Ok` as COMPLETED and `Err` as FAILED, and forwards
//! the result to history.
//!
//! The scheduler imposes no execution timeout: a worker that never returns
//! holds its concurrency slot forever. Wrap slow or untrusted workers in a
//! [`TimeoutWorker`].

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Error returned by a worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerError {
    /// Human-readable message, stored as the task's error
    pub message: String,

    /// Error kind for programmatic handling
    pub kind: Option<String>,

    /// Additional error details (for debugging)
    pub details: Option<serde_json::Value>,
}

impl WorkerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            details: None,
        }
    }

    /// Worker exceeded a deadline imposed by [`TimeoutWorker`]
    pub fn timeout(limit: Duration) -> Self {
        Self::new(format!("worker timed out after {:?}", limit)).with_kind("timeout")
    }

    /// Set the error kind
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkerError {}

impl From<anyhow::Error> for WorkerError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for WorkerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for WorkerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Successful worker result
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerOutput {
    /// Domain result summary, forwarded to history and the terminal event
    pub summary: serde_json::Value,

    /// Completion message shown to the owner
    pub message: Option<String>,
}

impl WorkerOutput {
    pub fn new(summary: serde_json::Value) -> Self {
        Self {
            summary,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Receives progress reports for in-flight tasks
pub(crate) trait ProgressSink: Send + Sync {
    fn report(&self, task_id: TaskId, current: u32, total: u32, message: String);
    fn annotate(&self, task_id: TaskId, key: String, value: serde_json::Value);
}

/// Handle passed to a worker for reporting progress
///
/// Reports after the task has settled, or after the scheduler is gone, are
/// ignored.
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: TaskId,
    sink: Option<Weak<dyn ProgressSink>>,
}

impl ProgressReporter {
    pub(crate) fn new(task_id: TaskId, sink: Weak<dyn ProgressSink>) -> Self {
        Self {
            task_id,
            sink: Some(sink),
        }
    }

    /// A reporter that discards everything, for driving workers directly
    pub fn detached(task_id: TaskId) -> Self {
        Self {
            task_id,
            sink: None,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Update progress; `current` is clamped to `total`
    pub fn report(&self, current: u32, total: u32, message: impl Into<String>) {
        if let Some(sink) = self.sink.as_ref().and_then(Weak::upgrade) {
            sink.report(self.task_id, current, total, message.into());
        }
    }

    /// Attach a metadata flag that is forwarded to history
    pub fn annotate(&self, key: impl Into<String>, value: serde_json::Value) {
        if let Some(sink) = self.sink.as_ref().and_then(Weak::upgrade) {
            sink.annotate(self.task_id, key.into(), value);
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("task_id", &self.task_id)
            .field("attached", &self.sink.is_some())
            .finish()
    }
}

/// Processes task payloads
///
/// # Example
///
/// ```ignore
/// use conveyor_scheduler::prelude::*;
///
/// struct Classifier;
///
/// #[async_trait]
/// impl TaskWorker for Classifier {
///     async fn process(
///         &self,
///         payload: serde_json::Value,
///         progress: ProgressReporter,
///     ) -> Result<WorkerOutput, WorkerError> {
///         progress.report(0, 1, "Classifying");
///         let label = classify(&payload).await?;
///         Ok(WorkerOutput::new(json!({ "label": label })))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskWorker: Send + Sync + 'static {
    async fn process(
        &self,
        payload: serde_json::Value,
        progress: ProgressReporter,
    ) -> Result<WorkerOutput, WorkerError>;
}

#[async_trait]
impl<W: TaskWorker + ?Sized> TaskWorker for Arc<W> {
    async fn process(
        &self,
        payload: serde_json::Value,
        progress: ProgressReporter,
    ) -> Result<WorkerOutput, WorkerError> {
        (**self).process(payload, progress).await
    }
}

/// Worker backed by an async closure, see [`worker_fn`]
pub struct FnWorker<F> {
    f: F,
}

/// Adapt an async closure into a [`TaskWorker`]
///
/// ```
/// use conveyor_scheduler::{worker_fn, WorkerOutput};
///
/// let worker = worker_fn(|payload, _progress| async move {
///     Ok(WorkerOutput::new(payload))
/// });
/// # let _ = worker;
/// ```
pub fn worker_fn<F, Fut>(f: F) -> FnWorker<F>
where
    F: Fn(serde_json::Value, ProgressReporter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WorkerOutput, WorkerError>> + Send + 'static,
{
    FnWorker { f }
}

#[async_trait]
impl<F, Fut> TaskWorker for FnWorker<F>
where
    F: Fn(serde_json::Value, ProgressReporter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WorkerOutput, WorkerError>> + Send + 'static,
{
    async fn process(
        &self,
        payload: serde_json::Value,
        progress: ProgressReporter,
    ) -> Result<WorkerOutput, WorkerError> {
        (self.f)(payload, progress).await
    }
}

/// Fails the wrapped worker with a `timeout` error once `limit` elapses
pub struct TimeoutWorker<W> {
    inner: W,
    limit: Duration,
}

impl<W: TaskWorker> TimeoutWorker<W> {
    pub fn new(inner: W, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

#[async_trait]
impl<W: TaskWorker> TaskWorker for TimeoutWorker<W> {
    async fn process(
        &self,
        payload: serde_json::Value,
        progress: ProgressReporter,
    ) -> Result<WorkerOutput, WorkerError> {
        match tokio::time::timeout(self.limit, self.inner.process(payload, progress)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::timeout(self.limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<(TaskId, u32, u32, String)>>,
        notes: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl ProgressSink for RecordingSink {
        fn report(&self, task_id: TaskId, current: u32, total: u32, message: String) {
            self.reports.lock().push((task_id, current, total, message));
        }

        fn annotate(&self, _task_id: TaskId, key: String, value: serde_json::Value) {
            self.notes.lock().push((key, value));
        }
    }

    #[test]
    fn test_worker_error_from_str() {
        let err: WorkerError = "boom".into();
        assert_eq!(err.to_string(), "boom");
        assert!(err.kind.is_none());
    }

    #[test]
    fn test_worker_error_timeout_kind() {
        let err = WorkerError::timeout(Duration::from_secs(2));
        assert_eq!(err.kind.as_deref(), Some("timeout"));
        assert!(err.message.contains("timed out"));
    }

    #[test]
    fn test_reporter_forwards_to_sink() {
        let sink: Arc<RecordingSink> = Arc::new(RecordingSink::default());
        let dyn_sink: Arc<dyn ProgressSink> = sink.clone();
        let task_id = Uuid::now_v7();
        let reporter = ProgressReporter::new(task_id, Arc::downgrade(&dyn_sink));

        reporter.report(1, 3, "step one");
        reporter.annotate("flagged", json!(true));

        assert_eq!(
            sink.reports.lock().as_slice(),
            &[(task_id, 1, 3, "step one".to_string())]
        );
        assert_eq!(sink.notes.lock().len(), 1);
    }

    #[test]
    fn test_reporter_ignores_dropped_sink() {
        let dyn_sink: Arc<dyn ProgressSink> = Arc::new(RecordingSink::default());
        let reporter = ProgressReporter::new(Uuid::now_v7(), Arc::downgrade(&dyn_sink));
        drop(dyn_sink);

        reporter.report(1, 1, "nobody listening");
        ProgressReporter::detached(Uuid::now_v7()).report(0, 1, "detached");
    }

    #[tokio::test]
    async fn test_worker_fn() {
        let worker = worker_fn(|payload, _progress| async move {
            Ok(WorkerOutput::new(json!({ "echo": payload })).with_message("done"))
        });

        let output = worker
            .process(json!(7), ProgressReporter::detached(Uuid::now_v7()))
            .await
            .unwrap();

        assert_eq!(output.summary, json!({ "echo": 7 }));
        assert_eq!(output.message.as_deref(), Some("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_worker_expires() {
        let slow = worker_fn(|_payload, _progress| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(WorkerOutput::default())
        });
        let worker = TimeoutWorker::new(slow, Duration::from_secs(1));

        let err = worker
            .process(json!({}), ProgressReporter::detached(Uuid::now_v7()))
            .await
            .unwrap_err();

        assert_eq!(err.kind.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_timeout_worker_passes_through() {
        let fast = worker_fn(|_payload, _progress| async move { Err(WorkerError::new("nope")) });
        let worker = TimeoutWorker::new(fast, Duration::from_secs(1));

        let err = worker
            .process(json!({}), ProgressReporter::detached(Uuid::now_v7()))
            .await
            .unwrap_err();

        assert_eq!(err.message, "nope");
    }
}
