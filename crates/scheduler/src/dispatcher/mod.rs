//! Dispatcher: admission, settlement and the public scheduler handle
//!
//! All dispatch state sits behind one lock. Every operation that changes the
//! in-flight set also runs admission before releasing the lock, so the
//! scheduler is never observed with free capacity, a non-empty queue and an
//! idle slot at the same time. Events are collected under the lock and
//! published after it is released.

mod state;
mod timers;

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SchedulerConfig;
use crate::controller::{Adjustment, ConcurrencyController};
use crate::error::{SchedulerError, SubmitError};
use crate::events::{OwnerStats, SchedulerEvent};
use crate::history::{HistoryRecord, HistoryRecorder, HistoryStore};
use crate::notifier::{NoopTransport, NotificationTransport, ProgressNotifier};
use crate::task::{TaskId, TaskRecord, TaskRequest, TaskSummary};
use crate::worker::{ProgressReporter, ProgressSink, TaskWorker, WorkerError, WorkerOutput};

use self::state::{DispatchState, InFlight};
pub use self::state::SchedulerState;

type Outbox = Vec<(String, SchedulerEvent)>;

/// Scheduler-wide statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub queue_size: usize,
    /// Occupied slots, including tasks whose history is still being written
    pub in_flight_count: usize,
    pub concurrency_limit: usize,
    pub average_latency_ms: u64,
    /// Running tasks first, then queued tasks in admission order
    pub tasks: Vec<TaskSummary>,
}

/// Builder for [`Scheduler`]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    worker: Arc<dyn TaskWorker>,
    transport: Arc<dyn NotificationTransport>,
    history: Option<Arc<dyn HistoryStore>>,
}

impl SchedulerBuilder {
    /// Set the configuration (defaults otherwise)
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the event transport (events are discarded otherwise)
    pub fn with_transport(mut self, transport: Arc<dyn NotificationTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Set the history store (terminal outcomes are not persisted otherwise)
    pub fn with_history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(store);
        self
    }

    /// Validate the configuration and bind to the current tokio runtime
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let history = self
            .history
            .map(|store| HistoryRecorder::new(store, self.config.history_save_timeout));
        let state = DispatchState::new(
            ConcurrencyController::new(self.config.controller.clone()),
            &self.config.retention,
        );

        let inner = Arc::new_cyclic(|this| Inner {
            config: self.config,
            state: Mutex::new(state),
            worker: self.worker,
            notifier: ProgressNotifier::new(self.transport),
            history,
            runtime,
            shutdown_tx,
            shutdown_rx,
            timers: Mutex::new(Vec::new()),
            this: this.clone(),
        });

        Ok(Scheduler { inner })
    }
}

/// Adaptive-concurrency task scheduler
///
/// Cheap to clone; all clones share the same queue and workers.
///
/// # Example
///
/// ```ignore
/// let transport = Arc::new(BroadcastTransport::new());
/// let scheduler = Scheduler::builder(MyWorker)
///     .with_transport(transport.clone())
///     .with_history_store(Arc::new(InMemoryHistoryStore::new()))
///     .build()?;
/// scheduler.start()?;
///
/// let mut events = transport.subscribe("user-42");
/// let task_id = scheduler.submit(
///     TaskRequest::new("user-42", json!({ "doc": 7 })).with_priority(TaskPriority::High),
/// )?;
///
/// scheduler.wait_for_quiescence(Duration::from_secs(60)).await;
/// scheduler.stop();
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Start building a scheduler around `worker`
    pub fn builder<W: TaskWorker>(worker: W) -> SchedulerBuilder {
        SchedulerBuilder {
            config: SchedulerConfig::default(),
            worker: Arc::new(worker),
            transport: Arc::new(NoopTransport),
            history: None,
        }
    }

    /// Enqueue a task and admit whatever fits
    ///
    /// Returns as soon as the task is queued; the outcome is observed through
    /// events or [`get_status`](Self::get_status).
    #[instrument(skip(self, request), fields(owner_id = %request.owner_id, priority = %request.priority))]
    pub fn submit(&self, request: TaskRequest) -> Result<TaskId, SubmitError> {
        request.validate()?;
        let task = TaskRecord::from_request(request);
        let task_id = task.id;
        let owner_id = task.owner_id.clone();

        let mut outbox = Outbox::new();
        let (snapshot, admitted) = {
            let mut state = self.inner.state.lock();
            if state.lifecycle == SchedulerState::Stopped {
                return Err(SubmitError::Stopped);
            }
            state.queue.enqueue(task);
            info!(%task_id, queue_size = state.queue.len(), "Task queued");

            let admitted = Inner::admit_locked(&mut state, &mut outbox);
            (state.queue_snapshot(&owner_id, Utc::now()), admitted)
        };

        self.inner
            .notifier
            .publish(&owner_id, SchedulerEvent::queue_snapshot(snapshot));
        self.inner.publish_all(outbox);
        self.inner.launch(admitted);

        Ok(task_id)
    }

    /// Remove a queued task; running or finished tasks are not affected
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let (owner_id, snapshot) = {
            let mut state = self.inner.state.lock();
            let Some(task) = state.queue.remove(task_id) else {
                return false;
            };
            info!(%task_id, owner_id = %task.owner_id, "Queued task cancelled");
            let snapshot = state.queue_snapshot(&task.owner_id, Utc::now());
            (task.owner_id, snapshot)
        };

        self.inner
            .notifier
            .publish(&owner_id, SchedulerEvent::queue_snapshot(snapshot));
        true
    }

    /// Current view of a task: queued, in flight, or recently finished
    pub fn get_status(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.inner.state.lock().get(task_id).cloned()
    }

    /// An owner's running tasks, then their queued tasks in admission order
    pub fn list_for_owner(&self, owner_id: &str) -> Vec<TaskRecord> {
        self.inner
            .state
            .lock()
            .owner_tasks(owner_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn owner_stats(&self, owner_id: &str) -> OwnerStats {
        self.inner.state.lock().owner_stats(owner_id)
    }

    pub fn aggregate_stats(&self) -> AggregateStats {
        let state = self.inner.state.lock();
        AggregateStats {
            queue_size: state.queue.len(),
            in_flight_count: state.in_flight.len(),
            concurrency_limit: state.controller.limit(),
            average_latency_ms: state.controller.average_latency().as_millis() as u64,
            tasks: state.summaries(Utc::now()),
        }
    }

    /// Current admission limit
    pub fn concurrency_limit(&self) -> usize {
        self.inner.state.lock().controller.limit()
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.state.lock().lifecycle
    }

    /// Run one controller evaluation immediately, outside the timer
    pub fn evaluate_now(&self) -> Adjustment {
        self.inner.evaluate()
    }

    /// Arm the heartbeat and controller timers
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<(), SchedulerError> {
        {
            let mut state = self.inner.state.lock();
            match state.lifecycle {
                SchedulerState::Running => return Err(SchedulerError::AlreadyRunning),
                SchedulerState::Stopped => return Err(SchedulerError::Stopped),
                SchedulerState::Idle => state.lifecycle = SchedulerState::Running,
            }
        }

        let config = &self.inner.config;
        let mut timers = self.inner.timers.lock();
        timers.push(timers::spawn_heartbeat_loop(
            &self.inner,
            config.heartbeat_interval,
            self.inner.shutdown_rx.clone(),
        ));
        timers.push(timers::spawn_evaluation_loop(
            &self.inner,
            config.evaluation_interval,
            self.inner.shutdown_rx.clone(),
        ));

        info!(
            concurrency_limit = self.concurrency_limit(),
            heartbeat_interval_ms = config.heartbeat_interval.as_millis() as u64,
            evaluation_interval_ms = config.evaluation_interval.as_millis() as u64,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop timers, abort running workers and drop all queued work
    ///
    /// Aborted tasks get no terminal event and no history record. Calling
    /// this more than once is a no-op.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        let (dropped, aborted) = {
            let mut state = self.inner.state.lock();
            if state.lifecycle == SchedulerState::Stopped {
                debug!("Scheduler already stopped");
                return;
            }
            state.lifecycle = SchedulerState::Stopped;

            let dropped = state.queue.len();
            state.queue.clear();

            let aborted = state.in_flight.len();
            for (_, entry) in state.in_flight.drain() {
                if let Some(abort) = entry.abort {
                    abort.abort();
                }
            }
            state.finished.clear();
            (dropped, aborted)
        };

        let _ = self.inner.shutdown_tx.send(true);
        for handle in self.inner.timers.lock().drain(..) {
            handle.abort();
        }
        self.inner.notifier.close();

        info!(
            dropped_queued = dropped,
            aborted_in_flight = aborted,
            "Scheduler stopped"
        );
    }

    /// Wait until nothing is in flight; `false` if `timeout` elapsed first
    ///
    /// A timeout too large to represent as a deadline waits indefinitely.
    #[instrument(skip(self))]
    pub async fn wait_for_quiescence(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let poll = self.inner.config.quiescence_poll_interval;

        loop {
            let in_flight = self.inner.state.lock().in_flight.len();
            if in_flight == 0 {
                return true;
            }

            let nap = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(in_flight, "Timed out waiting for quiescence");
                        return false;
                    }
                    poll.min(deadline - now)
                }
                None => poll,
            };
            tokio::time::sleep(nap).await;
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Scheduler")
            .field("state", &state.lifecycle)
            .field("queued", &state.queue.len())
            .field("in_flight", &state.in_flight.len())
            .field("concurrency_limit", &state.controller.limit())
            .finish()
    }
}

/// A task moved into a slot whose worker has not been spawned yet
struct Admitted {
    task_id: TaskId,
    payload: serde_json::Value,
}

struct Inner {
    config: SchedulerConfig,
    state: Mutex<DispatchState>,
    worker: Arc<dyn TaskWorker>,
    notifier: ProgressNotifier,
    history: Option<HistoryRecorder>,
    runtime: Handle,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    timers: Mutex<Vec<JoinHandle<()>>>,
    this: Weak<Inner>,
}

impl Inner {
    /// Fill free slots from the queue, highest priority first
    fn admit_locked(state: &mut DispatchState, outbox: &mut Outbox) -> Vec<Admitted> {
        let mut admitted = Vec::new();
        if state.lifecycle == SchedulerState::Stopped {
            return admitted;
        }

        while state.has_capacity() {
            let Some(mut task) = state.queue.dequeue_next() else {
                break;
            };
            task.mark_processing(Utc::now());

            info!(
                task_id = %task.id,
                owner_id = %task.owner_id,
                priority = %task.priority,
                in_flight = state.in_flight.len() + 1,
                concurrency_limit = state.controller.limit(),
                "Task admitted"
            );

            if let Some(event) = SchedulerEvent::task_started(&task) {
                outbox.push((task.owner_id.clone(), event));
            }
            admitted.push(Admitted {
                task_id: task.id,
                payload: task.payload.clone(),
            });
            state.in_flight.insert(
                task.id,
                InFlight {
                    record: task,
                    abort: None,
                },
            );
        }

        admitted
    }

    /// Spawn workers for admitted tasks
    fn launch(self: &Arc<Self>, admitted: Vec<Admitted>) {
        for Admitted { task_id, payload } in admitted {
            let handle = self
                .runtime
                .spawn(Arc::clone(self).run_task(task_id, payload));

            let mut state = self.state.lock();
            let stopped = state.lifecycle == SchedulerState::Stopped;
            match state.in_flight.get_mut(&task_id) {
                Some(entry) => entry.abort = Some(handle.abort_handle()),
                // Settled already, or stopped before the handle was stored
                None if stopped => handle.abort(),
                None => {}
            }
        }
    }

    async fn run_task(self: Arc<Self>, task_id: TaskId, payload: serde_json::Value) {
        let sink: Weak<dyn ProgressSink> = self.this.clone();
        let reporter = ProgressReporter::new(task_id, sink);

        let outcome = AssertUnwindSafe(self.worker.process(payload, reporter))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(%task_id, "Worker panicked");
                Err(WorkerError::new("worker panicked").with_kind("panic"))
            });

        self.settle(task_id, outcome).await;
    }

    /// Record the outcome, persist it, then free the slot
    async fn settle(self: &Arc<Self>, task_id: TaskId, outcome: Result<WorkerOutput, WorkerError>) {
        let now = Utc::now();

        let (owner_id, terminal, record) = {
            let mut state = self.state.lock();
            let DispatchState {
                in_flight,
                controller,
                ..
            } = &mut *state;
            let Some(entry) = in_flight.get_mut(&task_id) else {
                debug!(%task_id, "Task no longer in flight, skipping settlement");
                return;
            };
            let task = &mut entry.record;

            let result = match outcome {
                Ok(output) => {
                    task.mark_completed(now, output.message.unwrap_or_else(|| "Completed".to_string()));
                    Some(output.summary)
                }
                Err(err) => {
                    task.mark_failed(now, err.message);
                    None
                }
            };

            let processing_ms = task.processing_time_ms.unwrap_or(0).max(0);
            controller.record_latency(Duration::from_millis(processing_ms as u64));

            match &task.error {
                None => info!(
                    %task_id,
                    owner_id = %task.owner_id,
                    processing_time_ms = processing_ms,
                    "Task completed"
                ),
                Some(error) => warn!(
                    %task_id,
                    owner_id = %task.owner_id,
                    processing_time_ms = processing_ms,
                    error = %error,
                    "Task failed"
                ),
            }

            (
                task.owner_id.clone(),
                SchedulerEvent::task_terminal(task, result.clone()),
                HistoryRecord::from_task(task, result),
            )
        };

        self.notifier.publish(&owner_id, terminal);

        match &self.history {
            Some(history) => {
                history.record(record).await;
            }
            None => debug!(%task_id, "No history store configured"),
        }

        let mut outbox = Outbox::new();
        let (snapshot, admitted) = {
            let mut state = self.state.lock();
            let Some(entry) = state.in_flight.remove(&task_id) else {
                return;
            };
            state.finished.insert(entry.record);

            let admitted = Self::admit_locked(&mut state, &mut outbox);
            (state.queue_snapshot(&owner_id, Utc::now()), admitted)
        };

        self.notifier
            .publish(&owner_id, SchedulerEvent::queue_snapshot(snapshot));
        self.publish_all(outbox);
        self.launch(admitted);
    }

    fn heartbeat_tick(&self) {
        let now = Utc::now();
        let outbox: Outbox = {
            let state = self.state.lock();
            state
                .in_flight
                .values()
                .filter(|entry| !entry.record.is_terminal())
                .map(|entry| {
                    (
                        entry.record.owner_id.clone(),
                        SchedulerEvent::task_progress(&entry.record, now),
                    )
                })
                .collect()
        };
        self.publish_all(outbox);
    }

    fn evaluation_tick(self: &Arc<Self>) {
        self.evaluate();
    }

    fn evaluate(self: &Arc<Self>) -> Adjustment {
        let mut outbox = Outbox::new();
        let (adjustment, pruned, retained, queue_size, admitted) = {
            let mut state = self.state.lock();
            let queue_size = state.queue.len();
            let in_flight = state.in_flight.len();
            let adjustment = state.controller.evaluate(queue_size, in_flight);
            let pruned = state.finished.prune();
            let retained = state.finished.len();

            let admitted = if adjustment.increased() {
                Self::admit_locked(&mut state, &mut outbox)
            } else {
                Vec::new()
            };
            (adjustment, pruned, retained, queue_size, admitted)
        };

        if adjustment.changed() {
            info!(
                previous = adjustment.previous,
                current = adjustment.current,
                reason = ?adjustment.reason,
                queue_size,
                "Concurrency limit adjusted"
            );
        } else {
            debug!(
                concurrency_limit = adjustment.current,
                reason = ?adjustment.reason,
                queue_size,
                "Concurrency limit unchanged"
            );
        }
        if pruned > 0 {
            debug!(pruned, retained, "Pruned finished task records");
        }

        self.publish_all(outbox);
        self.launch(admitted);
        adjustment
    }

    fn publish_all(&self, outbox: Outbox) {
        for (owner_id, event) in outbox {
            self.notifier.publish(&owner_id, event);
        }
    }
}

impl ProgressSink for Inner {
    fn report(&self, task_id: TaskId, current: u32, total: u32, message: String) {
        let (owner_id, event) = {
            let mut state = self.state.lock();
            let Some(entry) = state.in_flight.get_mut(&task_id) else {
                return;
            };
            if entry.record.is_terminal() {
                return;
            }
            entry.record.progress.update(current, total, message);
            (
                entry.record.owner_id.clone(),
                SchedulerEvent::task_progress(&entry.record, Utc::now()),
            )
        };
        self.notifier.publish(&owner_id, event);
    }

    fn annotate(&self, task_id: TaskId, key: String, value: serde_json::Value) {
        let mut state = self.state.lock();
        if let Some(entry) = state.in_flight.get_mut(&task_id) {
            if !entry.record.is_terminal() {
                entry.record.metadata.insert(key, value);
            }
        }
    }
}
