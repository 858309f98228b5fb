//! Shared dispatch state
//!
//! Everything an admission decision reads or writes lives in one struct
//! behind one lock: the queue, the in-flight set and the controller.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::config::RetentionConfig;
use crate::controller::ConcurrencyController;
use crate::events::{OwnerStats, QueueSnapshot};
use crate::queue::PriorityQueue;
use crate::task::{TaskId, TaskRecord, TaskSummary};

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Constructed; submissions are admitted but timers are not armed
    Idle,
    /// Heartbeat and controller timers are running
    Running,
    /// Stopped for good; submissions are rejected
    Stopped,
}

/// A task occupying a concurrency slot
///
/// The record turns terminal before the slot is released (history is
/// written in between), so callers filter on `is_terminal()` where only
/// running work is wanted.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub record: TaskRecord,
    pub abort: Option<AbortHandle>,
}

pub(crate) struct DispatchState {
    pub lifecycle: SchedulerState,
    pub queue: PriorityQueue,
    pub in_flight: HashMap<TaskId, InFlight>,
    pub controller: ConcurrencyController,
    pub finished: FinishedCache,
}

impl DispatchState {
    pub fn new(controller: ConcurrencyController, retention: &RetentionConfig) -> Self {
        Self {
            lifecycle: SchedulerState::Idle,
            queue: PriorityQueue::new(),
            in_flight: HashMap::new(),
            controller,
            finished: FinishedCache::new(retention.finished_capacity, retention.finished_ttl),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.controller.limit()
    }

    pub fn get(&self, task_id: TaskId) -> Option<&TaskRecord> {
        self.in_flight
            .get(&task_id)
            .map(|entry| &entry.record)
            .or_else(|| self.queue.get(task_id))
            .or_else(|| self.finished.get(task_id))
    }

    /// Running tasks of one owner (oldest admission first), then queued ones
    pub fn owner_tasks(&self, owner_id: &str) -> Vec<&TaskRecord> {
        let mut running: Vec<&TaskRecord> = self
            .in_flight
            .values()
            .map(|entry| &entry.record)
            .filter(|t| t.owner_id == owner_id && !t.is_terminal())
            .collect();
        running.sort_by_key(|t| (t.started_at, t.id));

        running
            .into_iter()
            .chain(self.queue.iter().filter(|t| t.owner_id == owner_id))
            .collect()
    }

    pub fn owner_stats(&self, owner_id: &str) -> OwnerStats {
        OwnerStats {
            owner_id: owner_id.to_string(),
            queued: self
                .queue
                .iter()
                .filter(|t| t.owner_id == owner_id)
                .count(),
            in_flight: self
                .in_flight
                .values()
                .filter(|entry| entry.record.owner_id == owner_id)
                .count(),
            concurrency_limit: self.controller.limit(),
            average_latency_ms: self.controller.average_latency().as_millis() as u64,
        }
    }

    pub fn queue_snapshot(&self, owner_id: &str, now: DateTime<Utc>) -> QueueSnapshot {
        QueueSnapshot {
            stats: self.owner_stats(owner_id),
            total_queued: self.queue.len(),
            total_in_flight: self.in_flight.len(),
            tasks: self
                .owner_tasks(owner_id)
                .into_iter()
                .map(|t| t.summary(now))
                .collect(),
        }
    }

    /// Running tasks then queued tasks, across all owners
    pub fn summaries(&self, now: DateTime<Utc>) -> Vec<TaskSummary> {
        let mut running: Vec<&TaskRecord> = self
            .in_flight
            .values()
            .map(|entry| &entry.record)
            .filter(|t| !t.is_terminal())
            .collect();
        running.sort_by_key(|t| (t.started_at, t.id));

        running
            .into_iter()
            .chain(self.queue.iter())
            .map(|t| t.summary(now))
            .collect()
    }
}

/// Recently finished records kept for status queries
///
/// Bounded by capacity (oldest evicted first) and by age.
pub(crate) struct FinishedCache {
    order: VecDeque<(Instant, TaskId)>,
    records: HashMap<TaskId, TaskRecord>,
    capacity: usize,
    ttl: Duration,
}

impl FinishedCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            order: VecDeque::new(),
            records: HashMap::new(),
            capacity,
            ttl,
        }
    }

    pub fn insert(&mut self, record: TaskRecord) {
        if self.capacity == 0 {
            return;
        }
        let task_id = record.id;
        if self.records.insert(task_id, record).is_none() {
            self.order.push_back((Instant::now(), task_id));
        }
        while self.order.len() > self.capacity {
            if let Some((_, evicted)) = self.order.pop_front() {
                self.records.remove(&evicted);
            }
        }
    }

    pub fn get(&self, task_id: TaskId) -> Option<&TaskRecord> {
        self.records.get(&task_id)
    }

    /// Drop records older than the TTL; returns how many were removed
    pub fn prune(&mut self) -> usize {
        let mut removed = 0;
        while let Some(&(inserted_at, task_id)) = self.order.front() {
            if inserted_at.elapsed() < self.ttl {
                break;
            }
            self.order.pop_front();
            self.records.remove(&task_id);
            removed += 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.records.clear();
    }
}
