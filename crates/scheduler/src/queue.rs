//! Two-tier priority queue for tasks awaiting admission
//!
//! HIGH tasks go to the head, everything else to the tail. Order within a
//! tier is FIFO; there is no starvation prevention for the tail tier.

use std::collections::VecDeque;

use crate::task::{TaskId, TaskPriority, TaskRecord};

/// Ordered holding area for pending tasks
#[derive(Debug, Default)]
pub struct PriorityQueue {
    tasks: VecDeque<TaskRecord>,
    /// Number of HIGH tasks currently at the head
    high_len: usize,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task according to its priority
    pub fn enqueue(&mut self, task: TaskRecord) {
        match task.priority {
            TaskPriority::High => {
                // Behind earlier HIGH tasks so the tier stays FIFO
                self.tasks.insert(self.high_len, task);
                self.high_len += 1;
            }
            TaskPriority::Normal | TaskPriority::Low => self.tasks.push_back(task),
        }
    }

    /// Pop the head of the queue
    pub fn dequeue_next(&mut self) -> Option<TaskRecord> {
        let task = self.tasks.pop_front()?;
        if task.priority == TaskPriority::High {
            self.high_len -= 1;
        }
        Some(task)
    }

    /// Remove a specific task (cancel-if-queued)
    pub fn remove(&mut self, task_id: TaskId) -> Option<TaskRecord> {
        let index = self.tasks.iter().position(|t| t.id == task_id)?;
        let task = self.tasks.remove(index)?;
        if task.priority == TaskPriority::High {
            self.high_len -= 1;
        }
        Some(task)
    }

    pub fn get(&self, task_id: TaskId) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.high_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskRequest;
    use serde_json::json;

    fn task(label: &str, priority: TaskPriority) -> TaskRecord {
        TaskRecord::from_request(
            TaskRequest::new("owner", json!({ "label": label })).with_priority(priority),
        )
    }

    fn drain_labels(queue: &mut PriorityQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.dequeue_next())
            .map(|t| t.payload["label"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_normal_is_fifo() {
        let mut queue = PriorityQueue::new();
        queue.enqueue(task("a", TaskPriority::Normal));
        queue.enqueue(task("b", TaskPriority::Normal));
        queue.enqueue(task("c", TaskPriority::Normal));

        assert_eq!(drain_labels(&mut queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_high_jumps_ahead() {
        let mut queue = PriorityQueue::new();
        queue.enqueue(task("n1", TaskPriority::Normal));
        queue.enqueue(task("n2", TaskPriority::Normal));
        queue.enqueue(task("h1", TaskPriority::High));

        assert_eq!(drain_labels(&mut queue), vec!["h1", "n1", "n2"]);
    }

    #[test]
    fn test_high_tier_stays_fifo() {
        let mut queue = PriorityQueue::new();
        queue.enqueue(task("n1", TaskPriority::Normal));
        queue.enqueue(task("h1", TaskPriority::High));
        queue.enqueue(task("h2", TaskPriority::High));
        queue.enqueue(task("n2", TaskPriority::Normal));

        assert_eq!(drain_labels(&mut queue), vec!["h1", "h2", "n1", "n2"]);
    }

    #[test]
    fn test_low_treated_as_normal() {
        let mut queue = PriorityQueue::new();
        queue.enqueue(task("l1", TaskPriority::Low));
        queue.enqueue(task("n1", TaskPriority::Normal));

        assert_eq!(drain_labels(&mut queue), vec!["l1", "n1"]);
    }

    #[test]
    fn test_remove_keeps_high_boundary() {
        let mut queue = PriorityQueue::new();
        let h1 = task("h1", TaskPriority::High);
        let h1_id = h1.id;
        queue.enqueue(h1);
        queue.enqueue(task("n1", TaskPriority::Normal));

        assert!(queue.remove(h1_id).is_some());
        assert!(queue.remove(h1_id).is_none());

        queue.enqueue(task("h2", TaskPriority::High));
        assert_eq!(drain_labels(&mut queue), vec!["h2", "n1"]);
    }

    #[test]
    fn test_empty_queue() {
        let mut queue = PriorityQueue::new();
        assert!(queue.is_empty());
        assert!(queue.dequeue_next().is_none());

        queue.enqueue(task("a", TaskPriority::High));
        queue.clear();
        assert_eq!(queue.len(), 0);
        queue.enqueue(task("b", TaskPriority::Normal));
        queue.enqueue(task("c", TaskPriority::High));
        assert_eq!(drain_labels(&mut queue), vec!["c", "b"]);
    }
}
