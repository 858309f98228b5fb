//! Fan-out of scheduler events to task owners
//!
//! This module provides:
//! - [`NotificationTransport`] - Pluggable pub/sub backend keyed by owner id
//! - [`ProgressNotifier`] - Best-effort publisher used by the dispatcher
//! - [`BroadcastTransport`] - In-process rooms backed by tokio broadcast channels
//! - [`NoopTransport`] - Discards everything
//!
//! Delivery failures are logged and never reach the scheduler.

mod broadcast;

use std::sync::Arc;

use tracing::{trace, warn};

use crate::events::SchedulerEvent;

pub use broadcast::BroadcastTransport;

/// Notification delivery errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifyError {
    /// The backend failed to deliver
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The transport has been closed
    #[error("transport closed")]
    Closed,
}

/// Pub/sub backend for scheduler events
///
/// `publish` is called while the dispatcher is settling or admitting tasks,
/// so implementations must not block.
pub trait NotificationTransport: Send + Sync + 'static {
    /// Deliver an event to every subscriber of `owner_id`
    fn publish(&self, owner_id: &str, event: &SchedulerEvent) -> Result<(), NotifyError>;

    /// Release all subscriptions
    fn close(&self) {}
}

/// Transport that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransport;

impl NotificationTransport for NoopTransport {
    fn publish(&self, _owner_id: &str, _event: &SchedulerEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Best-effort event publisher
#[derive(Clone)]
pub struct ProgressNotifier {
    transport: Arc<dyn NotificationTransport>,
}

impl ProgressNotifier {
    pub fn new(transport: Arc<dyn NotificationTransport>) -> Self {
        Self { transport }
    }

    /// Publish an event, logging (and otherwise ignoring) failures
    pub fn publish(&self, owner_id: &str, event: SchedulerEvent) {
        match self.transport.publish(owner_id, &event) {
            Ok(()) => trace!(
                owner_id = %owner_id,
                event_type = event.event_type(),
                "Published event"
            ),
            Err(e) => warn!(
                owner_id = %owner_id,
                event_type = event.event_type(),
                task_id = ?event.task_id(),
                error = %e,
                "Failed to publish event"
            ),
        }
    }

    /// Release all subscriptions held by the transport
    pub fn close(&self) {
        self.transport.close();
    }
}

impl std::fmt::Debug for ProgressNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressNotifier").finish_non_exhaustive()
    }
}
