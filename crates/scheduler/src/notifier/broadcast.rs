//! In-process rooms backed by tokio broadcast channels

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{NotificationTransport, NotifyError};
use crate::events::SchedulerEvent;

const DEFAULT_ROOM_CAPACITY: usize = 256;

/// One broadcast room per owner
///
/// Subscribers that fall behind by more than the room capacity observe a
/// `Lagged` error and skip ahead. Publishing to a room nobody listens to is
/// not an error.
///
/// # Example
///
/// ```
/// use conveyor_scheduler::BroadcastTransport;
///
/// let transport = BroadcastTransport::new();
/// let events = transport.subscribe("user-42");
/// assert_eq!(transport.subscriber_count("user-42"), 1);
/// # drop(events);
/// ```
#[derive(Debug)]
pub struct BroadcastTransport {
    rooms: DashMap<String, broadcast::Sender<SchedulerEvent>>,
    capacity: usize,
}

impl Default for BroadcastTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastTransport {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ROOM_CAPACITY)
    }

    /// Create a transport whose rooms buffer `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Join the room of `owner_id`
    pub fn subscribe(&self, owner_id: &str) -> broadcast::Receiver<SchedulerEvent> {
        self.rooms
            .entry(owner_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, owner_id: &str) -> usize {
        self.rooms
            .get(owner_id)
            .map(|room| room.receiver_count())
            .unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl NotificationTransport for BroadcastTransport {
    fn publish(&self, owner_id: &str, event: &SchedulerEvent) -> Result<(), NotifyError> {
        let delivered = match self.rooms.get(owner_id) {
            Some(room) => room.send(event.clone()).is_ok(),
            None => return Ok(()),
        };

        // Everyone left; forget the room
        if !delivered {
            self.rooms
                .remove_if(owner_id, |_, room| room.receiver_count() == 0);
        }

        Ok(())
    }

    fn close(&self) {
        self.rooms.clear();
    }
}
