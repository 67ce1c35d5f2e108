use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-employee schedule events. Backs LISTEN/NOTIFY on
/// the wire and in-app notification dropdowns in embedding processes.
/// Delivery is fire-and-forget: a send with no listeners is a no-op and a
/// lagging listener never blocks the write path.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for an employee. Creates the channel if needed.
    pub fn subscribe(&self, employee_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(employee_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, employee_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&employee_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when an employee is deleted).
    pub fn remove(&self, employee_id: &Ulid) {
        self.channels.remove(employee_id);
    }
}
