use tokio::sync::broadcast;

use crate::model::DomainEvent;

pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// In-process publish point for committed reservation changes.
///
/// Publishing never blocks: a reader that falls more than `capacity` events
/// behind loses the oldest ones and sees `RecvError::Lagged` on its next recv.
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to every current subscriber. Returns how many received it;
    /// zero when nobody is listening.
    pub fn publish(&self, event: DomainEvent) -> usize {
        metrics::counter!(crate::observability::EVENTS_PUBLISHED_TOTAL).increment(1);
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
