use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::types::BusEvent;

/// In-process pub/sub for executor events.
///
/// Backed by a Tokio broadcast channel; publishing with no subscribers is not
/// an error. Cloning shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: BusEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a stream. Dropping the stream unsubscribes.
    pub fn stream(&self) -> BroadcastStream<BusEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
