use std::sync::Arc;

use tokio::sync::broadcast;

use netzap_types::events::HubEvent;

/// Fans hub notifications out to every subscriber.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Subscribers that fall more than this far behind see `Lagged`.
    broadcast_tx: broadcast::Sender<HubEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to hub events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event. Having no subscribers is not an error.
    pub fn broadcast(&self, event: HubEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
