use std::sync::Arc;

use tokio::sync::broadcast;

use oabridge_types::events::GatewayEvent;

/// Fan-out hub for live dashboard pushes. Subscriber absence is never
/// an error: events flow into a broadcast channel and are dropped when
/// nobody listens, since the event log remains the source of truth.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<GatewayEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to the full event stream. Per-account filtering
    /// happens at the connection, against its subscription set.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Fire-and-forget publish.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
