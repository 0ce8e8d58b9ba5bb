use std::sync::Arc;

use tokio::sync::broadcast;

use parley_types::events::GatewayEvent;

const BROADCAST_CAPACITY: usize = 1024;

/// Fans events out to every connected gateway client.
/// Per-channel filtering happens in each connection's send loop.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<GatewayEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    /// Events published while nobody is connected are dropped.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Number of live receivers (one per connected client).
    pub fn connection_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let dispatcher = Dispatcher::new();
        dispatcher.broadcast(GatewayEvent::Ready { user_id: Uuid::nil() });

        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.clone().subscribe();
        assert_eq!(dispatcher.connection_count(), 2);

        let user_id = Uuid::new_v4();
        dispatcher.broadcast(GatewayEvent::Ready { user_id });

        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                GatewayEvent::Ready { user_id: got } => assert_eq!(got, user_id),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }
}
