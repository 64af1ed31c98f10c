use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use sparrow_types::events::GatewayEvent;

/// Control message delivered on a connection's private channel.
#[derive(Debug)]
pub enum ConnectionSignal {
    /// A newer connection authenticated as the same user; the receiver
    /// must close its socket.
    Superseded,
}

/// Owned registry of connected clients plus the event broadcast bus.
/// REST handlers publish here after a successful store write; delivery is
/// fire-and-forget and never fails the write path.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// All conversation-scoped events flow over one broadcast channel;
    /// each connection filters against its joined-room set.
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// user_id -> (conn_id, control channel). Last connection wins.
    connections: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<ConnectionSignal>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to the event bus. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish an event to every connection. At-most-once: nobody
    /// listening is not an error.
    pub fn publish(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register an authenticated connection. If the user already had one,
    /// the old connection is told to close (last-connection-wins, without
    /// leaking the superseded socket). Returns this connection's id and
    /// its control-channel receiver.
    pub async fn register_connection(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<ConnectionSignal>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let previous = {
            let mut connections = self.inner.connections.write().await;
            connections.insert(user_id, (conn_id, tx))
        };
        if let Some((old_conn, old_tx)) = previous {
            tracing::info!("Connection {} for user {} superseded", old_conn, user_id);
            let _ = old_tx.send(ConnectionSignal::Superseded);
        }

        (conn_id, rx)
    }

    /// Remove a connection from the registry, but only if `conn_id` still
    /// owns the entry — a superseding connection must not be evicted by
    /// its predecessor's cleanup.
    pub async fn unregister_connection(&self, user_id: Uuid, conn_id: Uuid) {
        let mut connections = self.inner.connections.write().await;
        if let Some((stored_conn_id, _)) = connections.get(&user_id) {
            if *stored_conn_id == conn_id {
                connections.remove(&user_id);
            }
        }
    }

    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        self.inner.connections.read().await.contains_key(&user_id)
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

    #[tokio::test]
    async fn superseding_signals_the_old_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (first_conn, mut first_rx) = dispatcher.register_connection(user).await;
        let (_second_conn, mut second_rx) = dispatcher.register_connection(user).await;

        match first_rx.recv().await {
            Some(ConnectionSignal::Superseded) => {}
            other => panic!("expected supersede signal, got {:?}", other),
        }
        assert!(second_rx.try_recv().is_err());

        // the stale connection's cleanup must not evict the new one
        dispatcher.unregister_connection(user, first_conn).await;
        assert!(dispatcher.is_connected(user).await);
    }

    #[tokio::test]
    async fn unregister_removes_own_entry() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (conn_id, _rx) = dispatcher.register_connection(user).await;
        assert!(dispatcher.is_connected(user).await);

        dispatcher.unregister_connection(user, conn_id).await;
        assert!(!dispatcher.is_connected(user).await);
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        let conversation_id = Uuid::new_v4();
        dispatcher.publish(GatewayEvent::MessageDeleted {
            conversation_id,
            message_id: Uuid::new_v4(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.conversation_id(), Some(conversation_id));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let dispatcher = Dispatcher::new();
        dispatcher.publish(GatewayEvent::MessageDeleted {
            conversation_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
        });
    }
}
