/// Notification Fan-out
///
/// Registry of open push channels. Each WebSocket connection registers an
/// outbound queue and may be bound to a session id; `send_to` delivers only
/// to the channels bound to that session instead of broadcasting and letting
/// clients filter. Delivery is fire-and-forget: channels whose receiver is
/// gone are pruned on the next send.

use arena_common::types::{PushEvent, SessionId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

pub type ConnectionId = u64;

struct Connection {
    session_id: Option<SessionId>,
    tx: mpsc::UnboundedSender<PushEvent>,
}

#[derive(Default)]
pub struct NotificationHub {
    next_id: AtomicU64,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a channel, optionally bound to a session right away
    pub async fn register(
        &self,
        session_id: Option<SessionId>,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<PushEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .write()
            .await
            .insert(id, Connection { session_id, tx });
        debug!(connection_id = id, "Push channel registered");
        (id, rx)
    }

    /// Bind (or rebind) an open channel to a session
    pub async fn bind(&self, connection: ConnectionId, session_id: SessionId) -> bool {
        match self.connections.write().await.get_mut(&connection) {
            Some(conn) => {
                debug!(connection_id = connection, session_id = %session_id, "Push channel bound");
                conn.session_id = Some(session_id);
                true
            }
            None => false,
        }
    }

    pub async fn unregister(&self, connection: ConnectionId) {
        self.connections.write().await.remove(&connection);
        debug!(connection_id = connection, "Push channel closed");
    }

    /// Push to every open channel; returns how many accepted the event
    pub async fn broadcast(&self, event: &PushEvent) -> usize {
        self.deliver(event, |_| true).await
    }

    /// Push to the channels bound to `session_id`
    pub async fn send_to(&self, session_id: &str, event: &PushEvent) -> usize {
        self.deliver(event, |conn| conn.session_id.as_deref() == Some(session_id))
            .await
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    async fn deliver<F>(&self, event: &PushEvent, addressed: F) -> usize
    where
        F: Fn(&Connection) -> bool,
    {
        let mut delivered = 0;
        let mut dead = Vec::new();

        {
            let connections = self.connections.read().await;
            for (id, conn) in connections.iter().filter(|(_, c)| addressed(c)) {
                if conn.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            let mut connections = self.connections.write().await;
            for id in dead {
                connections.remove(&id);
            }
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn winner(session: &str) -> PushEvent {
        PushEvent::Winner {
            duel_id: Uuid::nil(),
            session_id: session.to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_to_reaches_only_bound_session() {
        let hub = NotificationHub::new();
        let (_, mut alice) = hub.register(Some("alice".into())).await;
        let (_, mut bob) = hub.register(Some("bob".into())).await;
        let (_, mut anonymous) = hub.register(None).await;

        assert_eq!(hub.send_to("alice", &winner("alice")).await, 1);

        assert_eq!(alice.try_recv().unwrap(), winner("alice"));
        assert!(bob.try_recv().is_err());
        assert!(anonymous.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let hub = NotificationHub::new();
        let (_, mut a) = hub.register(Some("a".into())).await;
        let (_, mut b) = hub.register(None).await;

        assert_eq!(hub.broadcast(&winner("a")).await, 2);
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_late_binding() {
        let hub = NotificationHub::new();
        let (conn, mut rx) = hub.register(None).await;
        assert_eq!(hub.send_to("carol", &winner("carol")).await, 0);

        assert!(hub.bind(conn, "carol".into()).await);
        assert_eq!(hub.send_to("carol", &winner("carol")).await, 1);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned() {
        let hub = NotificationHub::new();
        let (_, rx) = hub.register(Some("gone".into())).await;
        drop(rx);

        assert_eq!(hub.send_to("gone", &winner("gone")).await, 0);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_and_bind_unknown() {
        let hub = NotificationHub::new();
        let (conn, _rx) = hub.register(None).await;
        hub.unregister(conn).await;
        assert!(!hub.bind(conn, "x".into()).await);
        assert_eq!(hub.connection_count().await, 0);
    }
}
