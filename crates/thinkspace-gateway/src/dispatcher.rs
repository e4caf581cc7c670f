use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;

use thinkspace_types::ChangeEvent;

/// Broadcasts change events and tracks who is listening.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connection receives every event and filters by owner itself.
    broadcast_tx: broadcast::Sender<ChangeEvent>,

    /// owner_id -> live connection ids
    subscribers: RwLock<HashMap<Uuid, Vec<Uuid>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                subscribers: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish accepted writes, in order.
    pub fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            let _ = self.inner.broadcast_tx.send(event);
        }
    }

    /// Register a connection for `owner_id`. Returns its connection id.
    pub async fn register(&self, owner_id: Uuid) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner
            .subscribers
            .write()
            .await
            .entry(owner_id)
            .or_default()
            .push(conn_id);
        debug!("Realtime connection {} registered for {}", conn_id, owner_id);
        conn_id
    }

    /// Drop one connection. Unknown ids are ignored.
    pub async fn unregister(&self, owner_id: Uuid, conn_id: Uuid) {
        let mut subscribers = self.inner.subscribers.write().await;
        if let Some(conns) = subscribers.get_mut(&owner_id) {
            conns.retain(|c| *c != conn_id);
            if conns.is_empty() {
                subscribers.remove(&owner_id);
            }
        }
    }

    pub async fn connections(&self, owner_id: Uuid) -> usize {
        self.inner
            .subscribers
            .read()
            .await
            .get(&owner_id)
            .map_or(0, Vec::len)
    }

    pub async fn total_connections(&self) -> usize {
        self.inner.subscribers.read().await.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use thinkspace_types::{ChangeKind, Row, ThoughtChain};

    #[tokio::test]
    async fn test_register_and_unregister() {
        let dispatcher = Dispatcher::new();
        let owner = Uuid::new_v4();
        let first = dispatcher.register(owner).await;
        let second = dispatcher.register(owner).await;
        assert_eq!(dispatcher.connections(owner).await, 2);

        dispatcher.unregister(owner, first).await;
        dispatcher.unregister(owner, Uuid::new_v4()).await;
        assert_eq!(dispatcher.connections(owner).await, 1);

        dispatcher.unregister(owner, second).await;
        assert_eq!(dispatcher.total_connections().await, 0);
    }

    #[tokio::test]
    async fn test_publish_preserves_order() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let owner = Uuid::new_v4();
        let a = ChangeEvent::new(ChangeKind::Insert, Row::ThoughtChains(ThoughtChain::new(owner, Utc::now())));
        let b = ChangeEvent::new(ChangeKind::Delete, Row::ThoughtChains(ThoughtChain::new(owner, Utc::now())));

        dispatcher.publish(vec![a.clone(), b.clone()]);
        assert_eq!(rx.recv().await.unwrap(), a);
        assert_eq!(rx.recv().await.unwrap(), b);
    }
}
