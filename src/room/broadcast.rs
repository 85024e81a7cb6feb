use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::protocol::ServerEvent;
use super::registry::{ConnectionId, ConnectionRegistry};

/// Fan-out of control events.
///
/// The room channel is whatever connection list the caller passes in (the
/// current members); the dashboard channel is tracked here per classroom.
/// Delivery is at most once, with no replay.
pub struct EventBroadcaster {
    registry: Arc<ConnectionRegistry>,
    dashboards: Arc<RwLock<HashMap<String, HashSet<ConnectionId>>>>,
}

impl EventBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            dashboards: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn to_connection(&self, connection_id: &str, event: &ServerEvent) -> bool {
        self.registry.send(connection_id, event).await
    }

    pub async fn to_connections<I, S>(&self, connection_ids: I, event: &ServerEvent) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.registry.send_many(connection_ids, event).await
    }

    /// Room fan-out skipping one connection (usually the sender)
    pub async fn to_connections_except(
        &self,
        connection_ids: Vec<ConnectionId>,
        except: &str,
        event: &ServerEvent,
    ) -> usize {
        let targets = connection_ids.into_iter().filter(|id| id != except);
        self.registry.send_many(targets, event).await
    }

    pub async fn subscribe_dashboard(&self, classroom_id: &str, connection_id: &str) {
        let mut dashboards = self.dashboards.write().await;
        dashboards
            .entry(classroom_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        tracing::debug!(
            classroom_id = %classroom_id,
            connection_id = %connection_id,
            "Subscribed to classroom dashboard"
        );
    }

    pub async fn unsubscribe_dashboard(&self, classroom_id: &str, connection_id: &str) {
        let mut dashboards = self.dashboards.write().await;
        if let Some(subscribers) = dashboards.get_mut(classroom_id) {
            subscribers.remove(connection_id);
            if subscribers.is_empty() {
                dashboards.remove(classroom_id);
            }
        }
    }

    /// Drops a closed connection from every dashboard
    pub async fn drop_connection(&self, connection_id: &str) {
        let mut dashboards = self.dashboards.write().await;
        dashboards.retain(|_, subscribers| {
            subscribers.remove(connection_id);
            !subscribers.is_empty()
        });
    }

    pub async fn to_dashboard(&self, classroom_id: &str, event: &ServerEvent) -> usize {
        let subscribers: Vec<ConnectionId> = {
            let dashboards = self.dashboards.read().await;
            match dashboards.get(classroom_id) {
                Some(subscribers) => subscribers.iter().cloned().collect(),
                None => return 0,
            }
        };
        self.registry.send_many(subscribers, event).await
    }

    pub async fn dashboard_subscribers(&self, classroom_id: &str) -> usize {
        let dashboards = self.dashboards.read().await;
        dashboards.get(classroom_id).map(HashSet::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::protocol::ClassStatus;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_dashboard_fan_out_is_scoped_per_classroom() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = EventBroadcaster::new(registry.clone());

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.register(tx_a).await;
        let b = registry.register(tx_b).await;

        broadcaster.subscribe_dashboard("math", &a).await;
        broadcaster.subscribe_dashboard("history", &b).await;

        let event = ServerEvent::ClassStatusChanged(ClassStatus { is_active: true });
        assert_eq!(broadcaster.to_dashboard("math", &event).await, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drop_connection_clears_subscriptions() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = EventBroadcaster::new(registry.clone());

        let (tx, _rx) = mpsc::unbounded_channel();
        let a = registry.register(tx).await;
        broadcaster.subscribe_dashboard("math", &a).await;
        broadcaster.subscribe_dashboard("history", &a).await;

        broadcaster.drop_connection(&a).await;
        assert_eq!(broadcaster.dashboard_subscribers("math").await, 0);
        assert_eq!(broadcaster.dashboard_subscribers("history").await, 0);
    }

    #[tokio::test]
    async fn test_room_fan_out_skips_sender() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = EventBroadcaster::new(registry.clone());

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.register(tx_a).await;
        let b = registry.register(tx_b).await;

        let sent = broadcaster
            .to_connections_except(vec![a.clone(), b.clone()], &a, &ServerEvent::ClassEnded)
            .await;

        assert_eq!(sent, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }
}
