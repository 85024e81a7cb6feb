use std::collections::HashMap;
use std::sync::Arc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use warp::ws::Message;

use super::protocol::ServerEvent;

pub type ConnectionId = String;

const CONNECTION_ID_LEN: usize = 20;

struct ConnectionEntry {
    sender: mpsc::UnboundedSender<Message>,
    /// room_id -> user_id this connection joined as
    rooms: HashMap<String, String>,
}

/// Open transports, keyed by connection id.
///
/// The registry owns each transport's lifetime; participants only hold the id.
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn generate_connection_id() -> ConnectionId {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CONNECTION_ID_LEN)
            .map(char::from)
            .collect()
    }

    pub async fn register(&self, sender: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let mut connections = self.connections.write().await;

        let mut connection_id = Self::generate_connection_id();
        while connections.contains_key(&connection_id) {
            connection_id = Self::generate_connection_id();
        }

        connections.insert(
            connection_id.clone(),
            ConnectionEntry {
                sender,
                rooms: HashMap::new(),
            },
        );

        tracing::debug!(connection_id = %connection_id, "Connection registered");
        connection_id
    }

    /// Removes the connection and returns the `(room_id, user_id)` pairs it
    /// had joined, or `None` if it was not registered.
    pub async fn unregister(&self, connection_id: &str) -> Option<Vec<(String, String)>> {
        let mut connections = self.connections.write().await;
        let entry = connections.remove(connection_id)?;
        tracing::debug!(connection_id = %connection_id, "Connection unregistered");
        Some(entry.rooms.into_iter().collect())
    }

    /// Records that the connection joined `room_id` as `user_id`.
    /// Returns the user previously bound in that room, if different.
    pub async fn bind(&self, connection_id: &str, room_id: &str, user_id: &str) -> Option<String> {
        let mut connections = self.connections.write().await;
        let entry = connections.get_mut(connection_id)?;
        entry
            .rooms
            .insert(room_id.to_string(), user_id.to_string())
            .filter(|previous| previous != user_id)
    }

    /// Forgets the room binding, but only if it still points at `user_id`
    pub async fn unbind(&self, connection_id: &str, room_id: &str, user_id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(entry) = connections.get_mut(connection_id) {
            if entry.rooms.get(room_id).map(String::as_str) == Some(user_id) {
                entry.rooms.remove(room_id);
            }
        }
    }

    pub async fn bound_user(&self, connection_id: &str, room_id: &str) -> Option<String> {
        let connections = self.connections.read().await;
        connections.get(connection_id)?.rooms.get(room_id).cloned()
    }

    /// Delivers to one connection. Returns false if it is gone.
    pub async fn send(&self, connection_id: &str, event: &ServerEvent) -> bool {
        let message = match event.to_message() {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize outbound event");
                return false;
            }
        };
        self.send_message(connection_id, message).await
    }

    /// Delivers to every listed connection that is still open.
    /// Returns how many deliveries were accepted.
    pub async fn send_many<I, S>(&self, connection_ids: I, event: &ServerEvent) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let message = match event.to_message() {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize outbound event");
                return 0;
            }
        };

        let connections = self.connections.read().await;
        connection_ids
            .into_iter()
            .filter(|id| match connections.get(id.as_ref()) {
                Some(entry) => entry.sender.send(message.clone()).is_ok(),
                None => false,
            })
            .count()
    }

    async fn send_message(&self, connection_id: &str, message: Message) -> bool {
        let connections = self.connections.read().await;
        match connections.get(connection_id) {
            Some(entry) => match entry.sender.send(message) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        error = %e,
                        "Failed to queue message for connection"
                    );
                    false
                }
            },
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
