use std::sync::Arc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::room::RoomCoordinator;

/// Drives one client connection: outbound events go through an unbounded
/// queue drained by a writer task, inbound text frames are applied in order.
pub async fn handle_websocket(websocket: WebSocket, coordinator: Arc<RoomCoordinator>) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let connection_id = coordinator.connect(tx).await;

    let writer_id = connection_id.clone();
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(connection_id = %writer_id, error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) if message.is_close() => break,
            Ok(message) => match message.to_str() {
                Ok(text) => coordinator.handle_text(&connection_id, text).await,
                Err(()) => {
                    tracing::debug!(connection_id = %connection_id, "Ignoring non-text frame");
                }
            },
            Err(e) => {
                tracing::error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    coordinator.disconnect(&connection_id).await;
    sender_task.abort();
    tracing::info!(connection_id = %connection_id, "WebSocket connection closed");
}
