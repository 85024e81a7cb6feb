use std::sync::Arc;
use serde_json::Value;

use super::protocol::{IncomingSignal, ReturnedSignal, ServerEvent};
use super::registry::ConnectionRegistry;

/// Forwards negotiation payloads between two connections without reading them.
/// A payload for a connection that is no longer registered is dropped.
pub struct SignalingRelay {
    registry: Arc<ConnectionRegistry>,
}

impl SignalingRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Offer from `origin` to `target`; the target sees it as `user-joined`
    pub async fn relay_offer(&self, origin: &str, target: &str, signal: Value) -> bool {
        let event = ServerEvent::UserJoined(IncomingSignal {
            signal,
            caller_id: origin.to_string(),
        });
        self.forward(origin, target, &event).await
    }

    /// Answer from `responder` back to the offerer, tagged with the responder's id
    pub async fn relay_answer(&self, responder: &str, offerer: &str, signal: Value) -> bool {
        let event = ServerEvent::ReceivingReturnedSignal(ReturnedSignal {
            signal,
            id: responder.to_string(),
        });
        self.forward(responder, offerer, &event).await
    }

    async fn forward(&self, from: &str, to: &str, event: &ServerEvent) -> bool {
        let delivered = self.registry.send(to, event).await;
        if !delivered {
            tracing::debug!(from = %from, to = %to, "Signal target gone, dropping");
        }
        delivered
    }
}
