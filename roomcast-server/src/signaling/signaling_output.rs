use async_trait::async_trait;
use roomcast_core::{PeerId, ServerEvent};

/// Sink for push events the coordinator sends outside a request/ack
/// exchange (`new-producer`, `producer-closed`). Implemented by the
/// WebSocket service; delivery to a peer that is already gone is dropped.
#[async_trait]
pub trait SignalingOutput: Send + Sync + 'static {
    async fn push(&self, peer_id: PeerId, event: ServerEvent);
}
