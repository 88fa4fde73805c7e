//! Per-connection protocol state machine.
//!
//! `Connected -> Joined -> Ready -> Active -> Closed`. A connection feeds its
//! frames to one [`SignalingSession`] strictly in arrival order; the session
//! turns every outcome into an optional ack.

use crate::error::SessionError;
use crate::session::SessionCoordinator;
use roomcast_core::{
    AckPayload, ClientRequest, PeerId, RequestEnvelope, ServerMessage, TransportDirection,
};
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket open, no room yet.
    Connected,
    Joined,
    /// At least one transport exists.
    Ready,
    /// At least one producer or consumer exists.
    Active,
    Closed,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "Connected",
            ConnectionState::Joined => "Joined",
            ConnectionState::Ready => "Ready",
            ConnectionState::Active => "Active",
            ConnectionState::Closed => "Closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct SignalingSession {
    peer_id: PeerId,
    state: ConnectionState,
    coordinator: SessionCoordinator,
}

impl SignalingSession {
    pub fn new(peer_id: PeerId, coordinator: SessionCoordinator) -> Self {
        Self {
            peer_id,
            state: ConnectionState::Connected,
            coordinator,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Handles one raw text frame. Frames that do not parse are acked with
    /// `MalformedRequest` when an id can still be recovered.
    pub async fn handle_text(&mut self, text: &str) -> Option<ServerMessage> {
        match RequestEnvelope::parse(text) {
            Ok(envelope) => self.handle(envelope).await,
            Err(e) => {
                warn!("Malformed frame from {}: {}", self.peer_id, e);
                let id = serde_json::from_str::<Value>(text)
                    .ok()
                    .and_then(|v| v.get("id").and_then(Value::as_u64))?;
                let error = SessionError::MalformedRequest(e.to_string());
                Some(ServerMessage::ack(id, AckPayload::Error(error.to_ack_error())))
            }
        }
    }

    pub async fn handle(&mut self, envelope: RequestEnvelope) -> Option<ServerMessage> {
        let RequestEnvelope { id, request } = envelope;
        let op = request.op();
        let in_params = request.reports_error_in_params();

        let outcome = self.dispatch(request).await;
        if let Err(e) = &outcome {
            warn!("{} from peer {} failed: {}", op, self.peer_id, e);
        }

        let id = id?;
        let payload = match outcome {
            Ok(result) => AckPayload::Result(result),
            Err(e) if in_params => {
                AckPayload::Result(json!({ "params": { "error": e.to_ack_error() } }))
            }
            Err(e) => AckPayload::Error(e.to_ack_error()),
        };
        Some(ServerMessage::ack(id, payload))
    }

    /// Disconnect. Releases everything the peer owns; later calls are no-ops.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.coordinator.release_peer(self.peer_id).await;
        self.state = ConnectionState::Closed;
        info!("Signaling session of peer {} closed", self.peer_id);
    }

    async fn dispatch(&mut self, request: ClientRequest) -> Result<Value, SessionError> {
        if self.state == ConnectionState::Closed {
            return Err(self.invalid(request.op()));
        }

        match request {
            ClientRequest::JoinRoom { room_name } => {
                match self.state {
                    ConnectionState::Connected => {}
                    ConnectionState::Joined => {
                        debug!("Peer {} re-joins, releasing previous membership", self.peer_id);
                        self.coordinator.release_peer(self.peer_id).await;
                        self.state = ConnectionState::Connected;
                    }
                    _ => return Err(self.invalid("joinRoom")),
                }

                let rtp_capabilities = self.coordinator.join_room(self.peer_id, room_name).await?;
                self.state = ConnectionState::Joined;
                Ok(json!({ "rtpCapabilities": rtp_capabilities }))
            }

            ClientRequest::GetProducers {} => {
                let producers = self.coordinator.producer_list(self.peer_id).await?;
                Ok(json!(producers))
            }

            ClientRequest::CreateWebRtcTransport { consumer } => {
                let direction = TransportDirection::from_consumer_flag(consumer);
                let descriptor = self.coordinator.create_transport(self.peer_id, direction).await?;
                self.advance(ConnectionState::Ready);
                Ok(json!({ "params": descriptor }))
            }

            ClientRequest::TransportConnect { dtls_parameters } => {
                self.coordinator
                    .connect_send_transport(self.peer_id, dtls_parameters)
                    .await?;
                Ok(json!({}))
            }

            ClientRequest::TransportProduce {
                kind,
                rtp_parameters,
                app_data,
            } => {
                debug!("Peer {} produces {} with appData {}", self.peer_id, kind, app_data);
                let outcome = self
                    .coordinator
                    .produce(self.peer_id, kind, rtp_parameters)
                    .await?;
                self.advance(ConnectionState::Active);
                Ok(json!({ "id": outcome.id, "producersExist": outcome.producers_exist }))
            }

            ClientRequest::TransportRecvConnect {
                dtls_parameters,
                server_consumer_transport_id,
            } => {
                self.coordinator
                    .connect_recv_transport(self.peer_id, server_consumer_transport_id, dtls_parameters)
                    .await?;
                Ok(json!({}))
            }

            ClientRequest::Consume {
                rtp_capabilities,
                remote_producer_id,
                server_consumer_transport_id,
            } => {
                let descriptor = self
                    .coordinator
                    .consume(
                        self.peer_id,
                        remote_producer_id,
                        server_consumer_transport_id,
                        rtp_capabilities,
                    )
                    .await?;
                self.advance(ConnectionState::Active);
                Ok(json!({ "params": descriptor }))
            }

            ClientRequest::ConsumerResume { server_consumer_id } => {
                self.coordinator
                    .resume_consumer(self.peer_id, server_consumer_id)
                    .await?;
                Ok(json!({}))
            }
        }
    }

    /// States only move forward; `Active` is never downgraded to `Ready`.
    fn advance(&mut self, to: ConnectionState) {
        let rank = |s: ConnectionState| match s {
            ConnectionState::Connected => 0,
            ConnectionState::Joined => 1,
            ConnectionState::Ready => 2,
            ConnectionState::Active => 3,
            ConnectionState::Closed => 4,
        };
        if rank(to) > rank(self.state) {
            self.state = to;
        }
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }
}
