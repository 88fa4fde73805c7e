//! Coordinator error types.
//!
//! Every error raised while handling a client message is turned into an ack
//! error at the signaling boundary. `kind()` is the stable identifier clients
//! match on; engine internals are logged server-side and never sent.

use crate::engine::EngineError;
use roomcast_core::{AckError, ConsumerId, PeerId, ProducerId, TransportId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The operation needs a joined room and the peer has none.
    #[error("Room not found for peer {0}")]
    RoomNotFound(PeerId),

    /// The peer was removed while the request was in flight.
    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("Peer {0} has no send transport")]
    NoSendTransport(PeerId),

    #[error("Peer {0} already owns a send transport")]
    SendTransportExists(PeerId),

    #[error("Transport not found: {0}")]
    TransportNotFound(TransportId),

    #[error("Producer not found: {0}")]
    ProducerNotFound(ProducerId),

    #[error("Peer {peer_id} already consumes producer {producer_id} via {consumer_id}")]
    ConsumerExists {
        peer_id: PeerId,
        producer_id: ProducerId,
        consumer_id: ConsumerId,
    },

    #[error("Receive capabilities cannot consume producer {0}")]
    IncompatibleCapabilities(ProducerId),

    /// Message arrived in a connection state that does not accept it.
    #[error("{operation} is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Media engine failure: {0}")]
    Engine(#[from] EngineError),
}

impl SessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::RoomNotFound(_) => "RoomNotFound",
            SessionError::PeerNotFound(_) => "PeerNotFound",
            SessionError::NoSendTransport(_) => "NoSendTransport",
            SessionError::SendTransportExists(_) => "SendTransportExists",
            SessionError::TransportNotFound(_) => "TransportNotFound",
            SessionError::ProducerNotFound(_) => "ProducerNotFound",
            SessionError::ConsumerExists { .. } => "ConsumerExists",
            SessionError::IncompatibleCapabilities(_) => "IncompatibleCapabilities",
            SessionError::InvalidState { .. } => "InvalidState",
            SessionError::MalformedRequest(_) => "MalformedRequest",
            SessionError::Engine(_) => "EngineFailure",
        }
    }

    /// Message safe to hand to the client.
    pub fn client_message(&self) -> String {
        match self {
            SessionError::Engine(_) => "Media engine failure".to_string(),
            SessionError::MalformedRequest(_) => "Malformed request".to_string(),
            other => other.to_string(),
        }
    }

    pub fn to_ack_error(&self) -> AckError {
        AckError {
            kind: self.kind().to_string(),
            message: self.client_message(),
        }
    }
}
