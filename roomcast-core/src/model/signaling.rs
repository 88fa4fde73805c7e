use crate::model::media::{DtlsParameters, MediaKind, RtpCapabilities, RtpParameters};
use crate::model::peer::PeerId;
use crate::model::resource::{ConsumerId, ProducerId, TransportId};
use crate::model::room::RoomName;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages a client sends over its signaling connection.
///
/// Wire form is `{"id": 7, "op": "<name>", "d": {...}}`; `id` is optional and
/// only requests carrying one are acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "d", rename_all_fields = "camelCase")]
pub enum ClientRequest {
    #[serde(rename = "joinRoom")]
    JoinRoom { room_name: RoomName },

    #[serde(rename = "getProducers")]
    GetProducers {},

    #[serde(rename = "createWebRtcTransport")]
    CreateWebRtcTransport {
        #[serde(default)]
        consumer: bool,
    },

    #[serde(rename = "transport-connect")]
    TransportConnect {
        #[serde(alias = "securityParameters")]
        dtls_parameters: DtlsParameters,
    },

    #[serde(rename = "transport-produce")]
    TransportProduce {
        kind: MediaKind,
        #[serde(alias = "mediaParameters")]
        rtp_parameters: RtpParameters,
        #[serde(default)]
        app_data: Value,
    },

    #[serde(rename = "transport-recv-connect")]
    TransportRecvConnect {
        #[serde(alias = "securityParameters")]
        dtls_parameters: DtlsParameters,
        #[serde(alias = "transportId")]
        server_consumer_transport_id: TransportId,
    },

    #[serde(rename = "consume")]
    Consume {
        #[serde(alias = "receiveCapabilities")]
        rtp_capabilities: RtpCapabilities,
        remote_producer_id: ProducerId,
        #[serde(alias = "transportId")]
        server_consumer_transport_id: TransportId,
    },

    #[serde(rename = "consumer-resume")]
    ConsumerResume {
        #[serde(alias = "consumerId")]
        server_consumer_id: ConsumerId,
    },
}

impl ClientRequest {
    /// Wire name of the message.
    pub fn op(&self) -> &'static str {
        match self {
            ClientRequest::JoinRoom { .. } => "joinRoom",
            ClientRequest::GetProducers {} => "getProducers",
            ClientRequest::CreateWebRtcTransport { .. } => "createWebRtcTransport",
            ClientRequest::TransportConnect { .. } => "transport-connect",
            ClientRequest::TransportProduce { .. } => "transport-produce",
            ClientRequest::TransportRecvConnect { .. } => "transport-recv-connect",
            ClientRequest::Consume { .. } => "consume",
            ClientRequest::ConsumerResume { .. } => "consumer-resume",
        }
    }

    /// `createWebRtcTransport` and `consume` report failures inside the
    /// result as `{"params": {"error": ...}}`.
    pub fn reports_error_in_params(&self) -> bool {
        matches!(
            self,
            ClientRequest::CreateWebRtcTransport { .. } | ClientRequest::Consume { .. }
        )
    }
}

/// A parsed client frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub id: Option<u64>,
    pub request: ClientRequest,
}

impl RequestEnvelope {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let mut value: Value = serde_json::from_str(text)?;
        let id = value.get("id").and_then(Value::as_u64);

        // Payload-less messages may omit `d` entirely.
        if let Some(obj) = value.as_object_mut() {
            match obj.get("d") {
                None | Some(Value::Null) => {
                    obj.insert("d".to_owned(), Value::Object(Default::default()));
                }
                _ => {}
            }
        }

        let request = ClientRequest::deserialize(value)?;
        Ok(Self { id, request })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckError {
    pub kind: String,
    pub message: String,
}

/// Outcome of a request, before it is framed as an `ack`.
#[derive(Debug, Clone, PartialEq)]
pub enum AckPayload {
    Result(Value),
    Error(AckError),
}

/// Everything the server writes to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "d")]
pub enum ServerMessage {
    #[serde(rename = "ack")]
    Ack {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<AckError>,
    },

    #[serde(rename = "connection-success", rename_all = "camelCase")]
    ConnectionSuccess { peer_id: PeerId },

    #[serde(rename = "new-producer", rename_all = "camelCase")]
    NewProducer { producer_id: ProducerId },

    /// Carries the id under both names; older clients read `remoteProducerId`.
    #[serde(rename = "producer-closed", rename_all = "camelCase")]
    ProducerClosed {
        producer_id: ProducerId,
        remote_producer_id: ProducerId,
    },
}

/// Push events the coordinator emits outside of a request/ack exchange.
///
/// Framed as the matching [`ServerMessage`] variant on the wire; acks cannot
/// be pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    NewProducer(ProducerId),
    ProducerClosed(ProducerId),
}

impl From<ServerEvent> for ServerMessage {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::NewProducer(producer_id) => ServerMessage::NewProducer { producer_id },
            ServerEvent::ProducerClosed(producer_id) => ServerMessage::producer_closed(producer_id),
        }
    }
}

impl ServerMessage {
    pub fn ack(id: u64, payload: AckPayload) -> Self {
        match payload {
            AckPayload::Result(value) => ServerMessage::Ack {
                id,
                result: Some(value),
                error: None,
            },
            AckPayload::Error(error) => ServerMessage::Ack {
                id,
                result: None,
                error: Some(error),
            },
        }
    }

    pub fn producer_closed(producer_id: ProducerId) -> Self {
        ServerMessage::ProducerClosed {
            producer_id,
            remote_producer_id: producer_id,
        }
    }
}
