use anyhow::{Context, Result, anyhow, bail};
use roomcast_core::{
    AckError, ConsumerDescriptor, MediaKind, PeerId, ProducerId, RtpCapabilities,
    ServerMessage, TransportDescriptor, TransportId,
};
use roomcast_server::{ConnectionState, SessionCoordinator, SignalingSession};
use serde_json::{Value, json};

use super::signal_helpers::{client_dtls, parameters_for, to_value};

/// A signaling client driving a [`SignalingSession`] with JSON frames, the
/// way a browser does over the socket.
pub struct TestClient {
    pub peer_id: PeerId,
    session: SignalingSession,
    next_id: u64,
    /// Capabilities returned by the last successful join.
    pub rtp_capabilities: Option<RtpCapabilities>,
}

impl TestClient {
    pub fn new(coordinator: &SessionCoordinator) -> Self {
        let peer_id = PeerId::new();
        Self {
            peer_id,
            session: SignalingSession::new(peer_id, coordinator.clone()),
            next_id: 1,
            rtp_capabilities: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Sends a raw frame and returns the server's reply, if any.
    pub async fn send_raw(&mut self, text: &str) -> Option<ServerMessage> {
        self.session.handle_text(text).await
    }

    /// Sends `op` with payload `d` and waits for its ack.
    pub async fn request(&mut self, op: &str, d: Value) -> Result<std::result::Result<Value, AckError>> {
        let id = self.next_id;
        self.next_id += 1;

        let frame = json!({ "id": id, "op": op, "d": d }).to_string();
        match self.send_raw(&frame).await {
            Some(ServerMessage::Ack {
                id: acked,
                result,
                error,
            }) => {
                if acked != id {
                    bail!("ack for {acked}, expected {id}");
                }
                match (result, error) {
                    (_, Some(error)) => Ok(Err(error)),
                    (Some(result), None) => Ok(Ok(result)),
                    (None, None) => bail!("empty ack for {op}"),
                }
            }
            other => Err(anyhow!("expected ack for {op}, got {other:?}")),
        }
    }

    /// Like `request`, but an error ack fails the call.
    pub async fn expect_ok(&mut self, op: &str, d: Value) -> Result<Value> {
        self.request(op, d)
            .await?
            .map_err(|e| anyhow!("{op} failed: {} ({})", e.message, e.kind))
    }

    /// Like `request`, but returns the error kind of a failing call.
    pub async fn expect_error(&mut self, op: &str, d: Value) -> Result<String> {
        match self.request(op, d).await? {
            Ok(result) => match result.pointer("/params/error/kind") {
                Some(kind) => Ok(kind.as_str().unwrap_or_default().to_owned()),
                None => bail!("{op} unexpectedly succeeded: {result}"),
            },
            Err(e) => Ok(e.kind),
        }
    }

    pub async fn join(&mut self, room: &str) -> Result<RtpCapabilities> {
        let result = self.expect_ok("joinRoom", json!({ "roomName": room })).await?;
        let caps: RtpCapabilities = serde_json::from_value(result["rtpCapabilities"].clone())
            .context("joinRoom result carries rtpCapabilities")?;
        self.rtp_capabilities = Some(caps.clone());
        Ok(caps)
    }

    pub async fn create_transport(&mut self, consumer: bool) -> Result<TransportDescriptor> {
        let result = self
            .expect_ok("createWebRtcTransport", json!({ "consumer": consumer }))
            .await?;
        if let Some(error) = result.pointer("/params/error") {
            bail!("createWebRtcTransport failed: {error}");
        }
        serde_json::from_value(result["params"].clone()).context("transport descriptor")
    }

    pub async fn create_send_transport(&mut self) -> Result<TransportId> {
        let descriptor = self.create_transport(false).await?;
        self.expect_ok("transport-connect", json!({ "dtlsParameters": to_value(&client_dtls()) }))
            .await?;
        Ok(descriptor.id)
    }

    pub async fn create_recv_transport(&mut self) -> Result<TransportId> {
        let descriptor = self.create_transport(true).await?;
        self.expect_ok(
            "transport-recv-connect",
            json!({
                "dtlsParameters": to_value(&client_dtls()),
                "serverConsumerTransportId": descriptor.id,
            }),
        )
        .await?;
        Ok(descriptor.id)
    }

    /// Returns the producer id and `producersExist`.
    pub async fn produce(&mut self, kind: MediaKind) -> Result<(ProducerId, bool)> {
        let result = self
            .expect_ok(
                "transport-produce",
                json!({
                    "kind": kind,
                    "rtpParameters": to_value(&parameters_for(kind)),
                    "appData": { "mediaTag": kind.to_string() },
                }),
            )
            .await?;
        let id = serde_json::from_value(result["id"].clone()).context("producer id")?;
        let exist = result["producersExist"]
            .as_bool()
            .context("producersExist flag")?;
        Ok((id, exist))
    }

    pub async fn get_producers(&mut self) -> Result<Vec<ProducerId>> {
        let result = self.expect_ok("getProducers", json!({})).await?;
        serde_json::from_value(result).context("producer id list")
    }

    /// Consumes with the capabilities from the last join.
    pub async fn consume(
        &mut self,
        producer_id: ProducerId,
        transport_id: TransportId,
    ) -> Result<ConsumerDescriptor> {
        let caps = self
            .rtp_capabilities
            .clone()
            .context("join before consuming")?;
        self.consume_with(producer_id, transport_id, &caps).await
    }

    pub async fn consume_with(
        &mut self,
        producer_id: ProducerId,
        transport_id: TransportId,
        caps: &RtpCapabilities,
    ) -> Result<ConsumerDescriptor> {
        let result = self
            .expect_ok("consume", consume_payload(producer_id, transport_id, caps))
            .await?;
        if let Some(error) = result.pointer("/params/error") {
            bail!("consume failed: {error}");
        }
        serde_json::from_value(result["params"].clone()).context("consumer descriptor")
    }

    pub async fn resume(&mut self, consumer: &ConsumerDescriptor) -> Result<()> {
        self.expect_ok(
            "consumer-resume",
            json!({ "serverConsumerId": consumer.server_consumer_id }),
        )
        .await?;
        Ok(())
    }

    /// Transport-level disconnect.
    pub async fn close(&mut self) {
        self.session.close().await;
    }
}

pub fn consume_payload(
    producer_id: ProducerId,
    transport_id: TransportId,
    caps: &RtpCapabilities,
) -> Value {
    json!({
        "rtpCapabilities": to_value(caps),
        "remoteProducerId": producer_id,
        "serverConsumerTransportId": transport_id,
    })
}
