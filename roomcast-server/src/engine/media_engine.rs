use async_trait::async_trait;
use roomcast_core::{
    ConsumerDescriptor, ConsumerId, DtlsParameters, MediaKind, ProducerId, RouterId,
    RtpCapabilities, RtpCodecCapability, RtpParameters, TransportDescriptor, TransportDirection,
    TransportId,
};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// ICE/DTLS/RTP negotiation was refused by the engine.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Engine object not found: {0}")]
    NotFound(String),

    #[error("Media engine is not running")]
    Died,
}

/// Routing context created for a room.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterHandle {
    pub id: RouterId,
    pub rtp_capabilities: RtpCapabilities,
}

/// Anything the engine can close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineResource {
    Router(RouterId),
    Transport(TransportId),
    Producer(ProducerId),
    Consumer(ConsumerId),
}

impl fmt::Display for EngineResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineResource::Router(id) => write!(f, "router {id}"),
            EngineResource::Transport(id) => write!(f, "transport {id}"),
            EngineResource::Producer(id) => write!(f, "producer {id}"),
            EngineResource::Consumer(id) => write!(f, "consumer {id}"),
        }
    }
}

/// Gateway to the process that actually moves RTP.
///
/// The coordinator suspends only inside these calls. Closing is idempotent:
/// closing an object that is already gone succeeds. Closing a parent closes
/// its children without raising events for them.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    async fn create_router(
        &self,
        media_codecs: &[RtpCodecCapability],
    ) -> Result<RouterHandle, EngineError>;

    async fn create_webrtc_transport(
        &self,
        router: RouterId,
        direction: TransportDirection,
    ) -> Result<TransportDescriptor, EngineError>;

    async fn connect_transport(
        &self,
        transport: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), EngineError>;

    async fn produce(
        &self,
        transport: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, EngineError>;

    fn can_consume(
        &self,
        router: RouterId,
        producer: ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> bool;

    /// Consumers start paused; `resume_consumer` starts delivery.
    async fn consume(
        &self,
        transport: TransportId,
        producer: ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerDescriptor, EngineError>;

    async fn resume_consumer(&self, consumer: ConsumerId) -> Result<(), EngineError>;

    async fn close(&self, resource: EngineResource) -> Result<(), EngineError>;
}
