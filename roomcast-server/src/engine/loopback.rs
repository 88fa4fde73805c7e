use crate::config::TransportConfig;
use crate::engine::{EngineError, EngineEvent, EngineResource, MediaEngine, RouterHandle};
use async_trait::async_trait;
use dashmap::DashMap;
use roomcast_core::{
    ConsumerDescriptor, ConsumerId, DtlsFingerprint, DtlsParameters, IceCandidate, IceParameters,
    MediaKind, ProducerId, RouterId, RtpCapabilities, RtpCodecCapability, RtpParameters,
    TransportDescriptor, TransportDirection, TransportId,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

const FIRST_DYNAMIC_PAYLOAD_TYPE: u8 = 100;

/// Engine operations that can be made to fail once, for exercising error paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    CreateRouter,
    CreateTransport,
    Connect,
    Produce,
    Consume,
    Resume,
    Close,
}

struct RouterEntry {
    rtp_capabilities: RtpCapabilities,
}

struct TransportEntry {
    router: RouterId,
    direction: TransportDirection,
    dtls_parameters: Option<DtlsParameters>,
}

struct ProducerEntry {
    router: RouterId,
    transport: TransportId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
}

struct ConsumerEntry {
    transport: TransportId,
    producer: ProducerId,
    paused: bool,
}

/// In-process media engine that keeps the object graph of a real SFU
/// worker (routers, transports, producers, consumers) without moving
/// packets. Negotiation is checked at the descriptor level: codec
/// compatibility, transport direction and router membership.
pub struct LoopbackEngine {
    config: TransportConfig,
    routers: DashMap<RouterId, RouterEntry>,
    transports: DashMap<TransportId, TransportEntry>,
    producers: DashMap<ProducerId, ProducerEntry>,
    consumers: DashMap<ConsumerId, ConsumerEntry>,
    failures: DashMap<EngineOp, String>,
    latency_ms: AtomicU64,
    port_cursor: AtomicU32,
    ssrc_cursor: AtomicU32,
    alive: AtomicBool,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl LoopbackEngine {
    pub fn new(config: TransportConfig, events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        info!(
            "Loopback engine started (ports {}-{})",
            config.rtc_min_port, config.rtc_max_port
        );

        Self {
            config,
            routers: DashMap::new(),
            transports: DashMap::new(),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            failures: DashMap::new(),
            latency_ms: AtomicU64::new(0),
            port_cursor: AtomicU32::new(0),
            ssrc_cursor: AtomicU32::new(1_000_000),
            alive: AtomicBool::new(true),
            events,
        }
    }

    /// Delay every asynchronous call, widening the window in which other
    /// handlers interleave.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make the next call of `op` fail with a negotiation error.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn fail_next(&self, op: EngineOp, reason: &str) {
        self.failures.insert(op, reason.to_owned());
    }

    /// Simulate DTLS reaching `closed` on a transport.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn fail_transport(&self, transport: TransportId) {
        if self.remove_transport(transport) {
            let _ = self.events.send(EngineEvent::TransportClosed(transport));
        }
    }

    /// Simulate the engine closing a producer on its own.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn close_producer_remotely(&self, producer: ProducerId) {
        if self.remove_producer(producer) {
            let _ = self.events.send(EngineEvent::ProducerClosed(producer));
        }
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn close_consumer_remotely(&self, consumer: ConsumerId) {
        if self.consumers.remove(&consumer).is_some() {
            let _ = self.events.send(EngineEvent::ConsumerClosed(consumer));
        }
    }

    /// Simulate the engine process dying.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn crash(&self, reason: &str) {
        tracing::error!("Loopback engine crashed: {}", reason);
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.events.send(EngineEvent::Died(reason.to_owned()));
    }

    pub fn is_open(&self, resource: EngineResource) -> bool {
        match resource {
            EngineResource::Router(id) => self.routers.contains_key(&id),
            EngineResource::Transport(id) => self.transports.contains_key(&id),
            EngineResource::Producer(id) => self.producers.contains_key(&id),
            EngineResource::Consumer(id) => self.consumers.contains_key(&id),
        }
    }

    pub fn consumer_paused(&self, consumer: ConsumerId) -> Option<bool> {
        self.consumers.get(&consumer).map(|c| c.paused)
    }

    pub fn is_connected(&self, transport: TransportId) -> bool {
        self.transports
            .get(&transport)
            .is_some_and(|t| t.dtls_parameters.is_some())
    }

    pub fn router_count(&self) -> usize {
        self.routers.len()
    }

    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    async fn enter(&self, op: EngineOp) -> Result<(), EngineError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if !self.alive.load(Ordering::SeqCst) {
            return Err(EngineError::Died);
        }
        if let Some((_, reason)) = self.failures.remove(&op) {
            return Err(EngineError::Negotiation(reason));
        }
        Ok(())
    }

    fn next_port(&self) -> u16 {
        let span = u32::from(self.config.rtc_max_port.saturating_sub(self.config.rtc_min_port)) + 1;
        let offset = self.port_cursor.fetch_add(1, Ordering::SeqCst) % span;
        self.config.rtc_min_port + offset as u16
    }

    fn candidates(&self) -> Vec<IceCandidate> {
        let port = self.next_port();
        let ip = self.config.candidate_ip().to_owned();
        let mut candidates = Vec::new();

        if self.config.enable_udp {
            candidates.push(IceCandidate {
                foundation: "udpcandidate".to_owned(),
                priority: if self.config.prefer_udp { 1076302079 } else { 1076276479 },
                ip: ip.clone(),
                protocol: "udp".to_owned(),
                port,
                candidate_type: "host".to_owned(),
            });
        }
        if self.config.enable_tcp {
            candidates.push(IceCandidate {
                foundation: "tcpcandidate".to_owned(),
                priority: if self.config.prefer_udp { 1076276479 } else { 1076302079 },
                ip,
                protocol: "tcp".to_owned(),
                port,
                candidate_type: "host".to_owned(),
            });
        }
        candidates
    }

    fn remove_producer(&self, producer: ProducerId) -> bool {
        if self.producers.remove(&producer).is_none() {
            return false;
        }

        let dependents: Vec<ConsumerId> = self
            .consumers
            .iter()
            .filter(|c| c.producer == producer)
            .map(|c| *c.key())
            .collect();
        for consumer in dependents {
            self.consumers.remove(&consumer);
        }
        true
    }

    fn remove_transport(&self, transport: TransportId) -> bool {
        if self.transports.remove(&transport).is_none() {
            return false;
        }

        let producers: Vec<ProducerId> = self
            .producers
            .iter()
            .filter(|p| p.transport == transport)
            .map(|p| *p.key())
            .collect();
        for producer in producers {
            self.remove_producer(producer);
        }

        let consumers: Vec<ConsumerId> = self
            .consumers
            .iter()
            .filter(|c| c.transport == transport)
            .map(|c| *c.key())
            .collect();
        for consumer in consumers {
            self.consumers.remove(&consumer);
        }
        true
    }

    fn remove_router(&self, router: RouterId) -> bool {
        if self.routers.remove(&router).is_none() {
            return false;
        }

        let transports: Vec<TransportId> = self
            .transports
            .iter()
            .filter(|t| t.router == router)
            .map(|t| *t.key())
            .collect();
        for transport in transports {
            self.remove_transport(transport);
        }
        true
    }
}

fn fingerprint() -> String {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    async fn create_router(
        &self,
        media_codecs: &[RtpCodecCapability],
    ) -> Result<RouterHandle, EngineError> {
        self.enter(EngineOp::CreateRouter).await?;

        let codecs = media_codecs
            .iter()
            .zip(FIRST_DYNAMIC_PAYLOAD_TYPE..)
            .map(|(codec, pt)| RtpCodecCapability {
                preferred_payload_type: codec.preferred_payload_type.or(Some(pt)),
                ..codec.clone()
            })
            .collect();
        let rtp_capabilities = RtpCapabilities {
            codecs,
            header_extensions: Vec::new(),
        };

        let id = RouterId::new();
        self.routers.insert(
            id,
            RouterEntry {
                rtp_capabilities: rtp_capabilities.clone(),
            },
        );
        debug!("Router created: {}", id);

        Ok(RouterHandle {
            id,
            rtp_capabilities,
        })
    }

    async fn create_webrtc_transport(
        &self,
        router: RouterId,
        direction: TransportDirection,
    ) -> Result<TransportDescriptor, EngineError> {
        self.enter(EngineOp::CreateTransport).await?;

        if !self.routers.contains_key(&router) {
            return Err(EngineError::NotFound(format!("router {router}")));
        }

        let id = TransportId::new();
        self.transports.insert(
            id,
            TransportEntry {
                router,
                direction,
                dtls_parameters: None,
            },
        );
        debug!("Transport created: {} ({})", id, direction);

        Ok(TransportDescriptor {
            id,
            ice_parameters: IceParameters {
                username_fragment: Uuid::new_v4().simple().to_string(),
                password: Uuid::new_v4().simple().to_string(),
                ice_lite: true,
            },
            ice_candidates: self.candidates(),
            dtls_parameters: DtlsParameters {
                role: Some("auto".to_owned()),
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_owned(),
                    value: fingerprint(),
                }],
            },
        })
    }

    async fn connect_transport(
        &self,
        transport: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), EngineError> {
        self.enter(EngineOp::Connect).await?;

        let mut entry = self
            .transports
            .get_mut(&transport)
            .ok_or_else(|| EngineError::NotFound(format!("transport {transport}")))?;
        entry.dtls_parameters = Some(dtls_parameters);
        Ok(())
    }

    async fn produce(
        &self,
        transport: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, EngineError> {
        self.enter(EngineOp::Produce).await?;

        let (router, direction) = self
            .transports
            .get(&transport)
            .map(|t| (t.router, t.direction))
            .ok_or_else(|| EngineError::NotFound(format!("transport {transport}")))?;
        if direction != TransportDirection::Send {
            return Err(EngineError::Negotiation(format!(
                "transport {transport} cannot produce"
            )));
        }

        let supported = {
            let entry = self
                .routers
                .get(&router)
                .ok_or_else(|| EngineError::NotFound(format!("router {router}")))?;
            rtp_parameters.codecs.first().is_some_and(|codec| {
                entry
                    .rtp_capabilities
                    .find_codec(codec)
                    .is_some_and(|cap| cap.kind == kind)
            })
        };
        if !supported {
            return Err(EngineError::Negotiation(format!(
                "no {kind} codec in rtpParameters is supported by the router"
            )));
        }

        let id = ProducerId::new();
        self.producers.insert(
            id,
            ProducerEntry {
                router,
                transport,
                kind,
                rtp_parameters,
            },
        );
        debug!("Producer created: {} ({})", id, kind);
        Ok(id)
    }

    fn can_consume(
        &self,
        router: RouterId,
        producer: ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> bool {
        let Some(entry) = self.producers.get(&producer) else {
            return false;
        };
        if entry.router != router {
            return false;
        }
        entry.rtp_parameters.codecs.first().is_some_and(|codec| {
            rtp_capabilities
                .find_codec(codec)
                .is_some_and(|cap| cap.kind == entry.kind)
        })
    }

    async fn consume(
        &self,
        transport: TransportId,
        producer: ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerDescriptor, EngineError> {
        self.enter(EngineOp::Consume).await?;

        let (router, direction) = self
            .transports
            .get(&transport)
            .map(|t| (t.router, t.direction))
            .ok_or_else(|| EngineError::NotFound(format!("transport {transport}")))?;
        if direction != TransportDirection::Receive {
            return Err(EngineError::Negotiation(format!(
                "transport {transport} cannot consume"
            )));
        }
        if !self.can_consume(router, producer, rtp_capabilities) {
            return Err(EngineError::Negotiation(format!(
                "cannot consume producer {producer}"
            )));
        }

        let (kind, mut codec) = {
            let entry = self
                .producers
                .get(&producer)
                .ok_or_else(|| EngineError::NotFound(format!("producer {producer}")))?;
            let codec = entry
                .rtp_parameters
                .codecs
                .first()
                .cloned()
                .ok_or_else(|| EngineError::Negotiation("producer has no codec".to_owned()))?;
            (entry.kind, codec)
        };
        if let Some(pt) = rtp_capabilities
            .find_codec(&codec)
            .and_then(|cap| cap.preferred_payload_type)
        {
            codec.payload_type = pt;
        }

        let id = ConsumerId::new();
        let ssrc = self.ssrc_cursor.fetch_add(1, Ordering::SeqCst);
        self.consumers.insert(
            id,
            ConsumerEntry {
                transport,
                producer,
                paused: true,
            },
        );
        debug!("Consumer created: {} for producer {}", id, producer);

        Ok(ConsumerDescriptor {
            id,
            producer_id: producer,
            kind,
            rtp_parameters: RtpParameters {
                mid: Some("0".to_owned()),
                codecs: vec![codec],
                header_extensions: Vec::new(),
                encodings: vec![json!({ "ssrc": ssrc })],
                rtcp: Some(json!({ "cname": id.to_string(), "reducedSize": true })),
            },
            server_consumer_id: id,
        })
    }

    async fn resume_consumer(&self, consumer: ConsumerId) -> Result<(), EngineError> {
        self.enter(EngineOp::Resume).await?;

        let mut entry = self
            .consumers
            .get_mut(&consumer)
            .ok_or_else(|| EngineError::NotFound(format!("consumer {consumer}")))?;
        entry.paused = false;
        Ok(())
    }

    async fn close(&self, resource: EngineResource) -> Result<(), EngineError> {
        self.enter(EngineOp::Close).await?;

        let closed = match resource {
            EngineResource::Router(id) => self.remove_router(id),
            EngineResource::Transport(id) => self.remove_transport(id),
            EngineResource::Producer(id) => self.remove_producer(id),
            EngineResource::Consumer(id) => self.consumers.remove(&id).is_some(),
        };
        if closed {
            debug!("Closed {}", resource);
        }
        Ok(())
    }
}
