//! Shared session coordinator.
//!
//! All membership state sits behind one async mutex. Each operation
//! validates under the lock, releases it around the engine call, then
//! re-locks and validates again before recording the result. If the second
//! check fails the object the engine just created is closed. An engine close
//! reported while the call was in flight fails that check too.

use crate::engine::{EngineError, EngineEvent, EngineResource, MediaEngine};
use crate::error::SessionError;
use crate::session::{ConsumerRecord, Notification, ProducerRecord, SessionState, Teardown, TransportRecord};
use crate::signaling::SignalingOutput;
use roomcast_core::{
    ConsumerDescriptor, ConsumerId, DtlsParameters, MediaKind, PeerId, ProducerId, RoomName,
    RtpCapabilities, RtpCodecCapability, RtpParameters, TransportDescriptor,
    TransportDirection, TransportId,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// Result of `transport-produce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProduceOutcome {
    pub id: ProducerId,
    /// Whether other peers in the room already produce.
    pub producers_exist: bool,
}

struct CoordinatorInner {
    state: Mutex<SessionState>,
    engine: Arc<dyn MediaEngine>,
    output: Arc<dyn SignalingOutput>,
    media_codecs: Vec<RtpCodecCapability>,
}

#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl SessionCoordinator {
    pub fn new(
        state: SessionState,
        engine: Arc<dyn MediaEngine>,
        output: Arc<dyn SignalingOutput>,
        media_codecs: Vec<RtpCodecCapability>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                state: Mutex::new(state),
                engine,
                output,
                media_codecs,
            }),
        }
    }

    /// Read-only view of the current state.
    pub async fn inspect<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let state = self.inner.state.lock().await;
        f(&state)
    }

    /// createOrJoinRoom followed by registerPeer. Returns the routing
    /// context's capabilities.
    pub async fn join_room(
        &self,
        peer_id: PeerId,
        room: RoomName,
    ) -> Result<RtpCapabilities, SessionError> {
        let mut stale_routers = Vec::new();

        let existing = {
            let mut state = self.inner.state.lock().await;
            let joined = state.registry.join_room(&room, peer_id);
            if joined.is_some() {
                stale_routers.extend(state.registry.register_peer(peer_id, room.clone()));
            }
            joined
        };

        let router = match existing {
            Some(router) => router,
            None => {
                let created = self.inner.engine.create_router(&self.inner.media_codecs).await?;
                let mut state = self.inner.state.lock().await;
                let join = state.registry.install_room(room.clone(), created, peer_id);
                stale_routers.extend(join.surplus_router);
                stale_routers.extend(state.registry.register_peer(peer_id, room.clone()));
                join.router
            }
        };

        info!("Peer {} joined room '{}' (router {})", peer_id, room, router.id);
        for router_id in stale_routers {
            self.close_quietly(EngineResource::Router(router_id)).await;
        }
        Ok(router.rtp_capabilities)
    }

    pub async fn create_transport(
        &self,
        peer_id: PeerId,
        direction: TransportDirection,
    ) -> Result<TransportDescriptor, SessionError> {
        let (room, router_id) = {
            let state = self.inner.state.lock().await;
            let room = state.registry.room_of(&peer_id)?;
            if direction == TransportDirection::Send
                && state.registry.find_send_transport(&peer_id).is_ok()
            {
                return Err(SessionError::SendTransportExists(peer_id));
            }
            (room.name.clone(), room.router.id)
        };

        let descriptor = self
            .inner
            .engine
            .create_webrtc_transport(router_id, direction)
            .await?;

        let added = {
            let mut state = self.inner.state.lock().await;
            state
                .take_early_close(EngineResource::Transport(descriptor.id))
                .and_then(|()| {
                    state.registry.add_transport(TransportRecord {
                        id: descriptor.id,
                        peer_id,
                        room,
                        direction,
                    })
                })
        };
        if let Err(e) = added {
            self.close_quietly(EngineResource::Transport(descriptor.id)).await;
            return Err(e);
        }

        debug!("Peer {} created {:?} transport {}", peer_id, direction, descriptor.id);
        Ok(descriptor)
    }

    /// `transport-connect`: connects the peer's send transport.
    pub async fn connect_send_transport(
        &self,
        peer_id: PeerId,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), SessionError> {
        let transport_id = {
            let state = self.inner.state.lock().await;
            state.registry.room_of(&peer_id)?;
            state.registry.find_send_transport(&peer_id)?
        };

        self.inner
            .engine
            .connect_transport(transport_id, dtls_parameters)
            .await?;
        debug!("Send transport {} of peer {} connected", transport_id, peer_id);
        Ok(())
    }

    /// `transport-recv-connect`: connects one of the peer's receive transports.
    pub async fn connect_recv_transport(
        &self,
        peer_id: PeerId,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), SessionError> {
        {
            let state = self.inner.state.lock().await;
            state.registry.room_of(&peer_id)?;
            state
                .registry
                .find_owned_transport(&peer_id, &transport_id, TransportDirection::Receive)?;
        }

        self.inner
            .engine
            .connect_transport(transport_id, dtls_parameters)
            .await?;
        debug!("Receive transport {} of peer {} connected", transport_id, peer_id);
        Ok(())
    }

    pub async fn produce(
        &self,
        peer_id: PeerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProduceOutcome, SessionError> {
        let transport_id = {
            let state = self.inner.state.lock().await;
            state.registry.find_send_transport(&peer_id)?
        };

        let producer_id = self
            .inner
            .engine
            .produce(transport_id, kind, rtp_parameters)
            .await?;

        let registered = {
            let mut state = self.inner.state.lock().await;
            let state = &mut *state;
            let owner = state
                .take_early_close(EngineResource::Producer(producer_id))
                .and(
                    state
                        .registry
                        .peer_mut(&peer_id)
                        .ok_or(SessionError::PeerNotFound(peer_id)),
                );
            match owner {
                Err(e) => Err(e),
                Ok(owner) if owner.send_transport != Some(transport_id) => {
                    Err(SessionError::TransportNotFound(transport_id))
                }
                Ok(owner) => {
                    let room = owner.room.clone();
                    state.producers.register(
                        ProducerRecord {
                            id: producer_id,
                            peer_id,
                            room: room.clone(),
                            transport_id,
                            kind,
                        },
                        owner,
                    );
                    let producers_exist = state.producers.others_exist(&room, &peer_id);
                    let notifications = state.producers.notify_new_producer(
                        &state.registry,
                        &room,
                        &peer_id,
                        producer_id,
                    );
                    Ok((producers_exist, notifications))
                }
            }
        };

        let (producers_exist, notifications) = match registered {
            Ok(registered) => registered,
            Err(e) => {
                warn!("Producer {} orphaned: {}", producer_id, e);
                self.close_quietly(EngineResource::Producer(producer_id)).await;
                return Err(e);
            }
        };

        info!(
            "Peer {} produces {} as {}, fan-out to {} peer(s)",
            peer_id,
            kind,
            producer_id,
            notifications.len()
        );
        self.deliver(notifications).await;

        Ok(ProduceOutcome {
            id: producer_id,
            producers_exist,
        })
    }

    /// `getProducers`: ids of the other peers' producers in the caller's room.
    pub async fn producer_list(&self, peer_id: PeerId) -> Result<Vec<ProducerId>, SessionError> {
        let state = self.inner.state.lock().await;
        let room = state.registry.room_of(&peer_id)?;
        Ok(state.producers.list_others(&room.name, &peer_id))
    }

    pub async fn consume(
        &self,
        peer_id: PeerId,
        producer_id: ProducerId,
        transport_id: TransportId,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumerDescriptor, SessionError> {
        let (room, router_id) = {
            let state = self.inner.state.lock().await;
            let room = state.registry.room_of(&peer_id)?;
            Self::check_consumable(&state, &peer_id, &room.name, &transport_id, &producer_id)?;
            (room.name.clone(), room.router.id)
        };

        if !self
            .inner
            .engine
            .can_consume(router_id, producer_id, &rtp_capabilities)
        {
            return Err(SessionError::IncompatibleCapabilities(producer_id));
        }

        let descriptor = self
            .inner
            .engine
            .consume(transport_id, producer_id, &rtp_capabilities)
            .await?;

        let registered = {
            let mut state = self.inner.state.lock().await;
            let state = &mut *state;
            let revalidated = state
                .take_early_close(EngineResource::Consumer(descriptor.id))
                .and_then(|()| {
                    Self::check_consumable(state, &peer_id, &room, &transport_id, &producer_id)
                });

            match (revalidated, state.registry.peer_mut(&peer_id)) {
                (Err(e), _) => Err(e),
                (Ok(()), None) => Err(SessionError::PeerNotFound(peer_id)),
                (Ok(()), Some(owner)) => {
                    state.consumers.register(
                        ConsumerRecord {
                            id: descriptor.id,
                            peer_id,
                            room,
                            producer_id,
                            transport_id,
                        },
                        owner,
                    );
                    Ok(())
                }
            }
        };

        if let Err(e) = registered {
            warn!("Consumer {} orphaned: {}", descriptor.id, e);
            self.close_quietly(EngineResource::Consumer(descriptor.id)).await;
            return Err(e);
        }

        info!(
            "Peer {} consumes producer {} via {}",
            peer_id, producer_id, descriptor.id
        );
        Ok(descriptor)
    }

    /// Unknown ids and ids owned by someone else are ignored.
    pub async fn resume_consumer(
        &self,
        peer_id: PeerId,
        consumer_id: ConsumerId,
    ) -> Result<(), SessionError> {
        let owned = {
            let state = self.inner.state.lock().await;
            state
                .consumers
                .find(&consumer_id)
                .is_some_and(|c| c.peer_id == peer_id)
        };
        if !owned {
            debug!("Ignoring resume of unknown consumer {} from {}", consumer_id, peer_id);
            return Ok(());
        }

        match self.inner.engine.resume_consumer(consumer_id).await {
            Ok(()) | Err(EngineError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Disconnect cleanup. Safe to call for a peer that never joined.
    pub async fn release_peer(&self, peer_id: PeerId) {
        let plan = {
            let mut state = self.inner.state.lock().await;
            state.plan_peer_departure(&peer_id)
        };
        self.execute(plan).await;
    }

    /// Mirrors a lifecycle event raised by the engine. Engine death is
    /// returned as an error.
    pub async fn handle_engine_event(&self, event: EngineEvent) -> Result<(), EngineError> {
        debug!("Engine event: {:?}", event);
        let plan = {
            let mut state = self.inner.state.lock().await;
            match event {
                EngineEvent::ProducerClosed(id) => state.plan_producer_closed(&id),
                EngineEvent::TransportClosed(id) => state.plan_transport_closed(&id),
                EngineEvent::ConsumerClosed(id) => state.plan_consumer_closed(&id),
                EngineEvent::Died(reason) => {
                    error!("Media engine died: {}", reason);
                    return Err(EngineError::Died);
                }
            }
        };
        self.execute(plan).await;
        Ok(())
    }

    /// Drains engine events until the engine dies or its channel closes.
    pub async fn run_engine_events(
        &self,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Result<(), EngineError> {
        while let Some(event) = events.recv().await {
            self.handle_engine_event(event).await?;
        }
        info!("Engine event channel closed");
        Ok(())
    }

    /// Receive transport owned by the caller, then a producer of another
    /// peer in the same room, then no existing consumer for the pair.
    fn check_consumable(
        state: &SessionState,
        peer_id: &PeerId,
        room: &RoomName,
        transport_id: &TransportId,
        producer_id: &ProducerId,
    ) -> Result<(), SessionError> {
        state
            .registry
            .find_owned_transport(peer_id, transport_id, TransportDirection::Receive)?;
        state
            .producers
            .get(producer_id)
            .filter(|p| p.room == *room && p.peer_id != *peer_id)
            .ok_or(SessionError::ProducerNotFound(*producer_id))?;

        if let Some(existing) = state.consumers.find_for(peer_id, producer_id) {
            return Err(SessionError::ConsumerExists {
                peer_id: *peer_id,
                producer_id: *producer_id,
                consumer_id: existing.id,
            });
        }
        Ok(())
    }

    async fn execute(&self, plan: Teardown) {
        let closes = plan.closes();
        self.deliver(plan.notifications).await;
        for resource in closes {
            self.close_quietly(resource).await;
        }
    }

    async fn deliver(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            self.inner
                .output
                .push(notification.peer_id, notification.event)
                .await;
        }
    }

    async fn close_quietly(&self, resource: EngineResource) {
        if let Err(e) = self.inner.engine.close(resource).await {
            warn!("Failed to close {}: {}", resource, e);
        }
    }
}
