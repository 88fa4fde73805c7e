//! Cascading removal.
//!
//! Every plan here mutates [`SessionState`] in one step while the coordinator
//! lock is held and returns the engine work as a [`Teardown`]. The records are
//! gone before any close is attempted, so a failing engine close can never
//! leave a reference behind.

use crate::engine::EngineResource;
use crate::session::{Notification, SessionState};
use roomcast_core::{ConsumerId, PeerId, ProducerId, ServerEvent, TransportDirection, TransportId};
use tracing::{debug, info};

/// Engine closes and push events owed after a removal.
#[derive(Debug, Default)]
pub struct Teardown {
    consumers: Vec<EngineResource>,
    producers: Vec<EngineResource>,
    transports: Vec<EngineResource>,
    router: Option<EngineResource>,
    pub notifications: Vec<Notification>,
}

impl Teardown {
    /// Closes in dependency order: consumers, producers, transports, router.
    pub fn closes(&self) -> Vec<EngineResource> {
        self.consumers
            .iter()
            .chain(&self.producers)
            .chain(&self.transports)
            .chain(&self.router)
            .copied()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.closes().is_empty() && self.notifications.is_empty()
    }

    fn absorb(&mut self, other: Teardown) {
        self.consumers.extend(other.consumers);
        self.producers.extend(other.producers);
        self.transports.extend(other.transports);
        self.router = self.router.or(other.router);
        self.notifications.extend(other.notifications);
    }
}

impl SessionState {
    /// Releases everything `peer_id` owns and removes it from its room.
    pub fn plan_peer_departure(&mut self, peer_id: &PeerId) -> Teardown {
        let mut plan = Teardown::default();
        let Some(peer) = self.registry.peer(peer_id) else {
            return plan;
        };
        let consumers = peer.consumers.clone();
        let producers = peer.producers.clone();
        let transports = peer.transports.clone();

        for consumer_id in consumers {
            let owner = self.registry.peer_mut(peer_id);
            if self.consumers.unregister(&consumer_id, owner).is_some() {
                plan.consumers.push(EngineResource::Consumer(consumer_id));
            }
        }

        for producer_id in producers {
            plan.absorb(self.cascade_producer(&producer_id, true));
        }

        for transport_id in transports {
            if self.registry.remove_transport(&transport_id).is_some() {
                plan.transports.push(EngineResource::Transport(transport_id));
            }
        }

        if let Some((record, released)) = self.registry.remove_peer(peer_id) {
            info!("Peer {} left room '{}'", peer_id, record.room);
            plan.router = released.map(EngineResource::Router);
        }
        plan
    }

    /// The engine closed a producer on its own.
    pub fn plan_producer_closed(&mut self, producer_id: &ProducerId) -> Teardown {
        if self.producers.get(producer_id).is_none() {
            self.note_early_close(EngineResource::Producer(*producer_id));
        }
        self.cascade_producer(producer_id, false)
    }

    /// The engine closed a transport. Its producers cascade; its consumers
    /// are dropped. The engine already closed those children.
    pub fn plan_transport_closed(&mut self, transport_id: &TransportId) -> Teardown {
        let mut plan = Teardown::default();
        let Some(record) = self.registry.transport(transport_id).cloned() else {
            self.note_early_close(EngineResource::Transport(*transport_id));
            return plan;
        };

        if let Some(owner) = self.registry.peer(&record.peer_id) {
            let producers = self.producers.on_transport(owner, transport_id);
            let consumers = self.consumers.on_transport(owner, transport_id);

            for producer_id in producers {
                plan.absorb(self.cascade_producer(&producer_id, false));
            }
            for consumer_id in consumers {
                let owner = self.registry.peer_mut(&record.peer_id);
                self.consumers.unregister(&consumer_id, owner);
            }
        }

        self.registry.remove_transport(transport_id);
        info!(
            "Transport {} of peer {} closed by engine",
            transport_id, record.peer_id
        );
        plan
    }

    /// The engine closed a consumer. The record goes, and so does its
    /// receive transport once nothing else uses it.
    pub fn plan_consumer_closed(&mut self, consumer_id: &ConsumerId) -> Teardown {
        let mut plan = Teardown::default();
        let Some(record) = self.consumers.find(consumer_id).cloned() else {
            self.note_early_close(EngineResource::Consumer(*consumer_id));
            return plan;
        };

        let owner = self.registry.peer_mut(&record.peer_id);
        self.consumers.unregister(consumer_id, owner);
        plan.transports
            .extend(self.release_idle_receive_transport(&record.peer_id, &record.transport_id));
        debug!("Consumer {} of peer {} closed by engine", consumer_id, record.peer_id);
        plan
    }

    fn note_early_close(&mut self, resource: EngineResource) {
        debug!("Engine closed unrecorded {}", resource);
        self.closed_early.insert(resource);
    }

    /// Removes a receive transport of `peer_id` that no consumer uses any more.
    fn release_idle_receive_transport(
        &mut self,
        peer_id: &PeerId,
        transport_id: &TransportId,
    ) -> Option<EngineResource> {
        let idle = self
            .registry
            .peer(peer_id)
            .is_some_and(|owner| self.consumers.on_transport(owner, transport_id).is_empty());
        let receiving = self
            .registry
            .transport(transport_id)
            .is_some_and(|t| t.direction == TransportDirection::Receive);
        if !(idle && receiving) {
            return None;
        }

        self.registry.remove_transport(transport_id);
        Some(EngineResource::Transport(*transport_id))
    }

    /// Removes a producer and every consumer reading it. Each dependent's
    /// owner is told once; a receive transport left without consumers is
    /// closed with it.
    fn cascade_producer(&mut self, producer_id: &ProducerId, close_producer: bool) -> Teardown {
        let mut plan = Teardown::default();
        let Some(producer) = self.producers.get(producer_id).cloned() else {
            return plan;
        };

        for consumer_id in self.consumers.dependents(producer_id) {
            let Some(dependent) = self.consumers.find(&consumer_id).cloned() else {
                continue;
            };
            let owner = self.registry.peer_mut(&dependent.peer_id);
            self.consumers.unregister(&consumer_id, owner);
            plan.consumers.push(EngineResource::Consumer(consumer_id));
            plan.notifications.push(Notification {
                peer_id: dependent.peer_id,
                event: ServerEvent::ProducerClosed(*producer_id),
            });
            plan.transports.extend(
                self.release_idle_receive_transport(&dependent.peer_id, &dependent.transport_id),
            );
        }

        let owner = self.registry.peer_mut(&producer.peer_id);
        self.producers.unregister(producer_id, owner);
        if close_producer {
            plan.producers.push(EngineResource::Producer(*producer_id));
        }
        info!(
            "Producer {} of peer {} closed, {} dependent consumer(s) notified",
            producer_id,
            producer.peer_id,
            plan.notifications.len()
        );
        plan
    }
}
