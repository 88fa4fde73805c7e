use crate::session::registry::{PeerRecord, Registry};
use crate::session::Notification;
use roomcast_core::{MediaKind, PeerId, ProducerId, RoomName, ServerEvent, TransportId};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub id: ProducerId,
    pub peer_id: PeerId,
    pub room: RoomName,
    pub transport_id: TransportId,
    pub kind: MediaKind,
}

/// Active producers, indexed globally and per room in registration order.
#[derive(Debug, Default)]
pub struct ProducerDirectory {
    producers: HashMap<ProducerId, ProducerRecord>,
    by_room: HashMap<RoomName, Vec<ProducerId>>,
}

impl ProducerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, producer_id: &ProducerId) -> Option<&ProducerRecord> {
        self.producers.get(producer_id)
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    pub fn register(&mut self, record: ProducerRecord, owner: &mut PeerRecord) {
        owner.producers.push(record.id);
        self.by_room
            .entry(record.room.clone())
            .or_default()
            .push(record.id);
        self.producers.insert(record.id, record);
    }

    /// Producers in `room` not owned by `excluding`, first registered first.
    pub fn list_others(&self, room: &RoomName, excluding: &PeerId) -> Vec<ProducerId> {
        self.by_room
            .get(room)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        self.producers
                            .get(*id)
                            .is_some_and(|p| p.peer_id != *excluding)
                    })
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn others_exist(&self, room: &RoomName, excluding: &PeerId) -> bool {
        self.by_room.get(room).is_some_and(|ids| {
            ids.iter().any(|id| {
                self.producers
                    .get(id)
                    .is_some_and(|p| p.peer_id != *excluding)
            })
        })
    }

    /// One `new-producer` event for every other peer currently in the room.
    pub fn notify_new_producer(
        &self,
        registry: &Registry,
        room: &RoomName,
        excluding: &PeerId,
        producer_id: ProducerId,
    ) -> Vec<Notification> {
        registry
            .room(room)
            .map(|r| {
                r.peers
                    .iter()
                    .filter(|peer| *peer != excluding)
                    .map(|peer| Notification {
                        peer_id: *peer,
                        event: ServerEvent::NewProducer(producer_id),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Producers of `owner` sending over `transport_id`.
    pub fn on_transport(&self, owner: &PeerRecord, transport_id: &TransportId) -> Vec<ProducerId> {
        owner
            .producers
            .iter()
            .filter(|id| {
                self.producers
                    .get(*id)
                    .is_some_and(|p| p.transport_id == *transport_id)
            })
            .copied()
            .collect()
    }

    pub fn unregister(
        &mut self,
        producer_id: &ProducerId,
        owner: Option<&mut PeerRecord>,
    ) -> Option<ProducerRecord> {
        let record = self.producers.remove(producer_id)?;

        if let Some(ids) = self.by_room.get_mut(&record.room) {
            ids.retain(|id| id != producer_id);
            if ids.is_empty() {
                self.by_room.remove(&record.room);
            }
        }
        if let Some(owner) = owner {
            owner.producers.retain(|id| id != producer_id);
        }
        Some(record)
    }
}
