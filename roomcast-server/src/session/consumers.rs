use crate::session::registry::PeerRecord;
use roomcast_core::{ConsumerId, PeerId, ProducerId, RoomName, TransportId};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRecord {
    pub id: ConsumerId,
    pub peer_id: PeerId,
    pub room: RoomName,
    pub producer_id: ProducerId,
    pub transport_id: TransportId,
}

/// Active consumers with a reverse index from the producer they read.
#[derive(Debug, Default)]
pub struct ConsumerDirectory {
    consumers: HashMap<ConsumerId, ConsumerRecord>,
    by_producer: HashMap<ProducerId, Vec<ConsumerId>>,
}

impl ConsumerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn find(&self, consumer_id: &ConsumerId) -> Option<&ConsumerRecord> {
        self.consumers.get(consumer_id)
    }

    /// The consumer `peer_id` already holds for `producer_id`, if any.
    pub fn find_for(&self, peer_id: &PeerId, producer_id: &ProducerId) -> Option<&ConsumerRecord> {
        self.by_producer
            .get(producer_id)?
            .iter()
            .filter_map(|id| self.consumers.get(id))
            .find(|c| c.peer_id == *peer_id)
    }

    /// Consumers reading from `producer_id`.
    pub fn dependents(&self, producer_id: &ProducerId) -> Vec<ConsumerId> {
        self.by_producer.get(producer_id).cloned().unwrap_or_default()
    }

    /// Consumers of `owner` receiving over `transport_id`.
    pub fn on_transport(&self, owner: &PeerRecord, transport_id: &TransportId) -> Vec<ConsumerId> {
        owner
            .consumers
            .iter()
            .filter(|id| {
                self.consumers
                    .get(*id)
                    .is_some_and(|c| c.transport_id == *transport_id)
            })
            .copied()
            .collect()
    }

    pub fn register(&mut self, record: ConsumerRecord, owner: &mut PeerRecord) {
        owner.consumers.push(record.id);
        self.by_producer
            .entry(record.producer_id)
            .or_default()
            .push(record.id);
        self.consumers.insert(record.id, record);
    }

    pub fn unregister(
        &mut self,
        consumer_id: &ConsumerId,
        owner: Option<&mut PeerRecord>,
    ) -> Option<ConsumerRecord> {
        let record = self.consumers.remove(consumer_id)?;

        if let Some(ids) = self.by_producer.get_mut(&record.producer_id) {
            ids.retain(|id| id != consumer_id);
            if ids.is_empty() {
                self.by_producer.remove(&record.producer_id);
            }
        }
        if let Some(owner) = owner {
            owner.consumers.retain(|id| id != consumer_id);
        }
        Some(record)
    }
}
