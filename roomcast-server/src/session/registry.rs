//! Authoritative membership store.
//!
//! Rooms, peers and transports live in independent maps keyed by id; every
//! cross reference is an explicit field so removal only walks the owning
//! record's lists.

use crate::config::RoomRetention;
use crate::engine::RouterHandle;
use crate::error::SessionError;
use roomcast_core::{
    ConsumerId, PeerDetails, PeerId, ProducerId, RoomName, RouterId, TransportDirection,
    TransportId,
};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RoomRecord {
    pub name: RoomName,
    pub router: RouterHandle,
    /// Join order.
    pub peers: Vec<PeerId>,
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: PeerId,
    pub room: RoomName,
    pub transports: Vec<TransportId>,
    /// Absent until the peer creates its send transport.
    pub send_transport: Option<TransportId>,
    pub producers: Vec<ProducerId>,
    pub consumers: Vec<ConsumerId>,
    pub details: PeerDetails,
}

impl PeerRecord {
    fn new(id: PeerId, room: RoomName) -> Self {
        Self {
            id,
            room,
            transports: Vec::new(),
            send_transport: None,
            producers: Vec::new(),
            consumers: Vec::new(),
            details: PeerDetails::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRecord {
    pub id: TransportId,
    pub peer_id: PeerId,
    pub room: RoomName,
    pub direction: TransportDirection,
}

/// Result of installing a freshly created routing context.
#[derive(Debug)]
pub struct RoomJoin {
    pub router: RouterHandle,
    /// Set when another joiner installed the room first; the caller's
    /// router is surplus and must be closed.
    pub surplus_router: Option<RouterId>,
}

#[derive(Debug)]
pub struct Registry {
    retention: RoomRetention,
    rooms: HashMap<RoomName, RoomRecord>,
    peers: HashMap<PeerId, PeerRecord>,
    transports: HashMap<TransportId, TransportRecord>,
}

impl Registry {
    pub fn new(retention: RoomRetention) -> Self {
        Self {
            retention,
            rooms: HashMap::new(),
            peers: HashMap::new(),
            transports: HashMap::new(),
        }
    }

    pub fn room(&self, name: &RoomName) -> Option<&RoomRecord> {
        self.rooms.get(name)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &RoomRecord> {
        self.rooms.values()
    }

    pub fn peer(&self, peer_id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    pub fn peer_mut(&mut self, peer_id: &PeerId) -> Option<&mut PeerRecord> {
        self.peers.get_mut(peer_id)
    }

    pub fn transport(&self, transport_id: &TransportId) -> Option<&TransportRecord> {
        self.transports.get(transport_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Room of a joined peer.
    pub fn room_of(&self, peer_id: &PeerId) -> Result<&RoomRecord, SessionError> {
        self.peers
            .get(peer_id)
            .and_then(|peer| self.rooms.get(&peer.room))
            .ok_or(SessionError::RoomNotFound(*peer_id))
    }

    /// Joins an existing room, returning its routing context. `None` means
    /// the room does not exist yet and a router must be created first.
    pub fn join_room(&mut self, name: &RoomName, peer_id: PeerId) -> Option<RouterHandle> {
        let room = self.rooms.get_mut(name)?;
        if !room.peers.contains(&peer_id) {
            room.peers.push(peer_id);
        }
        debug!("Peer {} joined existing room '{}'", peer_id, name);
        Some(room.router.clone())
    }

    /// Records a room under a router created while the lock was released.
    /// If a concurrent joiner got there first, its router wins.
    pub fn install_room(&mut self, name: RoomName, router: RouterHandle, peer_id: PeerId) -> RoomJoin {
        if let Some(existing) = self.join_room(&name, peer_id) {
            return RoomJoin {
                router: existing,
                surplus_router: Some(router.id),
            };
        }

        info!("Room '{}' created with router {}", name, router.id);
        self.rooms.insert(
            name.clone(),
            RoomRecord {
                name,
                router: router.clone(),
                peers: vec![peer_id],
            },
        );
        RoomJoin {
            router,
            surplus_router: None,
        }
    }

    /// Creates an empty resource set for the peer. A previous record for the
    /// same id is replaced; callers release its resources beforehand. Returns
    /// the router of a room the peer's move left empty.
    pub fn register_peer(&mut self, peer_id: PeerId, room: RoomName) -> Option<RouterId> {
        let old_room = self
            .peers
            .get(&peer_id)
            .filter(|previous| previous.room != room)
            .map(|previous| previous.room.clone());
        let released = old_room.and_then(|old| self.leave_room(&old, &peer_id));

        self.peers.insert(peer_id, PeerRecord::new(peer_id, room));
        released
    }

    pub fn add_transport(&mut self, record: TransportRecord) -> Result<(), SessionError> {
        let peer = self
            .peers
            .get_mut(&record.peer_id)
            .ok_or(SessionError::PeerNotFound(record.peer_id))?;

        if record.direction == TransportDirection::Send {
            if peer.send_transport.is_some() {
                return Err(SessionError::SendTransportExists(record.peer_id));
            }
            peer.send_transport = Some(record.id);
        }
        peer.transports.push(record.id);
        self.transports.insert(record.id, record);
        Ok(())
    }

    pub fn find_send_transport(&self, peer_id: &PeerId) -> Result<TransportId, SessionError> {
        self.peers
            .get(peer_id)
            .and_then(|peer| peer.send_transport)
            .ok_or(SessionError::NoSendTransport(*peer_id))
    }

    /// A transport owned by `peer_id` with the given direction.
    pub fn find_owned_transport(
        &self,
        peer_id: &PeerId,
        transport_id: &TransportId,
        direction: TransportDirection,
    ) -> Result<&TransportRecord, SessionError> {
        self.transports
            .get(transport_id)
            .filter(|t| t.peer_id == *peer_id && t.direction == direction)
            .ok_or(SessionError::TransportNotFound(*transport_id))
    }

    pub fn remove_transport(&mut self, transport_id: &TransportId) -> Option<TransportRecord> {
        let record = self.transports.remove(transport_id)?;
        if let Some(peer) = self.peers.get_mut(&record.peer_id) {
            peer.transports.retain(|id| id != transport_id);
            if peer.send_transport == Some(*transport_id) {
                peer.send_transport = None;
            }
        }
        Some(record)
    }

    /// Removes the peer from its room and deletes its record. Owned
    /// resources are not touched. Returns the removed record and, when the
    /// room was released, the router to close.
    pub fn remove_peer(&mut self, peer_id: &PeerId) -> Option<(PeerRecord, Option<RouterId>)> {
        let record = self.peers.remove(peer_id)?;
        let released = self.leave_room(&record.room, peer_id);
        Some((record, released))
    }

    fn leave_room(&mut self, name: &RoomName, peer_id: &PeerId) -> Option<RouterId> {
        let room = self.rooms.get_mut(name)?;
        room.peers.retain(|id| id != peer_id);

        if room.peers.is_empty() && self.retention == RoomRetention::Release {
            let room = self.rooms.remove(name)?;
            info!("Room '{}' released (router {})", name, room.router.id);
            return Some(room.router.id);
        }
        None
    }
}
