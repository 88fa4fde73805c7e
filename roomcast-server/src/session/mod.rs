mod cleanup;
mod consumers;
mod coordinator;
mod producers;
mod registry;

pub use cleanup::Teardown;
pub use consumers::{ConsumerDirectory, ConsumerRecord};
pub use coordinator::{ProduceOutcome, SessionCoordinator};
pub use producers::{ProducerDirectory, ProducerRecord};
pub use registry::{PeerRecord, Registry, RoomJoin, RoomRecord, TransportRecord};

use crate::config::RoomRetention;
use crate::engine::{EngineError, EngineResource};
use crate::error::SessionError;
use roomcast_core::{PeerId, ServerEvent};
use std::collections::HashSet;

/// Push event addressed to one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub peer_id: PeerId,
    pub event: ServerEvent,
}

/// Everything guarded by the coordinator lock.
#[derive(Debug)]
pub struct SessionState {
    pub registry: Registry,
    pub producers: ProducerDirectory,
    pub consumers: ConsumerDirectory,
    /// Objects the engine reported closed before the coordinator recorded
    /// them. Consumed when the pending create call resumes.
    pub closed_early: HashSet<EngineResource>,
}

impl SessionState {
    pub fn new(retention: RoomRetention) -> Self {
        Self {
            registry: Registry::new(retention),
            producers: ProducerDirectory::new(),
            consumers: ConsumerDirectory::new(),
            closed_early: HashSet::new(),
        }
    }

    /// Fails if the engine closed `resource` while its creation was still
    /// in flight. A recorded early close is consumed by the check.
    pub fn take_early_close(&mut self, resource: EngineResource) -> Result<(), SessionError> {
        if self.closed_early.remove(&resource) {
            return Err(EngineError::NotFound(resource.to_string()).into());
        }
        Ok(())
    }
}
