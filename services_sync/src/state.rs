//! Server state
//!
//! Everything the handlers read and write lives here, owned by the server
//! and passed to handlers by mutable borrow. Nothing is global.

use crate::buffer::BoundedBuffer;
use crate::config::ServerConfig;
use crate::continuation::ContinuationStore;
use crate::primitive::{new_primitive, SyncPrimitive};
use crate::registry::ClientRegistry;
use crate::stats::ServerStats;
use crate::ServerError;
use core_types::ClientId;

/// Mutable state of one server run
#[derive(Debug)]
pub struct ServerState {
    pub(crate) registry: ClientRegistry,
    pub(crate) continuations: ContinuationStore,
    pub(crate) primitive: Box<dyn SyncPrimitive>,
    pub(crate) buffer: BoundedBuffer,
    /// Client currently inside the gate; the gate starts free
    pub(crate) gate_holder: Option<ClientId>,
    pub(crate) multicast_done: bool,
    pub(crate) stats: ServerStats,
}

impl ServerState {
    pub fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let mut buffer = BoundedBuffer::new(config.buffer_capacity);
        if config.trace_occupancy {
            buffer = buffer.with_trace();
        }
        Ok(Self {
            registry: ClientRegistry::new(config.population, config.client_capacity),
            continuations: ContinuationStore::new(config.client_capacity),
            primitive: new_primitive(config.primitive),
            buffer,
            gate_holder: None,
            multicast_done: false,
            stats: ServerStats::default(),
        })
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn continuations(&self) -> &ContinuationStore {
        &self.continuations
    }

    pub fn primitive(&self) -> &dyn SyncPrimitive {
        self.primitive.as_ref()
    }

    pub fn buffer(&self) -> &BoundedBuffer {
        &self.buffer
    }

    pub fn gate_holder(&self) -> Option<ClientId> {
        self.gate_holder
    }

    pub fn multicast_done(&self) -> bool {
        self.multicast_done
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}
