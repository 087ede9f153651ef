//! Client registry
//!
//! Clients are numbered in order of first contact. The registry also owns
//! the start barrier and the termination count: the barrier fires exactly
//! once, on the arrival that brings the count to the configured population,
//! and termination is complete on the `TMNT` that does the same.

use crate::ServerError;
use core_types::ClientId;
use ipc::MessageLabel;

/// What a parked client is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkedOn {
    /// Entry to the gate; the label is the request that will be answered
    Gate(MessageLabel),
    /// Room in the buffer
    Produce,
    /// An item in the buffer
    Consume,
}

/// Per-client bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientRecord {
    pub holds_gate: bool,
    pub parked: Option<ParkedOn>,
    pub terminated: bool,
}

/// Client identity, barrier and termination bookkeeping
#[derive(Debug)]
pub struct ClientRegistry {
    capacity: usize,
    population: usize,
    clients: Vec<ClientRecord>,
    barrier_arrivals: usize,
    barrier_fired: bool,
    terminations: usize,
}

impl ClientRegistry {
    pub fn new(population: usize, capacity: usize) -> Self {
        Self {
            capacity,
            population,
            clients: Vec::with_capacity(capacity),
            barrier_arrivals: 0,
            barrier_fired: false,
            terminations: 0,
        }
    }

    /// Assigns the next client id
    pub fn register(&mut self) -> Result<ClientId, ServerError> {
        if self.clients.len() >= self.capacity {
            return Err(ServerError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        let id = ClientId::new(self.clients.len() as u32);
        self.clients.push(ClientRecord::default());
        Ok(id)
    }

    /// Counts one arrival; returns `true` on the arrival that fires the barrier
    pub fn arrive_at_barrier(&mut self) -> bool {
        self.barrier_arrivals += 1;
        if !self.barrier_fired && self.barrier_arrivals == self.population {
            self.barrier_fired = true;
            return true;
        }
        false
    }

    /// Counts one termination; returns `true` when the whole population is done
    pub fn note_terminate(&mut self) -> bool {
        self.terminations += 1;
        self.terminations == self.population
    }

    pub fn population(&self) -> usize {
        self.population
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of registered clients
    pub fn registered(&self) -> usize {
        self.clients.len()
    }

    pub fn barrier_arrivals(&self) -> usize {
        self.barrier_arrivals
    }

    pub fn barrier_fired(&self) -> bool {
        self.barrier_fired
    }

    pub fn terminations(&self) -> usize {
        self.terminations
    }

    pub fn is_registered(&self, client: ClientId) -> bool {
        client.as_usize() < self.clients.len()
    }

    pub fn is_parked(&self, client: ClientId) -> bool {
        self.record(client).is_some_and(|r| r.parked.is_some())
    }

    pub fn record(&self, client: ClientId) -> Option<&ClientRecord> {
        self.clients.get(client.as_usize())
    }

    pub fn record_mut(&mut self, client: ClientId) -> Option<&mut ClientRecord> {
        self.clients.get_mut(client.as_usize())
    }

    /// Iterates over registered clients and their records
    pub fn iter(&self) -> impl Iterator<Item = (ClientId, &ClientRecord)> {
        self.clients
            .iter()
            .enumerate()
            .map(|(i, record)| (ClientId::new(i as u32), record))
    }
}
