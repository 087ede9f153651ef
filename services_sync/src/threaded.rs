//! Worker-thread server
//!
//! [`ThreadedServer`] runs the same coordination policy as
//! [`SyncServer`](crate::SyncServer), but with one preemptible worker thread
//! per client instead of parked continuations. Every worker receives from a
//! shared endpoint, handles the request, and answers its caller directly. A
//! worker whose client must wait blocks on its own parker until another
//! worker signals it.
//!
//! Workers share one synchronization primitive, one buffer, the gate and the
//! registry's barrier and termination counters. All of it lives behind a
//! single lock, and the primitive's critical section is only ever entered
//! while that lock is held. Statistics are kept per worker and merged when
//! the run ends.
//!
//! Replies go straight to the caller a worker received from, so there are no
//! reply tokens here and [`ReplyStrategy::Saved`] is rejected.

use crate::buffer::BoundedBuffer;
use crate::config::{MulticastTrigger, ReplyStrategy, ServerConfig};
use crate::dispatch::BufferOp;
use crate::primitive::{new_primitive, Acquire, Queue, SyncPrimitive};
use crate::registry::{ClientRecord, ClientRegistry, ParkedOn};
use crate::stats::{RunSummary, ServerStats};
use crate::{ProtocolViolation, ServerError};
use core_types::{ClientId, Word};
use ipc::{replies, Message, MessageLabel, Request};
use kernel_api::{KernelError, Received, SharedEndpoint};
use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

fn poisoned<T>(_: PoisonError<T>) -> ServerError {
    ServerError::Invariant("shared state poisoned by a panicked worker".to_string())
}

/// Returned by a worker that noticed the run is over
fn stopped() -> ServerError {
    ServerError::Channel(KernelError::Closed)
}

/// One-permit wakeup for a blocked worker
#[derive(Debug, Default)]
struct Parker {
    woken: Mutex<bool>,
    signal: Condvar,
}

impl Parker {
    fn park(&self) -> Result<(), ServerError> {
        let woken = self.woken.lock().map_err(poisoned)?;
        let mut woken = self
            .signal
            .wait_while(woken, |woken| !*woken)
            .map_err(poisoned)?;
        *woken = false;
        Ok(())
    }

    fn unpark(&self) {
        if let Ok(mut woken) = self.woken.lock() {
            *woken = true;
        }
        self.signal.notify_one();
    }

    fn clear(&self) {
        if let Ok(mut woken) = self.woken.lock() {
            *woken = false;
        }
    }
}

/// State every worker reads and writes
#[derive(Debug)]
struct Shared {
    primitive: Box<dyn SyncPrimitive>,
    buffer: BoundedBuffer,
    registry: ClientRegistry,
    gate_holder: Option<ClientId>,
    /// Registered clients still waiting for their barrier release
    held: BTreeSet<ClientId>,
    multicast_done: bool,
    /// Set when the run ends; woken workers give up instead of waiting again
    stopping: bool,
}

/// The synchronization server, one worker thread per client
///
/// Unpark calls are made while the shared lock is held. A worker that finds
/// itself released without having slept clears its parker under the same
/// lock, so a parker never carries a stale wakeup into a later wait.
pub struct ThreadedServer<E> {
    endpoint: E,
    config: ServerConfig,
    shared: Mutex<Shared>,
    parkers: Vec<Parker>,
    run_id: Uuid,
}

impl<E: SharedEndpoint> ThreadedServer<E> {
    /// Creates a server that will run `config.population` workers on `endpoint`
    ///
    /// Registration is capped at the population: a worker is committed to each
    /// client, and an extra client would hold one at the barrier for good.
    pub fn new(endpoint: E, config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        if config.reply_strategy == ReplyStrategy::Saved {
            return Err(ServerError::InvalidConfig(
                "saved replies need a slot allocator; worker threads answer their caller directly"
                    .to_string(),
            ));
        }

        let mut buffer = BoundedBuffer::new(config.buffer_capacity);
        if config.trace_occupancy {
            buffer = buffer.with_trace();
        }
        let shared = Shared {
            primitive: new_primitive(config.primitive),
            buffer,
            registry: ClientRegistry::new(config.population, config.population),
            gate_holder: None,
            held: BTreeSet::new(),
            multicast_done: false,
            stopping: false,
        };
        let parkers = (0..config.population).map(|_| Parker::default()).collect();

        Ok(Self {
            endpoint,
            config,
            shared: Mutex::new(shared),
            parkers,
            run_id: Uuid::new_v4(),
        })
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the number of worker threads a run starts
    pub fn workers(&self) -> usize {
        self.config.population
    }

    /// Starts the workers and waits until every client has terminated
    ///
    /// The worker that handles the final `TMNT` closes the endpoint, which
    /// sends every other worker home. A fatal error in any worker does the
    /// same and is returned here.
    pub fn run(&self) -> Result<RunSummary, ServerError> {
        info!(
            run_id = %self.run_id,
            workers = self.workers(),
            primitive = %self.config.primitive,
            strategy = %self.config.reply_strategy,
            "threaded sync server started"
        );

        let results: Vec<Result<ServerStats, ServerError>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..self.workers())
                .map(|worker| scope.spawn(move || self.worker(worker)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(ServerError::Invariant("worker thread panicked".to_string()))
                    })
                })
                .collect()
        });

        let mut stats = ServerStats::default();
        let mut failure = None;
        for result in results {
            match result {
                Ok(worker_stats) => stats.merge(&worker_stats),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            error!(error = %e, "threaded sync server stopped");
            return Err(e);
        }

        let shared = self.lock()?;
        if shared.registry.terminations() < shared.registry.population() {
            warn!(
                terminations = shared.registry.terminations(),
                "endpoint closed before every client terminated"
            );
            return Err(stopped());
        }
        let summary = RunSummary {
            run_id: self.run_id,
            population: self.config.population,
            primitive: self.config.primitive,
            reply_strategy: self.config.reply_strategy,
            multicast: self.config.multicast,
            final_occupancy: shared.buffer.occupancy(),
            occupancy_trace: shared.buffer.trace().map(<[usize]>::to_vec),
            stats,
        };
        info!(
            run_id = %summary.run_id,
            requests = summary.stats.total_requests(),
            occupancy = summary.final_occupancy,
            "all clients terminated"
        );
        Ok(summary)
    }

    fn worker(&self, worker: usize) -> Result<ServerStats, ServerError> {
        let mut stats = ServerStats::default();
        match self.serve(worker, &mut stats) {
            Ok(()) => {
                debug!(worker, "worker exiting");
                Ok(stats)
            }
            Err(e) => {
                error!(worker, error = %e, "worker failed");
                self.stop();
                Err(e)
            }
        }
    }

    /// The loop body each worker runs: receive, handle, answer
    fn serve(&self, worker: usize, stats: &mut ServerStats) -> Result<(), ServerError> {
        let mut received = self.endpoint.receive();
        loop {
            let Received { message, caller } = match received {
                Ok(received) => received,
                Err(KernelError::Closed) => return Ok(()),
                Err(e) => return Err(ServerError::Channel(e)),
            };

            let reply = match self.handle(worker, &message, stats) {
                Ok(reply) => reply,
                Err(ServerError::Channel(KernelError::Closed)) => return Ok(()),
                Err(e) => return Err(e),
            };

            received = match (reply, caller) {
                (Some(reply), Some(caller)) => match self.config.reply_strategy {
                    ReplyStrategy::Fast => self.endpoint.reply_then_receive(caller, reply),
                    ReplyStrategy::Slow | ReplyStrategy::Saved => {
                        self.endpoint
                            .reply(caller, reply)
                            .map_err(ServerError::Channel)?;
                        self.endpoint.receive()
                    }
                },
                _ => self.endpoint.receive(),
            };
        }
    }

    fn handle(
        &self,
        worker: usize,
        message: &Message,
        stats: &mut ServerStats,
    ) -> Result<Option<Message>, ServerError> {
        let request = match Request::decode(message) {
            Ok(request) => request,
            Err(e) => {
                Self::note_violation(stats, ProtocolViolation::Malformed(e));
                return Ok(None);
            }
        };
        stats.record_request(request.label());
        debug!(worker, label = %request.label(), client = ?request.client(), "dispatch");

        let outcome = match request {
            Request::Init => self.handle_init(stats).map(Some),
            Request::Wait { client } => self.handle_wait(client, stats).map(Some),
            Request::SendWait { client, seq } => {
                self.handle_send_wait(client, seq, stats).map(Some)
            }
            Request::Producer { client } => {
                self.handle_buffer(client, BufferOp::Put, stats).map(Some)
            }
            Request::Consumer { client } => {
                self.handle_buffer(client, BufferOp::Take, stats).map(Some)
            }
            Request::Terminate { client } => self.handle_terminate(client).map(|()| None),
            Request::Immediate => {
                info!(worker, "IMMD received");
                Ok(None)
            }
        };
        match outcome {
            Err(ServerError::Protocol(violation)) => {
                Self::note_violation(stats, violation);
                Ok(None)
            }
            other => other,
        }
    }

    fn handle_init(&self, stats: &mut ServerStats) -> Result<Message, ServerError> {
        let client = {
            let mut shared = self.lock()?;
            let client = shared.registry.register()?;
            shared.held.insert(client);
            info!(%client, "client registered");

            if shared.registry.arrive_at_barrier() {
                info!(population = shared.registry.population(), "barrier reached");
                let initiator = ClientId::new(0);
                shared.held.remove(&initiator);
                let mut released = vec![initiator];
                if self.config.multicast == MulticastTrigger::Barrier {
                    released.extend(Self::multicast_ready(&mut shared, stats));
                }
                self.unpark_all(released.into_iter().filter(|&c| c != client))?;
            }
            client
        };

        self.wait_for_release(client)?;
        Ok(if client.index() == 0 {
            replies::initiator_release()
        } else {
            replies::ready(client)
        })
    }

    fn handle_wait(&self, client: ClientId, stats: &mut ServerStats) -> Result<Message, ServerError> {
        {
            let mut shared = self.lock()?;
            let record = Self::active_record(&shared, client)?;
            if record.holds_gate {
                return Err(ProtocolViolation::WaitWhileHolding(client).into());
            }
            if self.config.multicast == MulticastTrigger::InitiatorWait && client.index() == 0 {
                let released = Self::multicast_ready(&mut shared, stats);
                self.unpark_all(released.into_iter())?;
            }
        }

        self.enter_gate(client, MessageLabel::Wait, stats)?;
        Ok(replies::completion(MessageLabel::Wait, client))
    }

    fn handle_send_wait(
        &self,
        client: ClientId,
        seq: Option<Word>,
        stats: &mut ServerStats,
    ) -> Result<Message, ServerError> {
        let record = Self::active_record(&*self.lock()?, client)?;
        if !record.holds_gate {
            return Err(ProtocolViolation::SendWaitWithoutGate(client).into());
        }
        debug!(%client, ?seq, "handing off gate");

        self.leave_gate(client)?;
        self.enter_gate(client, MessageLabel::SendWait, stats)?;
        Ok(replies::completion(MessageLabel::SendWait, client))
    }

    fn handle_buffer(
        &self,
        client: ClientId,
        op: BufferOp,
        stats: &mut ServerStats,
    ) -> Result<Message, ServerError> {
        Self::active_record(&*self.lock()?, client)?;
        self.buffer_op(client, op, stats)?;
        Ok(replies::completion(op.label(), client))
    }

    fn handle_terminate(&self, client: ClientId) -> Result<(), ServerError> {
        let record = Self::active_record(&*self.lock()?, client)?;
        if record.holds_gate {
            self.leave_gate(client)?;
        }

        let mut shared = self.lock()?;
        Self::record_mut(&mut shared, client)?.terminated = true;
        debug!(%client, "client terminated");
        if shared.registry.note_terminate() {
            info!(
                population = shared.registry.population(),
                "every client terminated, closing endpoint"
            );
            drop(shared);
            self.stop();
        }
        Ok(())
    }

    /// Releases client 0's barrier peers; returns who was released
    fn multicast_ready(shared: &mut Shared, stats: &mut ServerStats) -> Vec<ClientId> {
        if shared.multicast_done {
            return Vec::new();
        }
        shared.multicast_done = true;

        let population = shared.registry.population();
        let released: Vec<ClientId> = (1..population)
            .map(|index| ClientId::new(index as u32))
            .filter(|client| shared.held.remove(client))
            .collect();
        stats.broadcasts += 1;
        info!(recipients = released.len(), "ready multicast sent");
        released
    }

    /// Blocks until `client` is no longer held at the barrier
    fn wait_for_release(&self, client: ClientId) -> Result<(), ServerError> {
        loop {
            {
                let shared = self.lock()?;
                if shared.stopping {
                    return Err(stopped());
                }
                if !shared.held.contains(&client) {
                    self.parker(client)?.clear();
                    return Ok(());
                }
            }
            self.parker(client)?.park()?;
        }
    }

    fn enter_gate(
        &self,
        client: ClientId,
        label: MessageLabel,
        stats: &mut ServerStats,
    ) -> Result<(), ServerError> {
        loop {
            let mut shared = self.lock()?;
            if shared.stopping {
                return Err(stopped());
            }
            let holder = shared.gate_holder;
            let outcome = shared
                .primitive
                .acquire_then_wait_while(client, Queue::Gate, &mut || holder.is_some());

            match outcome {
                Acquire::Entered => {
                    shared.gate_holder = Some(client);
                    shared.primitive.release();
                    let record = Self::record_mut(&mut shared, client)?;
                    record.holds_gate = true;
                    record.parked = None;
                    debug!(%client, "entered gate");
                    return Ok(());
                }
                Acquire::Parked => self.park(shared, client, ParkedOn::Gate(label), stats)?,
            }
        }
    }

    fn leave_gate(&self, client: ClientId) -> Result<(), ServerError> {
        let mut shared = self.lock()?;
        let outcome = shared
            .primitive
            .acquire_then_wait_while(client, Queue::Gate, &mut || false);
        if outcome != Acquire::Entered {
            return Err(ServerError::Invariant(format!(
                "{} could not enter the critical section to leave the gate",
                client
            )));
        }

        shared.gate_holder = None;
        let woken = shared.primitive.signal(Queue::Gate);
        shared.primitive.release();
        Self::record_mut(&mut shared, client)?.holds_gate = false;
        debug!(%client, "left gate");

        self.unpark_all(woken.into_iter())
    }

    fn buffer_op(
        &self,
        client: ClientId,
        op: BufferOp,
        stats: &mut ServerStats,
    ) -> Result<(), ServerError> {
        loop {
            let mut shared = self.lock()?;
            if shared.stopping {
                return Err(stopped());
            }
            let Shared {
                primitive, buffer, ..
            } = &mut *shared;
            let outcome =
                primitive.acquire_then_wait_while(client, op.wait_queue(), &mut || match op {
                    BufferOp::Put => buffer.is_full(),
                    BufferOp::Take => buffer.is_empty(),
                });
            if outcome == Acquire::Parked {
                self.park(shared, client, op.parked_on(), stats)?;
                continue;
            }

            let applied = match op {
                BufferOp::Put => shared.buffer.put(),
                BufferOp::Take => shared.buffer.take(),
            };
            let occupancy = match applied {
                Ok(occupancy) => occupancy,
                Err(e) => {
                    shared.primitive.release();
                    return Err(ServerError::Invariant(e.to_string()));
                }
            };
            let woken = shared.primitive.signal(op.signal_queue());
            shared.primitive.release();
            Self::record_mut(&mut shared, client)?.parked = None;
            debug!(%client, label = %op.label(), occupancy, "buffer updated");

            return self.unpark_all(woken.into_iter());
        }
    }

    /// Marks `client` parked, gives up the shared lock and sleeps
    fn park(
        &self,
        mut shared: MutexGuard<'_, Shared>,
        client: ClientId,
        on: ParkedOn,
        stats: &mut ServerStats,
    ) -> Result<(), ServerError> {
        Self::record_mut(&mut shared, client)?.parked = Some(on);
        stats.parks += 1;
        debug!(%client, parked_on = ?on, "parked");
        drop(shared);

        self.parker(client)?.park()?;
        stats.wakeups += 1;
        Ok(())
    }

    fn unpark_all(&self, clients: impl Iterator<Item = ClientId>) -> Result<(), ServerError> {
        for client in clients {
            self.parker(client)?.unpark();
        }
        Ok(())
    }

    /// Ends the run: parked workers give up and the endpoint is closed
    fn stop(&self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.stopping = true;
        }
        for parker in &self.parkers {
            parker.unpark();
        }
        self.endpoint.close();
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shared>, ServerError> {
        self.shared.lock().map_err(poisoned)
    }

    fn parker(&self, client: ClientId) -> Result<&Parker, ServerError> {
        self.parkers
            .get(client.as_usize())
            .ok_or_else(|| ProtocolViolation::UnknownClient(client).into())
    }

    fn active_record(shared: &Shared, client: ClientId) -> Result<ClientRecord, ProtocolViolation> {
        let record = shared
            .registry
            .record(client)
            .ok_or(ProtocolViolation::UnknownClient(client))?;
        if record.terminated {
            return Err(ProtocolViolation::Terminated(client));
        }
        if record.parked.is_some() || shared.held.contains(&client) {
            return Err(ProtocolViolation::AlreadyParked(client));
        }
        Ok(record.clone())
    }

    fn record_mut(shared: &mut Shared, client: ClientId) -> Result<&mut ClientRecord, ServerError> {
        shared
            .registry
            .record_mut(client)
            .ok_or_else(|| ProtocolViolation::UnknownClient(client).into())
    }

    fn note_violation(stats: &mut ServerStats, violation: ProtocolViolation) {
        stats.violations += 1;
        warn!(error = %violation, "protocol violation, message dropped");
    }
}
