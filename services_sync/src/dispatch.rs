//! Dispatch loop and request handlers
//!
//! Each iteration receives one message, decodes it, routes it to its handler
//! and then carries out the handler's [`ReplyDirective`]. Handlers never
//! touch the endpoint's implicit reply target directly; the loop does that
//! once per iteration, according to the configured [`ReplyStrategy`].
//!
//! A handler whose predicate holds parks its client and returns
//! [`ReplyDirective::Deferred`]. A handler that wakes a parked client resumes
//! it before returning, so a woken client has its reply in flight before the
//! next message is received.

use crate::config::{MulticastTrigger, ReplyStrategy, ServerConfig};
use crate::primitive::{Acquire, Queue};
use crate::registry::{ClientRecord, ParkedOn};
use crate::state::ServerState;
use crate::stats::RunSummary;
use crate::{ProtocolViolation, ServerError};
use core_types::{ClientId, Word};
use ipc::{replies, Message, MessageLabel, Request};
use kernel_api::{Endpoint, SlotAllocator};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What the loop should do about the request just handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyDirective {
    /// Reply to the current caller now
    Immediate(Message),
    /// The reply was captured and will be delivered through a token later
    Deferred,
    /// The reply may ride on the next receive
    NextIsReply(Message),
    /// The request expects no reply
    NoReply,
}

/// Outcome of one loop iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// The final `TMNT` was handled
    Finished(RunSummary),
}

/// Whether a handler runs for a newly received request or a resumed one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Fresh,
    Resumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BufferOp {
    Put,
    Take,
}

impl BufferOp {
    pub(crate) fn wait_queue(self) -> Queue {
        match self {
            BufferOp::Put => Queue::NotFull,
            BufferOp::Take => Queue::NotEmpty,
        }
    }

    pub(crate) fn signal_queue(self) -> Queue {
        match self {
            BufferOp::Put => Queue::NotEmpty,
            BufferOp::Take => Queue::NotFull,
        }
    }

    pub(crate) fn parked_on(self) -> ParkedOn {
        match self {
            BufferOp::Put => ParkedOn::Produce,
            BufferOp::Take => ParkedOn::Consume,
        }
    }

    pub(crate) fn label(self) -> MessageLabel {
        match self {
            BufferOp::Put => MessageLabel::Producer,
            BufferOp::Take => MessageLabel::Consumer,
        }
    }
}

/// The synchronization server
///
/// Owns its endpoint and all run state. Single-threaded: every handler runs
/// to completion before the next message is received.
pub struct SyncServer<K> {
    kernel: K,
    config: ServerConfig,
    state: ServerState,
    /// Reply carried into the next receive under [`ReplyStrategy::Fast`]
    pending_reply: Option<Message>,
    run_id: Uuid,
    /// Set by the `TMNT` that completes the population
    finished: bool,
    /// Set once the summary for that `TMNT` has been handed out
    finalized: bool,
}

impl<K: Endpoint + SlotAllocator> SyncServer<K> {
    /// Creates a server listening on `kernel`
    pub fn new(kernel: K, config: ServerConfig) -> Result<Self, ServerError> {
        let state = ServerState::new(&config)?;
        Ok(Self {
            kernel,
            config,
            state,
            pending_reply: None,
            run_id: Uuid::new_v4(),
            finished: false,
            finalized: false,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    pub fn into_kernel(self) -> K {
        self.kernel
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns whether the run has been finalized
    pub fn is_finished(&self) -> bool {
        self.finalized
    }

    /// Returns whether a reply is waiting to ride on the next receive
    pub fn has_pending_reply(&self) -> bool {
        self.pending_reply.is_some()
    }

    /// Serves requests until every client has terminated
    pub fn run(&mut self) -> Result<RunSummary, ServerError> {
        if self.finalized {
            return Ok(self.summary());
        }
        info!(
            run_id = %self.run_id,
            population = self.config.population,
            primitive = %self.config.primitive,
            strategy = %self.config.reply_strategy,
            "sync server started"
        );
        loop {
            match self.step() {
                Ok(Step::Continue) => {}
                Ok(Step::Finished(summary)) => return Ok(summary),
                Err(e) => {
                    error!(error = %e, "sync server stopped");
                    return Err(e);
                }
            }
        }
    }

    /// Runs one iteration: receive, decode, dispatch, reply
    ///
    /// Returns [`Step::Finished`] exactly once, for the `TMNT` that completes
    /// the population. Messages handled after that return [`Step::Continue`].
    pub fn step(&mut self) -> Result<Step, ServerError> {
        let received = match self.pending_reply.take() {
            Some(reply) => self.kernel.reply_then_receive(reply),
            None => self.kernel.receive(),
        };
        let message = received.map_err(ServerError::Channel)?;

        let request = match Request::decode(&message) {
            Ok(request) => request,
            Err(e) => {
                self.note_violation(ProtocolViolation::Malformed(e));
                return Ok(Step::Continue);
            }
        };
        self.state.stats.record_request(request.label());
        debug!(label = %request.label(), client = ?request.client(), "dispatch");

        let directive = match self.dispatch(request) {
            Ok(directive) => directive,
            Err(ServerError::Protocol(violation)) => {
                self.note_violation(violation);
                return Ok(Step::Continue);
            }
            Err(e) => return Err(e),
        };
        self.execute(request, directive)?;

        if self.finished && !self.finalized {
            self.finalized = true;
            let summary = self.summary();
            info!(
                run_id = %summary.run_id,
                requests = summary.stats.total_requests(),
                occupancy = summary.final_occupancy,
                "all clients terminated"
            );
            return Ok(Step::Finished(summary));
        }
        Ok(Step::Continue)
    }

    /// Builds the run summary from the current state
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            population: self.config.population,
            primitive: self.config.primitive,
            reply_strategy: self.config.reply_strategy,
            multicast: self.config.multicast,
            final_occupancy: self.state.buffer.occupancy(),
            occupancy_trace: self.state.buffer.trace().map(<[usize]>::to_vec),
            stats: self.state.stats.clone(),
        }
    }

    fn dispatch(&mut self, request: Request) -> Result<ReplyDirective, ServerError> {
        match request {
            Request::Init => self.handle_init(),
            Request::Wait { client } => self.handle_wait(client),
            Request::SendWait { client, seq } => self.handle_send_wait(client, seq),
            Request::Producer { client } => self.handle_buffer(client, BufferOp::Put),
            Request::Consumer { client } => self.handle_buffer(client, BufferOp::Take),
            Request::Terminate { client } => self.handle_terminate(client),
            Request::Immediate => {
                info!("IMMD received");
                Ok(ReplyDirective::NoReply)
            }
        }
    }

    fn execute(&mut self, request: Request, directive: ReplyDirective) -> Result<(), ServerError> {
        match directive {
            ReplyDirective::Immediate(reply) => {
                self.kernel.reply(reply).map_err(ServerError::Channel)
            }
            ReplyDirective::Deferred | ReplyDirective::NoReply => Ok(()),
            ReplyDirective::NextIsReply(reply) => match (self.config.reply_strategy, request.client()) {
                (ReplyStrategy::Fast, _) => {
                    self.pending_reply = Some(reply);
                    Ok(())
                }
                (ReplyStrategy::Saved, Some(client)) => {
                    self.state.continuations.capture(&mut self.kernel, client)?;
                    self.deliver_deferred(client, reply)
                }
                (ReplyStrategy::Slow, _) | (ReplyStrategy::Saved, None) => {
                    self.kernel.reply(reply).map_err(ServerError::Channel)
                }
            },
        }
    }

    fn handle_init(&mut self) -> Result<ReplyDirective, ServerError> {
        let client = self.state.registry.register()?;
        self.state.continuations.capture(&mut self.kernel, client)?;
        info!(%client, "client registered");

        if self.state.registry.arrive_at_barrier() {
            info!(population = self.state.registry.population(), "barrier reached");
            self.deliver_deferred(ClientId::new(0), replies::initiator_release())?;
            if self.config.multicast == MulticastTrigger::Barrier {
                self.multicast_ready()?;
            }
        }
        Ok(ReplyDirective::Deferred)
    }

    fn handle_wait(&mut self, client: ClientId) -> Result<ReplyDirective, ServerError> {
        let record = self.active_record(client)?;
        if record.holds_gate {
            return Err(ProtocolViolation::WaitWhileHolding(client).into());
        }

        if self.config.multicast == MulticastTrigger::InitiatorWait && client.index() == 0 {
            self.multicast_ready()?;
        }

        // WAIT always answers through a token, even when the gate is free.
        if self.enter_gate(client, MessageLabel::Wait, Origin::Fresh)? == Acquire::Entered {
            self.state.continuations.capture(&mut self.kernel, client)?;
            self.deliver_deferred(client, replies::completion(MessageLabel::Wait, client))?;
        }
        Ok(ReplyDirective::Deferred)
    }

    fn handle_send_wait(
        &mut self,
        client: ClientId,
        seq: Option<Word>,
    ) -> Result<ReplyDirective, ServerError> {
        let record = self.active_record(client)?;
        if !record.holds_gate {
            return Err(ProtocolViolation::SendWaitWithoutGate(client).into());
        }
        debug!(%client, ?seq, "handing off gate");

        self.leave_gate(client)?;
        match self.enter_gate(client, MessageLabel::SendWait, Origin::Fresh)? {
            Acquire::Entered => Ok(ReplyDirective::NextIsReply(replies::completion(
                MessageLabel::SendWait,
                client,
            ))),
            Acquire::Parked => Ok(ReplyDirective::Deferred),
        }
    }

    fn handle_buffer(&mut self, client: ClientId, op: BufferOp) -> Result<ReplyDirective, ServerError> {
        self.active_record(client)?;
        match self.buffer_op(client, op, Origin::Fresh)? {
            Acquire::Entered => Ok(ReplyDirective::NextIsReply(replies::completion(
                op.label(),
                client,
            ))),
            Acquire::Parked => Ok(ReplyDirective::Deferred),
        }
    }

    fn handle_terminate(&mut self, client: ClientId) -> Result<ReplyDirective, ServerError> {
        let record = self.active_record(client)?;
        if record.holds_gate {
            self.leave_gate(client)?;
        }
        self.client_mut(client)?.terminated = true;
        debug!(%client, "client terminated");

        if self.state.registry.note_terminate() {
            self.finished = true;
        }
        Ok(ReplyDirective::NoReply)
    }

    /// Releases client 0's barrier peers with the "ready" multicast
    fn multicast_ready(&mut self) -> Result<(), ServerError> {
        if self.state.multicast_done {
            return Ok(());
        }
        self.state.multicast_done = true;

        let population = self.state.registry.population();
        for index in 1..population {
            let client = ClientId::new(index as u32);
            self.deliver_deferred(client, replies::ready(client))?;
        }
        self.state.stats.broadcasts += 1;
        info!(recipients = population.saturating_sub(1), "ready multicast sent");
        Ok(())
    }

    fn enter_gate(
        &mut self,
        client: ClientId,
        label: MessageLabel,
        origin: Origin,
    ) -> Result<Acquire, ServerError> {
        let state = &mut self.state;
        let holder = &state.gate_holder;
        let outcome =
            state
                .primitive
                .acquire_then_wait_while(client, Queue::Gate, &mut || holder.is_some());

        match outcome {
            Acquire::Entered => {
                self.state.gate_holder = Some(client);
                self.state.primitive.release();
                self.client_mut(client)?.holds_gate = true;
                debug!(%client, "entered gate");
            }
            Acquire::Parked => self.park(client, ParkedOn::Gate(label), origin)?,
        }
        Ok(outcome)
    }

    fn leave_gate(&mut self, client: ClientId) -> Result<(), ServerError> {
        let outcome = self
            .state
            .primitive
            .acquire_then_wait_while(client, Queue::Gate, &mut || false);
        if outcome != Acquire::Entered {
            return Err(ServerError::Invariant(format!(
                "{} could not enter the critical section to leave the gate",
                client
            )));
        }

        self.state.gate_holder = None;
        let woken = self.state.primitive.signal(Queue::Gate);
        self.state.primitive.release();
        self.client_mut(client)?.holds_gate = false;
        debug!(%client, "left gate");

        if let Some(next) = woken {
            self.resume(next)?;
        }
        Ok(())
    }

    fn buffer_op(
        &mut self,
        client: ClientId,
        op: BufferOp,
        origin: Origin,
    ) -> Result<Acquire, ServerError> {
        let ServerState {
            primitive, buffer, ..
        } = &mut self.state;
        let outcome = primitive.acquire_then_wait_while(client, op.wait_queue(), &mut || match op {
            BufferOp::Put => buffer.is_full(),
            BufferOp::Take => buffer.is_empty(),
        });
        if outcome == Acquire::Parked {
            self.park(client, op.parked_on(), origin)?;
            return Ok(outcome);
        }

        let applied = match op {
            BufferOp::Put => self.state.buffer.put(),
            BufferOp::Take => self.state.buffer.take(),
        };
        let occupancy = match applied {
            Ok(occupancy) => occupancy,
            Err(e) => {
                self.state.primitive.release();
                return Err(ServerError::Invariant(e.to_string()));
            }
        };
        let woken = self.state.primitive.signal(op.signal_queue());
        self.state.primitive.release();
        debug!(%client, label = %op.label(), occupancy, "buffer updated");

        if let Some(next) = woken {
            self.resume(next)?;
        }
        Ok(outcome)
    }

    /// Queues `client` and, for a fresh request, captures its reply token
    fn park(&mut self, client: ClientId, on: ParkedOn, origin: Origin) -> Result<(), ServerError> {
        if origin == Origin::Fresh {
            self.state.continuations.capture(&mut self.kernel, client)?;
        }
        self.client_mut(client)?.parked = Some(on);
        self.state.stats.parks += 1;
        debug!(%client, parked_on = ?on, "parked");
        Ok(())
    }

    /// Re-runs the request `client` is parked on and answers it if it completes
    fn resume(&mut self, client: ClientId) -> Result<(), ServerError> {
        let parked = self.client_mut(client)?.parked.take().ok_or_else(|| {
            ServerError::Invariant(format!("{} was woken but is not parked", client))
        })?;
        self.state.stats.wakeups += 1;
        debug!(%client, parked_on = ?parked, "resuming");

        let (label, outcome) = match parked {
            ParkedOn::Gate(label) => (label, self.enter_gate(client, label, Origin::Resumed)?),
            ParkedOn::Produce => (
                MessageLabel::Producer,
                self.buffer_op(client, BufferOp::Put, Origin::Resumed)?,
            ),
            ParkedOn::Consume => (
                MessageLabel::Consumer,
                self.buffer_op(client, BufferOp::Take, Origin::Resumed)?,
            ),
        };
        if outcome == Acquire::Entered {
            self.deliver_deferred(client, replies::completion(label, client))?;
        }
        Ok(())
    }

    fn deliver_deferred(&mut self, client: ClientId, message: Message) -> Result<(), ServerError> {
        let token = self.state.continuations.take(client)?;
        self.state
            .continuations
            .deliver(&mut self.kernel, token, message)?;
        self.state.stats.token_deliveries += 1;
        Ok(())
    }

    /// Checks that `client` may send a request right now
    ///
    /// A client with a captured token is still waiting for an answer, so it
    /// cannot legitimately have sent anything else.
    fn active_record(&self, client: ClientId) -> Result<ClientRecord, ProtocolViolation> {
        let record = self
            .state
            .registry
            .record(client)
            .ok_or(ProtocolViolation::UnknownClient(client))?;
        if record.terminated {
            return Err(ProtocolViolation::Terminated(client));
        }
        if record.parked.is_some() || self.state.continuations.is_captured(client) {
            return Err(ProtocolViolation::AlreadyParked(client));
        }
        Ok(record.clone())
    }

    fn client_mut(&mut self, client: ClientId) -> Result<&mut ClientRecord, ServerError> {
        self.state
            .registry
            .record_mut(client)
            .ok_or_else(|| ProtocolViolation::UnknownClient(client).into())
    }

    fn note_violation(&mut self, violation: ProtocolViolation) {
        self.state.stats.violations += 1;
        warn!(error = %violation, "protocol violation, message dropped");
    }
}
