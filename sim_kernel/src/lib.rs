//! # Simulated Kernel
//!
//! This crate provides an in-process implementation of the endpoint and slot
//! allocator boundaries.
//!
//! ## Purpose
//!
//! The simulated kernel allows running the synchronization server without a
//! microkernel underneath:
//! - Runs under `cargo test`
//! - Deterministic (FIFO senders, no real concurrency)
//! - Inspectable (every delivery and every saved caller is visible)
//!
//! ## Philosophy
//!
//! **Testability is a first-class design constraint.**
//!
//! Senders are queued as if blocked on the endpoint. Receiving one makes it the
//! current caller; replying answers it; saving it moves it into a slot where a
//! later one-shot send can answer it. A [`ClientDriver`] can play the clients'
//! side, producing each caller's next request when its reply arrives. When no
//! sender is queued, a receive fails with [`KernelError::WouldBlockForever`]
//! instead of hanging the test.
//!
//! [`ThreadedKernel`] covers the other server shape: real client threads
//! calling into a pool of real worker threads.

pub mod delivery_audit;
pub mod driver;
pub mod fault_injection;
pub mod message_queue;
pub mod test_utils;
pub mod threaded;

use core_types::{CallerId, SlotId};
use delivery_audit::{DeliveryAuditLog, DeliveryRoute};
use fault_injection::{FaultInjector, FaultPlan};
use ipc::Message;
use kernel_api::{Endpoint, KernelError, SlotAllocator};
use message_queue::{Inbound, MessageQueue, QueueError, SendKind};
use std::collections::HashMap;

pub use driver::{ClientDriver, Outgoing};
pub use threaded::ThreadedKernel;

/// Default bound on queued senders
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Simulated kernel state
///
/// This maintains all the state needed to simulate one server endpoint and
/// the slot allocator behind it.
pub struct SimulatedKernel {
    /// Senders waiting to be received
    inbound: MessageQueue,
    /// Implicit reply target of the last receive
    current_caller: Option<CallerId>,
    /// Allocated slots and the caller each one holds, if any
    slots: HashMap<SlotId, Option<CallerId>>,
    /// Released slots available for reuse
    free_slots: Vec<SlotId>,
    /// Next never-used slot offset
    next_slot: u32,
    /// Next caller identity handed out by `new_caller`
    next_caller: u64,
    /// Callers left without an answer, kept only while auditing
    abandoned: Vec<CallerId>,
    abandoned_total: usize,
    /// Every message handed back to a caller
    deliveries: DeliveryAuditLog,
    /// Fault injector (optional, for testing)
    fault_injector: Option<FaultInjector>,
    /// Client-side behaviour (optional)
    driver: Option<Box<dyn ClientDriver>>,
}

impl SimulatedKernel {
    /// Creates a new simulated kernel
    pub fn new() -> Self {
        Self {
            inbound: MessageQueue::with_capacity(DEFAULT_QUEUE_CAPACITY),
            current_caller: None,
            slots: HashMap::new(),
            free_slots: Vec::new(),
            next_slot: 0,
            next_caller: 0,
            abandoned: Vec::new(),
            abandoned_total: 0,
            deliveries: DeliveryAuditLog::new(),
            fault_injector: None,
            driver: None,
        }
    }

    /// Sets the fault plan for this kernel
    pub fn with_fault_plan(mut self, plan: FaultPlan) -> Self {
        self.fault_injector = Some(FaultInjector::new(plan));
        self
    }

    /// Stops keeping per-delivery and per-abandonment records
    ///
    /// Counts are still maintained. Use this for long runs where nothing
    /// inspects the audit trail.
    pub fn without_audit(mut self) -> Self {
        self.deliveries = DeliveryAuditLog::disabled();
        self
    }

    /// Bounds the number of queued senders
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.inbound = MessageQueue::with_capacity(capacity);
        self
    }

    /// Installs a client driver and queues its opening requests
    pub fn with_driver(mut self, mut driver: Box<dyn ClientDriver>) -> Result<Self, KernelError> {
        for (caller, outgoing) in driver.start() {
            self.next_caller = self.next_caller.max(caller.as_u64() + 1);
            self.enqueue(caller, outgoing)?;
        }
        self.driver = Some(driver);
        Ok(self)
    }

    /// Hands out a fresh caller identity
    pub fn new_caller(&mut self) -> CallerId {
        let caller = CallerId::new(self.next_caller);
        self.next_caller += 1;
        caller
    }

    /// Queues a blocking call from `caller`
    pub fn push_call(&mut self, caller: CallerId, message: Message) -> Result<(), QueueError> {
        self.inbound.push(Inbound {
            caller,
            kind: SendKind::Call,
            message,
        })
    }

    /// Queues a one-way send from `caller`
    pub fn push_send(&mut self, caller: CallerId, message: Message) -> Result<(), QueueError> {
        self.inbound.push(Inbound {
            caller,
            kind: SendKind::OneWay,
            message,
        })
    }

    /// Returns the delivery audit log
    pub fn deliveries(&self) -> &DeliveryAuditLog {
        &self.deliveries
    }

    /// Returns the caller an implicit reply would reach
    pub fn current_caller(&self) -> Option<CallerId> {
        self.current_caller
    }

    /// Returns the number of allocated slots
    pub fn slots_in_use(&self) -> usize {
        self.slots.len()
    }

    /// Returns the callers saved in slots and not yet answered
    pub fn saved_callers(&self) -> Vec<CallerId> {
        let mut callers: Vec<CallerId> = self.slots.values().filter_map(|c| *c).collect();
        callers.sort();
        callers
    }

    /// Returns callers that lost their reply target without being answered
    ///
    /// Empty when auditing is off; see [`abandoned_count`](Self::abandoned_count).
    pub fn abandoned_callers(&self) -> &[CallerId] {
        &self.abandoned
    }

    pub fn abandoned_count(&self) -> usize {
        self.abandoned_total
    }

    fn note_abandoned(&mut self, caller: CallerId) {
        self.abandoned_total += 1;
        if self.deliveries.is_enabled() {
            self.abandoned.push(caller);
        }
    }

    /// Returns the number of queued senders
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    fn enqueue(&mut self, caller: CallerId, outgoing: Outgoing) -> Result<(), KernelError> {
        let result = match outgoing {
            Outgoing::Call(message) => self.push_call(caller, message),
            Outgoing::Send(message) => self.push_send(caller, message),
        };
        result.map_err(|QueueError::Full| {
            KernelError::ChannelFailure(format!("endpoint queue full, dropping {}", caller))
        })
    }

    /// Hands a message to a caller and lets the driver react to it
    fn deliver(
        &mut self,
        caller: CallerId,
        message: Message,
        route: DeliveryRoute,
    ) -> Result<(), KernelError> {
        let next = match self.driver.as_mut() {
            Some(driver) => driver.on_reply(caller, &message),
            None => None,
        };
        self.deliveries.record(caller, message, route);
        match next {
            Some(outgoing) => self.enqueue(caller, outgoing),
            None => Ok(()),
        }
    }
}

impl Default for SimulatedKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Endpoint for SimulatedKernel {
    fn receive(&mut self) -> Result<Message, KernelError> {
        if let Some(injector) = self.fault_injector.as_mut() {
            if injector.should_fail_receive() {
                return Err(KernelError::ChannelFailure(
                    "injected receive failure".to_string(),
                ));
            }
        }

        // A receive discards an unanswered implicit reply target.
        if let Some(previous) = self.current_caller.take() {
            self.note_abandoned(previous);
        }

        let inbound = self.inbound.pop().ok_or(KernelError::WouldBlockForever)?;
        match inbound.kind {
            SendKind::Call => self.current_caller = Some(inbound.caller),
            SendKind::OneWay => {
                let next = match self.driver.as_mut() {
                    Some(driver) => driver.after_send(inbound.caller),
                    None => None,
                };
                if let Some(outgoing) = next {
                    self.enqueue(inbound.caller, outgoing)?;
                }
            }
        }
        Ok(inbound.message)
    }

    fn reply(&mut self, message: Message) -> Result<(), KernelError> {
        let caller = self.current_caller.take().ok_or(KernelError::NoCaller)?;
        self.deliver(caller, message, DeliveryRoute::Reply)
    }

    fn reply_then_receive(&mut self, message: Message) -> Result<Message, KernelError> {
        let caller = self.current_caller.take().ok_or(KernelError::NoCaller)?;
        self.deliver(caller, message, DeliveryRoute::ReplyRecv)?;
        self.receive()
    }

    fn save_caller(&mut self, slot: SlotId) -> Result<(), KernelError> {
        if let Some(injector) = self.fault_injector.as_mut() {
            if injector.should_fail_save_caller() {
                return Err(KernelError::SaveCallerFailed(format!(
                    "injected failure saving into {}",
                    slot
                )));
            }
        }

        match self.slots.get(&slot) {
            Some(None) => {}
            _ => return Err(KernelError::InvalidSlot(slot)),
        }
        let caller = self.current_caller.take().ok_or(KernelError::NoCaller)?;
        self.slots.insert(slot, Some(caller));
        Ok(())
    }

    fn send(&mut self, slot: SlotId, message: Message) -> Result<(), KernelError> {
        let caller = self
            .slots
            .get_mut(&slot)
            .and_then(Option::take)
            .ok_or(KernelError::InvalidSlot(slot))?;
        self.deliver(caller, message, DeliveryRoute::Slot(slot))
    }
}

impl SlotAllocator for SimulatedKernel {
    fn allocate_slot(&mut self) -> Result<SlotId, KernelError> {
        if let Some(injector) = self.fault_injector.as_ref() {
            if injector.slot_limit_reached(self.slots.len()) {
                return Err(KernelError::ResourceExhausted(format!(
                    "{} slots in use",
                    self.slots.len()
                )));
            }
        }

        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                let slot = SlotId::new(self.next_slot);
                self.next_slot += 1;
                slot
            }
        };
        self.slots.insert(slot, None);
        Ok(slot)
    }

    fn release_slot(&mut self, slot: SlotId) {
        if let Some(held) = self.slots.remove(&slot) {
            if let Some(caller) = held {
                self.note_abandoned(caller);
            }
            self.free_slots.push(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_sets_current_caller() {
        let mut kernel = SimulatedKernel::new();
        let caller = kernel.new_caller();
        kernel.push_call(caller, Message::empty(1)).unwrap();

        let msg = kernel.receive().unwrap();
        assert_eq!(msg.label(), 1);
        assert_eq!(kernel.current_caller(), Some(caller));
    }

    #[test]
    fn test_one_way_send_has_no_reply_target() {
        let mut kernel = SimulatedKernel::new();
        let caller = kernel.new_caller();
        kernel.push_send(caller, Message::empty(6)).unwrap();

        kernel.receive().unwrap();
        assert_eq!(kernel.current_caller(), None);
        assert_eq!(kernel.reply(Message::empty(6)), Err(KernelError::NoCaller));
    }

    #[test]
    fn test_empty_receive_would_block_forever() {
        let mut kernel = SimulatedKernel::new();
        assert_eq!(kernel.receive(), Err(KernelError::WouldBlockForever));
    }

    #[test]
    fn test_reply_reaches_current_caller() {
        let mut kernel = SimulatedKernel::new();
        let caller = kernel.new_caller();
        kernel.push_call(caller, Message::empty(4)).unwrap();
        kernel.receive().unwrap();

        kernel.reply(Message::empty(4)).unwrap();
        let deliveries = kernel.deliveries().all();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].caller, caller);
        assert_eq!(deliveries[0].route, DeliveryRoute::Reply);
        assert_eq!(kernel.current_caller(), None);
    }

    #[test]
    fn test_reply_then_receive() {
        let mut kernel = SimulatedKernel::new();
        let first = kernel.new_caller();
        let second = kernel.new_caller();
        kernel.push_call(first, Message::empty(4)).unwrap();
        kernel.push_call(second, Message::empty(5)).unwrap();

        kernel.receive().unwrap();
        let next = kernel.reply_then_receive(Message::empty(4)).unwrap();
        assert_eq!(next.label(), 5);
        assert_eq!(kernel.current_caller(), Some(second));
        assert_eq!(kernel.deliveries().all()[0].route, DeliveryRoute::ReplyRecv);
    }

    #[test]
    fn test_save_caller_then_send() {
        let mut kernel = SimulatedKernel::new();
        let caller = kernel.new_caller();
        kernel.push_call(caller, Message::empty(2)).unwrap();
        kernel.receive().unwrap();

        let slot = kernel.allocate_slot().unwrap();
        kernel.save_caller(slot).unwrap();
        assert_eq!(kernel.current_caller(), None);
        assert_eq!(kernel.saved_callers(), vec![caller]);

        kernel.send(slot, Message::empty(2)).unwrap();
        assert_eq!(kernel.deliveries().to_caller(caller).len(), 1);
        assert!(kernel.saved_callers().is_empty());

        // One-shot: the slot is empty now.
        assert_eq!(
            kernel.send(slot, Message::empty(2)),
            Err(KernelError::InvalidSlot(slot))
        );
    }

    #[test]
    fn test_save_caller_requires_allocated_slot() {
        let mut kernel = SimulatedKernel::new();
        let caller = kernel.new_caller();
        kernel.push_call(caller, Message::empty(2)).unwrap();
        kernel.receive().unwrap();

        let bogus = SlotId::new(77);
        assert_eq!(
            kernel.save_caller(bogus),
            Err(KernelError::InvalidSlot(bogus))
        );
    }

    #[test]
    fn test_slot_reuse_after_release() {
        let mut kernel = SimulatedKernel::new();
        let a = kernel.allocate_slot().unwrap();
        kernel.release_slot(a);
        let b = kernel.allocate_slot().unwrap();
        assert_eq!(a, b);
        assert_eq!(kernel.slots_in_use(), 1);
    }

    #[test]
    fn test_slot_limit_exhausts() {
        let mut kernel = SimulatedKernel::new().with_fault_plan(FaultPlan::new().with_slot_limit(1));
        kernel.allocate_slot().unwrap();
        assert!(matches!(
            kernel.allocate_slot(),
            Err(KernelError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_injected_save_caller_failure() {
        let mut kernel =
            SimulatedKernel::new().with_fault_plan(FaultPlan::new().with_save_caller_failure_on(1));
        let caller = kernel.new_caller();
        kernel.push_call(caller, Message::empty(2)).unwrap();
        kernel.receive().unwrap();
        let slot = kernel.allocate_slot().unwrap();

        assert!(matches!(
            kernel.save_caller(slot),
            Err(KernelError::SaveCallerFailed(_))
        ));
    }

    #[test]
    fn test_unanswered_caller_is_abandoned() {
        let mut kernel = SimulatedKernel::new();
        let first = kernel.new_caller();
        let second = kernel.new_caller();
        kernel.push_call(first, Message::empty(1)).unwrap();
        kernel.push_call(second, Message::empty(1)).unwrap();

        kernel.receive().unwrap();
        kernel.receive().unwrap();
        assert_eq!(kernel.abandoned_callers(), &[first]);
    }

    #[test]
    fn test_without_audit_keeps_counts_only() {
        let mut kernel = SimulatedKernel::new().without_audit();
        let first = kernel.new_caller();
        let second = kernel.new_caller();
        kernel.push_call(first, Message::empty(1)).unwrap();
        kernel.push_call(second, Message::empty(1)).unwrap();

        kernel.receive().unwrap();
        kernel.reply_then_receive(Message::empty(1)).unwrap();
        kernel.receive().unwrap_err();

        assert!(kernel.deliveries().is_empty());
        assert_eq!(kernel.deliveries().total(), 1);
        assert!(kernel.abandoned_callers().is_empty());
        assert_eq!(kernel.abandoned_count(), 1);
    }

    struct EchoTwice {
        remaining: usize,
    }

    impl ClientDriver for EchoTwice {
        fn start(&mut self) -> Vec<(CallerId, Outgoing)> {
            vec![(CallerId::new(0), Outgoing::Call(Message::empty(9)))]
        }

        fn on_reply(&mut self, _caller: CallerId, reply: &Message) -> Option<Outgoing> {
            if self.remaining == 0 {
                return None;
            }
            self.remaining -= 1;
            Some(Outgoing::Call(reply.clone()))
        }
    }

    #[test]
    fn test_driver_feeds_follow_up_requests() {
        let mut kernel = SimulatedKernel::new()
            .with_driver(Box::new(EchoTwice { remaining: 2 }))
            .unwrap();

        let mut received = 0;
        let mut msg = kernel.receive().unwrap();
        loop {
            received += 1;
            match kernel.reply_then_receive(msg.clone()) {
                Ok(next) => msg = next,
                Err(KernelError::WouldBlockForever) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(received, 3);
        assert_eq!(kernel.deliveries().len(), 3);
        // Fresh callers never collide with driver-chosen ones.
        assert_eq!(kernel.new_caller(), CallerId::new(1));
    }
}
