//! Channel and allocator boundaries

use crate::KernelError;
use core_types::{CallerId, SlotId};
use ipc::Message;
use std::sync::Arc;

/// The rendezvous endpoint the server listens on
///
/// Receiving a message makes its sender the endpoint's *current caller*: the
/// implicit target of [`reply`](Endpoint::reply). The current caller can
/// instead be moved into a slot with [`save_caller`](Endpoint::save_caller)
/// and answered later, from any call path, with [`send`](Endpoint::send).
///
/// Multiple implementations are possible:
/// - Simulated kernel (for testing)
/// - Real kernel endpoint (syscalls)
///
/// # Example
///
/// ```
/// use ipc::Message;
/// use kernel_api::{Endpoint, KernelError};
///
/// fn echo_once<E: Endpoint>(endpoint: &mut E) -> Result<Message, KernelError> {
///     let request = endpoint.receive()?;
///     endpoint.reply_then_receive(request)
/// }
/// ```
pub trait Endpoint {
    /// Blocks until a message arrives
    fn receive(&mut self) -> Result<Message, KernelError>;

    /// Answers the current caller
    fn reply(&mut self, message: Message) -> Result<(), KernelError>;

    /// Answers the current caller and blocks for the next message, atomically
    ///
    /// This is the low-latency path: reading the next request completes the
    /// previous reply in one kernel operation.
    fn reply_then_receive(&mut self, message: Message) -> Result<Message, KernelError>;

    /// Moves the current caller into `slot`
    ///
    /// Afterwards the endpoint has no current caller until the next receive.
    fn save_caller(&mut self, slot: SlotId) -> Result<(), KernelError>;

    /// Delivers `message` to the caller saved in `slot`
    ///
    /// A saved caller can be answered once; the slot is empty afterwards.
    fn send(&mut self, slot: SlotId, message: Message) -> Result<(), KernelError>;
}

/// Source of capability slots for saved callers
pub trait SlotAllocator {
    /// Allocates an empty slot
    ///
    /// Fails with [`KernelError::ResourceExhausted`] when none are left.
    fn allocate_slot(&mut self) -> Result<SlotId, KernelError>;

    /// Returns a slot to the pool
    fn release_slot(&mut self, slot: SlotId);
}

/// A message taken off a [`SharedEndpoint`], with the caller to answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub message: Message,
    /// `None` for a one-way send
    pub caller: Option<CallerId>,
}

/// A rendezvous endpoint several worker threads receive from at once
///
/// There is no implicit current caller: each receive hands its caller back
/// to the receiving thread, which answers it directly. A worker that blocks
/// on a client's behalf simply holds on to that caller until it can reply.
pub trait SharedEndpoint: Send + Sync {
    /// Blocks until a message arrives or the endpoint is closed
    ///
    /// Fails with [`KernelError::Closed`] once [`close`](Self::close) has
    /// been called.
    fn receive(&self) -> Result<Received, KernelError>;

    /// Answers `caller`
    fn reply(&self, caller: CallerId, message: Message) -> Result<(), KernelError>;

    /// Answers `caller` and blocks for the next message
    fn reply_then_receive(&self, caller: CallerId, message: Message)
        -> Result<Received, KernelError>;

    /// Wakes every blocked receiver with [`KernelError::Closed`]
    fn close(&self);
}

impl<T: SharedEndpoint + ?Sized> SharedEndpoint for Arc<T> {
    fn receive(&self) -> Result<Received, KernelError> {
        (**self).receive()
    }

    fn reply(&self, caller: CallerId, message: Message) -> Result<(), KernelError> {
        (**self).reply(caller, message)
    }

    fn reply_then_receive(
        &self,
        caller: CallerId,
        message: Message,
    ) -> Result<Received, KernelError> {
        (**self).reply_then_receive(caller, message)
    }

    fn close(&self) {
        (**self).close()
    }
}
