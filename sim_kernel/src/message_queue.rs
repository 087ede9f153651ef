//! Bounded queue of callers waiting on the endpoint.
//!
//! Provides deterministic FIFO ordering with explicit capacity limits. Each
//! entry is one sender blocked in a call or a one-way send.

use core_types::CallerId;
use ipc::Message;
use std::collections::VecDeque;

/// How a sender reached the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    /// The sender blocks until it is answered.
    Call,
    /// The sender does not expect an answer.
    OneWay,
}

/// A sender waiting to be received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub caller: CallerId,
    pub kind: SendKind,
    pub message: Message,
}

/// Queue error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    Full,
}

/// Bounded FIFO queue of inbound senders.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    capacity: usize,
    messages: VecDeque<Inbound>,
}

impl MessageQueue {
    /// Creates a queue with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            messages: VecDeque::new(),
        }
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of queued senders.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns remaining capacity.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.messages.len())
    }

    /// Pushes a sender onto the queue.
    pub fn push(&mut self, inbound: Inbound) -> Result<(), QueueError> {
        if self.messages.len() >= self.capacity {
            return Err(QueueError::Full);
        }
        self.messages.push_back(inbound);
        Ok(())
    }

    /// Pops the next sender.
    pub fn pop(&mut self) -> Option<Inbound> {
        self.messages.pop_front()
    }
}
