//! Thread-safe in-process endpoint
//!
//! [`ThreadedKernel`] is the multi-threaded counterpart of
//! [`SimulatedKernel`](crate::SimulatedKernel). Client threads block in
//! [`call`](ThreadedKernel::call) until a worker answers them; worker threads
//! receive through [`SharedEndpoint`]. Everything sits behind one lock, with
//! one condition variable for arrivals and one for answers.
//!
//! Nothing here is deterministic: which worker receives which message is up
//! to the scheduler.

use crate::message_queue::{Inbound, MessageQueue, QueueError, SendKind};
use crate::DEFAULT_QUEUE_CAPACITY;
use core_types::{CallerId, ClientId};
use ipc::{Message, Request};
use kernel_api::{KernelError, Received, SharedEndpoint};
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Inner {
    inbound: MessageQueue,
    /// Answers not yet picked up by their caller
    answers: HashMap<CallerId, Message>,
    next_caller: u64,
    delivered: usize,
    closed: bool,
}

/// Shared endpoint for worker-thread servers
#[derive(Debug)]
pub struct ThreadedKernel {
    inner: Mutex<Inner>,
    arrived: Condvar,
    answered: Condvar,
}

fn poisoned<T>(_: PoisonError<T>) -> KernelError {
    KernelError::ChannelFailure("endpoint state poisoned by a panicked thread".to_string())
}

impl ThreadedKernel {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Bounds the number of queued senders
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                inbound: MessageQueue::with_capacity(capacity),
                answers: HashMap::new(),
                next_caller: 0,
                delivered: 0,
                closed: false,
            }),
            arrived: Condvar::new(),
            answered: Condvar::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, KernelError> {
        self.inner.lock().map_err(poisoned)
    }

    /// Hands out a fresh caller identity
    pub fn new_caller(&self) -> Result<CallerId, KernelError> {
        let mut inner = self.lock()?;
        let caller = CallerId::new(inner.next_caller);
        inner.next_caller += 1;
        Ok(caller)
    }

    fn push(&self, inner: &mut Inner, inbound: Inbound) -> Result<(), KernelError> {
        if inner.closed {
            return Err(KernelError::Closed);
        }
        let caller = inbound.caller;
        inner.inbound.push(inbound).map_err(|QueueError::Full| {
            KernelError::ChannelFailure(format!("endpoint queue full, dropping {}", caller))
        })?;
        self.arrived.notify_one();
        Ok(())
    }

    /// Sends `message` as `caller` and blocks until it is answered
    ///
    /// Fails with [`KernelError::Closed`] if the endpoint shuts down first.
    pub fn call(&self, caller: CallerId, message: Message) -> Result<Message, KernelError> {
        let mut inner = self.lock()?;
        self.push(
            &mut inner,
            Inbound {
                caller,
                kind: SendKind::Call,
                message,
            },
        )?;
        let mut inner = self
            .answered
            .wait_while(inner, |inner| {
                !inner.closed && !inner.answers.contains_key(&caller)
            })
            .map_err(poisoned)?;
        inner.answers.remove(&caller).ok_or(KernelError::Closed)
    }

    /// Sends `message` as `caller` without waiting for an answer
    pub fn send(&self, caller: CallerId, message: Message) -> Result<(), KernelError> {
        let mut inner = self.lock()?;
        self.push(
            &mut inner,
            Inbound {
                caller,
                kind: SendKind::OneWay,
                message,
            },
        )
    }

    /// Plays one client from first contact to termination
    ///
    /// Calls `INIT`, builds the rest of the plan from the client id the
    /// release carries, and works through it: `TMNT` goes out one-way,
    /// everything else is a call. Returns every answer received, release
    /// first.
    pub fn play_client<F, I>(&self, caller: CallerId, plan: F) -> Result<Vec<Message>, KernelError>
    where
        F: FnOnce(ClientId) -> I,
        I: IntoIterator<Item = Request>,
    {
        let release = self.call(caller, Request::Init.encode())?;
        let client = release
            .word(0)
            .and_then(ClientId::from_word)
            .ok_or_else(|| {
                KernelError::ChannelFailure(format!("release to {} carried no client id", caller))
            })?;

        let mut answers = vec![release];
        for request in plan(client) {
            match request {
                Request::Terminate { .. } => self.send(caller, request.encode())?,
                _ => answers.push(self.call(caller, request.encode())?),
            }
        }
        Ok(answers)
    }

    /// Returns the number of answers handed out so far
    pub fn delivered(&self) -> usize {
        self.lock().map(|inner| inner.delivered).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|inner| inner.closed).unwrap_or(true)
    }
}

impl Default for ThreadedKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedEndpoint for ThreadedKernel {
    fn receive(&self) -> Result<Received, KernelError> {
        let inner = self.lock()?;
        let mut inner = self
            .arrived
            .wait_while(inner, |inner| !inner.closed && inner.inbound.is_empty())
            .map_err(poisoned)?;
        if inner.closed {
            return Err(KernelError::Closed);
        }
        let inbound = inner.inbound.pop().ok_or(KernelError::WouldBlockForever)?;
        let caller = match inbound.kind {
            SendKind::Call => Some(inbound.caller),
            SendKind::OneWay => None,
        };
        Ok(Received {
            message: inbound.message,
            caller,
        })
    }

    fn reply(&self, caller: CallerId, message: Message) -> Result<(), KernelError> {
        let mut inner = self.lock()?;
        if inner.answers.insert(caller, message).is_some() {
            return Err(KernelError::ChannelFailure(format!(
                "{} answered twice without picking up",
                caller
            )));
        }
        inner.delivered += 1;
        self.answered.notify_all();
        Ok(())
    }

    fn reply_then_receive(
        &self,
        caller: CallerId,
        message: Message,
    ) -> Result<Received, KernelError> {
        self.reply(caller, message)?;
        self.receive()
    }

    fn close(&self) {
        if let Ok(mut inner) = self.lock() {
            inner.closed = true;
        }
        self.arrived.notify_all();
        self.answered.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_call_returns_reply() {
        let kernel = Arc::new(ThreadedKernel::new());
        let caller = kernel.new_caller().unwrap();

        let worker = {
            let kernel = Arc::clone(&kernel);
            thread::spawn(move || {
                let received = kernel.receive().unwrap();
                assert_eq!(received.caller, Some(caller));
                kernel
                    .reply(caller, Message::empty(received.message.label() + 1))
                    .unwrap();
            })
        };

        let answer = kernel.call(caller, Message::empty(4)).unwrap();
        worker.join().unwrap();
        assert_eq!(answer.label(), 5);
        assert_eq!(kernel.delivered(), 1);
    }

    #[test]
    fn test_play_client_follows_release() {
        let kernel = Arc::new(ThreadedKernel::new());
        let caller = kernel.new_caller().unwrap();

        let server = {
            let kernel = Arc::clone(&kernel);
            thread::spawn(move || {
                let init = kernel.receive().unwrap();
                kernel
                    .reply(caller, ipc::replies::ready(ClientId::new(3)))
                    .unwrap();
                let wait = kernel.receive().unwrap();
                assert_eq!(
                    Request::decode(&wait.message),
                    Ok(Request::Wait {
                        client: ClientId::new(3)
                    })
                );
                kernel
                    .reply(
                        caller,
                        ipc::replies::completion(ipc::MessageLabel::Wait, ClientId::new(3)),
                    )
                    .unwrap();
                let tmnt = kernel.receive().unwrap();
                (init.caller, tmnt.caller)
            })
        };

        let answers = kernel
            .play_client(caller, |client| {
                vec![Request::Wait { client }, Request::Terminate { client }]
            })
            .unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(server.join().unwrap(), (Some(caller), None));
    }

    #[test]
    fn test_one_way_send_has_no_caller() {
        let kernel = ThreadedKernel::new();
        let caller = kernel.new_caller().unwrap();
        kernel.send(caller, Message::empty(6)).unwrap();

        let received = kernel.receive().unwrap();
        assert_eq!(received.caller, None);
        assert_eq!(received.message.label(), 6);
    }

    #[test]
    fn test_close_wakes_receivers_and_callers() {
        let kernel = Arc::new(ThreadedKernel::new());
        let caller = kernel.new_caller().unwrap();

        let client = {
            let kernel = Arc::clone(&kernel);
            thread::spawn(move || kernel.call(caller, Message::empty(1)))
        };
        // The call is in flight and will never be answered.
        kernel.receive().unwrap();

        let receiver = {
            let kernel = Arc::clone(&kernel);
            thread::spawn(move || kernel.receive())
        };
        kernel.close();

        assert_eq!(receiver.join().unwrap(), Err(KernelError::Closed));
        assert_eq!(client.join().unwrap(), Err(KernelError::Closed));
        assert!(kernel.is_closed());
        assert_eq!(kernel.send(caller, Message::empty(6)), Err(KernelError::Closed));
    }
}
