//! Synchronization primitives
//!
//! The server's coordination policy is written once against
//! [`SyncPrimitive`]; three interchangeable variants implement it with
//! different mechanics:
//!
//! - [`MutexPrimitive`]: a lock flag plus manual sleep lists. A signal with
//!   no sleeper is lost.
//! - [`SemaphorePrimitive`]: a binary semaphore for exclusion and one
//!   counting semaphore per queue. A signal with no waiter is kept as a
//!   permit and consumed by the next acquirer before it re-checks its
//!   predicate.
//! - [`CondVarPrimitive`]: condition variables under a companion binary
//!   semaphore lock. A signal with no waiter is absorbed.
//!
//! ## Continuations instead of threads
//!
//! The server is one thread of control, so "blocking" a client means parking
//! it on a wait queue and returning. [`SyncPrimitive::signal`] hands back the
//! client it woke; the caller resumes that client after releasing the
//! critical section, and the resumed request acquires again and re-checks
//! its predicate. Every wakeup is therefore a hint, never a guarantee.

use crate::config::PrimitiveKind;
use core_types::ClientId;
use std::collections::VecDeque;
use std::fmt;

/// Named wait queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    /// Clients waiting to enter the gate
    Gate,
    /// Producers waiting for room
    NotFull,
    /// Consumers waiting for an item
    NotEmpty,
}

impl Queue {
    pub const ALL: [Queue; 3] = [Queue::Gate, Queue::NotFull, Queue::NotEmpty];

    const fn index(self) -> usize {
        match self {
            Queue::Gate => 0,
            Queue::NotFull => 1,
            Queue::NotEmpty => 2,
        }
    }
}

/// Outcome of [`SyncPrimitive::acquire_then_wait_while`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// The predicate is false and the caller holds the critical section.
    /// It must call [`SyncPrimitive::release`] when done.
    Entered,
    /// The predicate held; the client is queued and the critical section
    /// has been given up.
    Parked,
}

/// Common interface of the three primitive variants
///
/// `Send` so one instance can be shared by worker threads behind a lock.
pub trait SyncPrimitive: fmt::Debug + Send {
    fn kind(&self) -> PrimitiveKind;

    /// Enters the critical section, parking `client` on `queue` while
    /// `predicate` holds
    fn acquire_then_wait_while(
        &mut self,
        client: ClientId,
        queue: Queue,
        predicate: &mut dyn FnMut() -> bool,
    ) -> Acquire;

    /// Wakes at most one client parked on `queue`
    ///
    /// Must be called inside the critical section.
    fn signal(&mut self, queue: Queue) -> Option<ClientId>;

    /// Leaves the critical section
    fn release(&mut self);

    /// Returns the number of clients parked on `queue`
    fn waiting(&self, queue: Queue) -> usize;
}

/// Creates the primitive selected by `kind`
pub fn new_primitive(kind: PrimitiveKind) -> Box<dyn SyncPrimitive> {
    match kind {
        PrimitiveKind::Mutex => Box::new(MutexPrimitive::new()),
        PrimitiveKind::Semaphore => Box::new(SemaphorePrimitive::new()),
        PrimitiveKind::CondVar => Box::new(CondVarPrimitive::new()),
    }
}

/// FIFO wait lists, one per [`Queue`]
#[derive(Debug, Default)]
struct WaitQueues {
    lists: [VecDeque<ClientId>; 3],
}

impl WaitQueues {
    fn push(&mut self, queue: Queue, client: ClientId) {
        self.lists[queue.index()].push_back(client);
    }

    fn pop(&mut self, queue: Queue) -> Option<ClientId> {
        self.lists[queue.index()].pop_front()
    }

    fn len(&self, queue: Queue) -> usize {
        self.lists[queue.index()].len()
    }
}

/// Lock flag with explicit sleep and wakeup lists
#[derive(Debug, Default)]
pub struct MutexPrimitive {
    locked: bool,
    sleepers: WaitQueues,
}

impl MutexPrimitive {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&mut self) {
        debug_assert!(!self.locked, "nested acquisition of the server mutex");
        self.locked = true;
    }

    fn unlock(&mut self) {
        debug_assert!(self.locked, "release of an unlocked server mutex");
        self.locked = false;
    }
}

impl SyncPrimitive for MutexPrimitive {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Mutex
    }

    fn acquire_then_wait_while(
        &mut self,
        client: ClientId,
        queue: Queue,
        predicate: &mut dyn FnMut() -> bool,
    ) -> Acquire {
        self.lock();
        if predicate() {
            self.sleepers.push(queue, client);
            self.unlock();
            return Acquire::Parked;
        }
        Acquire::Entered
    }

    fn signal(&mut self, queue: Queue) -> Option<ClientId> {
        debug_assert!(self.locked, "signal outside the critical section");
        self.sleepers.pop(queue)
    }

    fn release(&mut self) {
        self.unlock();
    }

    fn waiting(&self, queue: Queue) -> usize {
        self.sleepers.len(queue)
    }
}

/// A non-blocking counting semaphore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Semaphore {
    count: usize,
}

impl Semaphore {
    pub fn new(count: usize) -> Self {
        Self { count }
    }

    /// Takes one unit if available
    pub fn try_wait(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }
        self.count -= 1;
        true
    }

    pub fn post(&mut self) {
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Binary semaphore for exclusion, counting semaphores as wait queues
#[derive(Debug)]
pub struct SemaphorePrimitive {
    mutex: Semaphore,
    permits: [Semaphore; 3],
    waiters: WaitQueues,
}

impl SemaphorePrimitive {
    pub fn new() -> Self {
        Self {
            mutex: Semaphore::new(1),
            permits: [Semaphore::new(0), Semaphore::new(0), Semaphore::new(0)],
            waiters: WaitQueues::default(),
        }
    }

    /// Returns the stored, unconsumed signals on `queue`
    pub fn permits(&self, queue: Queue) -> usize {
        self.permits[queue.index()].count()
    }

    fn enter(&mut self) {
        let entered = self.mutex.try_wait();
        debug_assert!(entered, "nested acquisition of the server semaphore");
    }

    fn leave(&mut self) {
        debug_assert_eq!(self.mutex.count(), 0, "release of a free server semaphore");
        self.mutex.post();
    }
}

impl Default for SemaphorePrimitive {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncPrimitive for SemaphorePrimitive {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::Semaphore
    }

    fn acquire_then_wait_while(
        &mut self,
        client: ClientId,
        queue: Queue,
        predicate: &mut dyn FnMut() -> bool,
    ) -> Acquire {
        self.enter();
        loop {
            if !predicate() {
                return Acquire::Entered;
            }
            self.leave();
            if self.permits[queue.index()].try_wait() {
                // A stored signal: re-enter and look again.
                self.enter();
                continue;
            }
            self.waiters.push(queue, client);
            return Acquire::Parked;
        }
    }

    fn signal(&mut self, queue: Queue) -> Option<ClientId> {
        let woken = self.waiters.pop(queue);
        if woken.is_none() {
            self.permits[queue.index()].post();
        }
        woken
    }

    fn release(&mut self) {
        self.leave();
    }

    fn waiting(&self, queue: Queue) -> usize {
        self.waiters.len(queue)
    }
}

/// Condition variables under a binary-semaphore lock
#[derive(Debug)]
pub struct CondVarPrimitive {
    lock: Semaphore,
    conditions: WaitQueues,
}

impl CondVarPrimitive {
    pub fn new() -> Self {
        Self {
            lock: Semaphore::new(1),
            conditions: WaitQueues::default(),
        }
    }

    fn enter(&mut self) {
        let entered = self.lock.try_wait();
        debug_assert!(entered, "nested acquisition of the condition lock");
    }

    fn leave(&mut self) {
        debug_assert_eq!(self.lock.count(), 0, "release of a free condition lock");
        self.lock.post();
    }
}

impl Default for CondVarPrimitive {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncPrimitive for CondVarPrimitive {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::CondVar
    }

    fn acquire_then_wait_while(
        &mut self,
        client: ClientId,
        queue: Queue,
        predicate: &mut dyn FnMut() -> bool,
    ) -> Acquire {
        self.enter();
        if predicate() {
            // cv_wait: queue up and drop the lock in one step
            self.conditions.push(queue, client);
            self.leave();
            return Acquire::Parked;
        }
        Acquire::Entered
    }

    fn signal(&mut self, queue: Queue) -> Option<ClientId> {
        self.conditions.pop(queue)
    }

    fn release(&mut self) {
        self.leave();
    }

    fn waiting(&self, queue: Queue) -> usize {
        self.conditions.len(queue)
    }
}
