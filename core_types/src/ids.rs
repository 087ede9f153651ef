//! Identifiers for clients, callers and capability slots

use serde::{Deserialize, Serialize};
use std::fmt;

/// One machine word of message payload
pub type Word = u64;

/// Identity of a logical client
///
/// Assigned by the server on first contact from a monotonically increasing
/// counter, and stable for the client's lifetime. Small enough to index
/// per-client tables directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(u32);

impl ClientId {
    /// Creates a client ID from its raw index
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index
    pub const fn index(&self) -> u32 {
        self.0
    }

    /// Returns the index as a table offset
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    /// Returns the index as a message word
    pub fn as_word(&self) -> Word {
        Word::from(self.0)
    }

    /// Interprets a message word as a client ID
    ///
    /// Returns `None` when the word does not fit the ID space.
    pub fn from_word(word: Word) -> Option<Self> {
        u32::try_from(word).ok().map(Self)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Client({})", self.0)
    }
}

/// Kernel-side identity of a thread that performed a call
///
/// The server never sees this value; it only exists inside channel
/// implementations, which use it to route replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallerId(u64);

impl CallerId {
    /// Creates a caller ID
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Caller({})", self.0)
    }
}

/// A capability slot handed out by the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(u32);

impl SlotId {
    /// Creates a slot ID
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw slot offset
    pub const fn offset(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.0)
    }
}
