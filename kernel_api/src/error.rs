//! Kernel error types

use core_types::SlotId;
use thiserror::Error;

/// Errors that can occur when interacting with the kernel
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KernelError {
    /// The transport itself failed
    #[error("Channel failure: {0}")]
    ChannelFailure(String),

    /// The allocator has no slot left
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Moving the current caller into a slot failed
    #[error("Failed to save caller: {0}")]
    SaveCallerFailed(String),

    /// A reply was attempted with no caller waiting on the endpoint
    #[error("No caller is waiting for a reply")]
    NoCaller,

    /// The slot is not allocated, or holds no saved caller
    #[error("Invalid slot: {0}")]
    InvalidSlot(SlotId),

    /// A receive found no sender and nothing could ever arrive
    #[error("Receive would block forever")]
    WouldBlockForever,

    /// The endpoint was shut down
    #[error("Endpoint closed")]
    Closed,
}
