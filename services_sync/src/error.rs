//! Server error types
//!
//! Two classes of failure exist. Protocol violations come from a misbehaving
//! client: the offending message is logged and dropped and the loop carries
//! on. Everything else means the server cannot sustain its configured run and
//! is surfaced to the caller of `run`.

use core_types::ClientId;
use ipc::DecodeError;
use kernel_api::KernelError;
use thiserror::Error;

/// A message that arrived for a client in a state that does not expect it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("malformed message: {0}")]
    Malformed(#[from] DecodeError),

    #[error("{0} is not registered")]
    UnknownClient(ClientId),

    #[error("{0} has already terminated")]
    Terminated(ClientId),

    #[error("{0} sent a request while parked")]
    AlreadyParked(ClientId),

    #[error("{0} sent WAIT while holding the gate")]
    WaitWhileHolding(ClientId),

    #[error("{0} sent SEND_WAIT without holding the gate")]
    SendWaitWithoutGate(ClientId),

    #[error("{0} has no captured reply token")]
    NoPendingReply(ClientId),
}

/// Errors surfaced by the synchronization server
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(KernelError),

    #[error("Failed to save caller for {client}: {source}")]
    SaveCaller {
        client: ClientId,
        source: KernelError,
    },

    #[error("Channel failure: {0}")]
    Channel(KernelError),

    #[error("Client capacity of {capacity} exceeded")]
    CapacityExceeded { capacity: usize },

    #[error("{0} already holds an unconsumed reply token")]
    DuplicateCapture(ClientId),

    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl ServerError {
    /// Returns whether the error ends the run
    ///
    /// Only protocol violations are recovered locally.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ServerError::Protocol(_))
    }
}

impl From<DecodeError> for ServerError {
    fn from(error: DecodeError) -> Self {
        ServerError::Protocol(ProtocolViolation::Malformed(error))
    }
}
