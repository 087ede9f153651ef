//! Continuation store
//!
//! A handler that cannot answer its caller now captures a [`ReplyToken`]: the
//! endpoint's current caller is moved into a freshly allocated slot, and the
//! token is filed under the client id. Any later handler can take the token
//! and deliver the reply through it. Delivery consumes the token and returns
//! the slot to the allocator.
//!
//! At most one token exists per client at any time.

use crate::{ProtocolViolation, ServerError};
use core_types::{ClientId, SlotId};
use ipc::Message;
use kernel_api::{Endpoint, KernelError, SlotAllocator};
use tracing::{debug, warn};

/// Handle to a saved caller
///
/// Not `Clone`: a token is answered at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct ReplyToken {
    client: ClientId,
    slot: SlotId,
}

impl ReplyToken {
    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }
}

/// Reply tokens indexed by client id
#[derive(Debug)]
pub struct ContinuationStore {
    tokens: Vec<Option<ReplyToken>>,
}

impl ContinuationStore {
    /// Creates a store with room for `capacity` clients
    pub fn new(capacity: usize) -> Self {
        Self {
            tokens: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Saves the endpoint's current caller as `client`'s reply token
    ///
    /// Capturing twice for the same client without an intervening
    /// [`take`](Self::take) is an error in debug builds. Release builds log it
    /// and keep the existing token.
    pub fn capture<K>(&mut self, kernel: &mut K, client: ClientId) -> Result<SlotId, ServerError>
    where
        K: Endpoint + SlotAllocator,
    {
        let entry = self
            .tokens
            .get_mut(client.as_usize())
            .ok_or(ProtocolViolation::UnknownClient(client))?;

        if let Some(existing) = entry.as_ref() {
            if cfg!(debug_assertions) {
                return Err(ServerError::DuplicateCapture(client));
            }
            warn!(%client, slot = %existing.slot, "reply token already captured, keeping it");
            return Ok(existing.slot);
        }

        let slot = kernel.allocate_slot().map_err(|e| match e {
            KernelError::ResourceExhausted(_) => ServerError::ResourceExhausted(e),
            other => ServerError::Channel(other),
        })?;
        if let Err(source) = kernel.save_caller(slot) {
            kernel.release_slot(slot);
            return Err(ServerError::SaveCaller { client, source });
        }

        debug!(%client, %slot, "captured reply token");
        *entry = Some(ReplyToken { client, slot });
        Ok(slot)
    }

    /// Removes and returns `client`'s token
    pub fn take(&mut self, client: ClientId) -> Result<ReplyToken, ServerError> {
        self.tokens
            .get_mut(client.as_usize())
            .and_then(Option::take)
            .ok_or_else(|| ProtocolViolation::NoPendingReply(client).into())
    }

    /// Sends `message` through `token` and frees its slot
    pub fn deliver<K>(
        &mut self,
        kernel: &mut K,
        token: ReplyToken,
        message: Message,
    ) -> Result<(), ServerError>
    where
        K: Endpoint + SlotAllocator,
    {
        let result = kernel.send(token.slot, message);
        kernel.release_slot(token.slot);
        debug!(client = %token.client, slot = %token.slot, "delivered deferred reply");
        result.map_err(ServerError::Channel)
    }

    pub fn is_captured(&self, client: ClientId) -> bool {
        self.tokens
            .get(client.as_usize())
            .is_some_and(Option::is_some)
    }

    /// Returns the number of outstanding tokens
    pub fn outstanding(&self) -> usize {
        self.tokens.iter().filter(|t| t.is_some()).count()
    }
}
