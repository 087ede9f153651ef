//! Client-side behaviour for simulated runs

use core_types::CallerId;
use ipc::Message;

/// A request a simulated client puts on the endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Blocking call; the client waits for an answer
    Call(Message),
    /// One-way send; the client does not wait
    Send(Message),
}

/// Plays the clients' side of the protocol
///
/// The simulated kernel asks the driver for each caller's next request as
/// soon as that caller is answered, which is exactly when a real client
/// thread would wake up and issue it.
pub trait ClientDriver {
    /// Requests queued before the server's first receive
    fn start(&mut self) -> Vec<(CallerId, Outgoing)>;

    /// Called when `reply` reaches `caller`; returns its next request
    fn on_reply(&mut self, caller: CallerId, reply: &Message) -> Option<Outgoing>;

    /// Called when a one-way send from `caller` has been received
    fn after_send(&mut self, _caller: CallerId) -> Option<Outgoing> {
        None
    }
}
