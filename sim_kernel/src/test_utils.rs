//! Test utilities for driving the server by script
//!
//! This module provides helpers for tests that queue requests by hand instead
//! of installing a [`ClientDriver`](crate::ClientDriver).

use crate::SimulatedKernel;
use core_types::{CallerId, ClientId};
use ipc::Request;

/// A fixed set of callers with helpers for queueing typed requests
///
/// Caller `i` is the `i`-th to send `INIT`, so under the server's
/// first-contact numbering it becomes `ClientId(i)`.
pub struct ScriptedClients {
    callers: Vec<CallerId>,
}

impl ScriptedClients {
    /// Creates `count` callers on `kernel`
    pub fn new(kernel: &mut SimulatedKernel, count: usize) -> Self {
        let callers = (0..count).map(|_| kernel.new_caller()).collect();
        Self { callers }
    }

    /// Returns the caller behind client index `index`
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range; scripts are written against a known
    /// population.
    pub fn caller(&self, index: usize) -> CallerId {
        self.callers[index]
    }

    /// Returns the client id caller `index` is expected to receive
    pub fn client(&self, index: usize) -> ClientId {
        ClientId::new(index as u32)
    }

    /// Returns the number of callers
    pub fn len(&self) -> usize {
        self.callers.len()
    }

    /// Returns whether there are no callers
    pub fn is_empty(&self) -> bool {
        self.callers.is_empty()
    }

    /// Queues `INIT` from every caller, in index order
    pub fn init_all(&self, kernel: &mut SimulatedKernel) {
        for index in 0..self.callers.len() {
            self.call(kernel, index, Request::Init);
        }
    }

    /// Queues a blocking call of `request` from caller `index`
    pub fn call(&self, kernel: &mut SimulatedKernel, index: usize, request: Request) {
        kernel
            .push_call(self.caller(index), request.encode())
            .unwrap_or_else(|_| panic!("endpoint queue full scripting {:?}", request));
    }

    /// Queues a one-way `TMNT` from caller `index`
    pub fn terminate(&self, kernel: &mut SimulatedKernel, index: usize) {
        let request = Request::Terminate {
            client: self.client(index),
        };
        kernel
            .push_send(self.caller(index), request.encode())
            .unwrap_or_else(|_| panic!("endpoint queue full scripting {:?}", request));
    }

    /// Queues a one-way `TMNT` from every caller, in index order
    pub fn terminate_all(&self, kernel: &mut SimulatedKernel) {
        for index in 0..self.callers.len() {
            self.terminate(kernel, index);
        }
    }

    /// Queues `PRODUCER` from caller `index`
    pub fn produce(&self, kernel: &mut SimulatedKernel, index: usize) {
        self.call(
            kernel,
            index,
            Request::Producer {
                client: self.client(index),
            },
        );
    }

    /// Queues `CONSUMER` from caller `index`
    pub fn consume(&self, kernel: &mut SimulatedKernel, index: usize) {
        self.call(
            kernel,
            index,
            Request::Consumer {
                client: self.client(index),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_api::Endpoint;

    #[test]
    fn test_scripted_init_order() {
        let mut kernel = SimulatedKernel::new();
        let clients = ScriptedClients::new(&mut kernel, 3);
        clients.init_all(&mut kernel);
        assert_eq!(kernel.pending(), 3);

        kernel.receive().unwrap();
        assert_eq!(kernel.current_caller(), Some(clients.caller(0)));
    }

    #[test]
    fn test_terminate_is_one_way() {
        let mut kernel = SimulatedKernel::new();
        let clients = ScriptedClients::new(&mut kernel, 1);
        clients.terminate(&mut kernel, 0);

        let msg = kernel.receive().unwrap();
        assert_eq!(
            Request::decode(&msg),
            Ok(Request::Terminate {
                client: ClientId::new(0)
            })
        );
        assert_eq!(kernel.current_caller(), None);
    }
}
