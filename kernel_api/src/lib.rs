//! # Kernel API
//!
//! This crate defines the only two services the synchronization server needs
//! from the platform underneath it.
//!
//! ## Philosophy
//!
//! The kernel provides **mechanisms**, not policies:
//! - A rendezvous endpoint (receive, reply, reply-then-receive)
//! - Saving the current caller into a slot and answering it later
//! - A slot allocator that can run dry
//! - A shared endpoint for servers that run one worker thread per client
//!
//! ## Design Goals
//!
//! 1. **Testability**: both boundaries can be implemented in-process
//! 2. **Explicitness**: the implicit reply target is named ("current caller")
//!    and moving it out of the endpoint is a separate, fallible step
//! 3. **Simplicity**: nothing here knows about clients, barriers or buffers
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - Process creation, address spaces or device setup
//! - A specific transport (the traits can be implemented many ways)

pub mod error;
pub mod kernel;

pub use error::KernelError;
pub use kernel::{Endpoint, Received, SharedEndpoint, SlotAllocator};
