//! # Sync Server
//!
//! This crate implements a label-dispatched synchronization server: clients
//! send small fixed-format requests over a rendezvous endpoint, and the
//! server coordinates them through a start barrier, a hand-off gate and a
//! bounded producer/consumer buffer.
//!
//! ## Philosophy
//!
//! **One thread, no blocking inside handlers.**
//!
//! The server never sleeps on behalf of a client. A request that cannot be
//! answered yet captures a reply token and parks; whoever later changes the
//! state it waits on resumes it and answers through that token. Which
//! synchronization primitive implements the waiting, and how fast-path
//! replies are sent, are configuration choices that leave the coordination
//! policy untouched.
//!
//! [`ThreadedServer`] is the other execution shape: one worker thread per
//! client, each running the loop body against a shared endpoint and all of
//! them sharing one primitive and one buffer.
//!
//! ## Example
//!
//! ```
//! use services_sync::{ServerConfig, SyncServer};
//! use sim_kernel::test_utils::ScriptedClients;
//! use sim_kernel::SimulatedKernel;
//!
//! let mut kernel = SimulatedKernel::new();
//! let clients = ScriptedClients::new(&mut kernel, 2);
//! clients.init_all(&mut kernel);
//! clients.terminate_all(&mut kernel);
//!
//! let mut server = SyncServer::new(kernel, ServerConfig::with_population(2)).unwrap();
//! let summary = server.run().unwrap();
//! assert_eq!(summary.stats.requests_for(ipc::MessageLabel::Init), 2);
//! ```

pub mod buffer;
pub mod config;
pub mod continuation;
pub mod dispatch;
pub mod error;
pub mod primitive;
pub mod registry;
pub mod state;
pub mod stats;
pub mod threaded;

pub use buffer::{BoundedBuffer, BufferError};
pub use config::{MulticastTrigger, PrimitiveKind, ReplyStrategy, ServerConfig};
pub use continuation::{ContinuationStore, ReplyToken};
pub use dispatch::{ReplyDirective, Step, SyncServer};
pub use error::{ProtocolViolation, ServerError};
pub use primitive::{Acquire, Queue, SyncPrimitive};
pub use registry::{ClientRecord, ClientRegistry, ParkedOn};
pub use state::ServerState;
pub use stats::{RunSummary, ServerStats};
pub use threaded::ThreadedServer;
