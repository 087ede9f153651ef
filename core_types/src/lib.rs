//! # Core Types
//!
//! This crate defines the fundamental identifiers shared by the channel
//! boundary, the simulated kernel and the synchronization server.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: a client, a blocked caller and a reply slot
//!   are three different things and get three different types.
//! - **Small and copyable**: identifiers are plain integers wrapped in newtypes.
//!
//! ## Key Types
//!
//! - [`Word`]: one machine word carried in a message argument slot
//! - [`ClientId`]: server-assigned identity of a logical client
//! - [`CallerId`]: kernel-side identity of a thread blocked on a call
//! - [`SlotId`]: a capability slot that can hold a saved caller

pub mod ids;

pub use ids::{CallerId, ClientId, SlotId, Word};
