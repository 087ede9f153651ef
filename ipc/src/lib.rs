//! # Inter-Process Communication (IPC)
//!
//! This crate defines the message format spoken over the server's rendezvous
//! channel.
//!
//! ## Philosophy
//!
//! - **Small fixed envelope**: a numeric label plus a handful of machine words
//! - **Typed at the edge**: raw messages are decoded once into [`Request`]
//!   and never inspected by label again
//! - **Immutable**: a received message is never edited; replies are built fresh
//!
//! ## Architecture
//!
//! A [`Message`] is what the channel moves. Its label selects the request kind
//! ([`MessageLabel`]); its argument words carry the client identity and any
//! extra operands. [`Request`] is the tagged form the server dispatches on, and
//! [`replies`] builds the messages the server sends back.

pub mod message;
pub mod typed;

pub use message::{Message, MessageError, MAX_MESSAGE_WORDS};
pub use typed::{replies, DecodeError, MessageLabel, Request};
