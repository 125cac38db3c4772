//! pktin core: packet-in event model, register decoding, and the shared error surface.
//!
//! This crate defines the data contracts exchanged between the switch interface,
//! the dispatch engine, and packet-in handlers. It intentionally carries no
//! runtime dependencies so it can be reused by any consumer of packet-in events.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Packet-in payloads come straight from the switch, so every fallible path
//! surfaces as `PacketInError`/`Result` instead of bringing the agent down.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ErrorKind, PacketInError, Result};
pub use protocol::{PacketInEvent, ReasonCode};
