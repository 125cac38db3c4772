//! Packet-in agent library.
//!
//! Wires config, the reason-coded dispatch engine, the network-policy audit
//! path and observability into one `PacketInAgent`. Consumed by the host
//! agent process and by integration tests.

pub mod agent;
pub mod audit;
pub mod config;
pub mod dispatch;
pub mod obs;

pub use agent::{PacketInAgent, AUDIT_HANDLER_NAME};
