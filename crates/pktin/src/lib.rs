//! Facade crate for the packet-in agent.
//!
//! Re-exports the protocol core and the agent library so consumers depend on a single crate.

pub mod core {
    pub use pktin_core::*;
}

pub mod agent {
    pub use pktin_agent::*;
}
