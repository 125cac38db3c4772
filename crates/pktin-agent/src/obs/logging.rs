//! `tracing` subscriber setup for embedding processes and tools.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pktin_core::error::{PacketInError, Result};

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `default_directive`.
///
/// Fails instead of panicking when a global subscriber is already set.
pub fn init(default_directive: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| PacketInError::Config(format!("invalid log filter {default_directive}: {e}")))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|e| PacketInError::Config(format!("tracing init failed: {e}")))
}
