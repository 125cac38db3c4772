//! Observability: tracing setup and in-process metrics.
//!
//! Metrics are stored as atomics and rendered on demand in Prometheus text
//! format; exposing them is left to the embedding agent.

pub mod logging;
pub mod metrics;

pub use metrics::AgentMetrics;
