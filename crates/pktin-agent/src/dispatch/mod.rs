//! Packet-in dispatch.
//!
//! `engine` owns the lifecycle; `fanin` merges per-reason channels with trace
//! priority; `queue` and `limiter` hold events between fan-in and the workers;
//! `registry` maps reason codes to named handlers.

pub mod engine;
pub mod fanin;
pub mod limiter;
pub mod queue;
pub mod registry;

pub use engine::{DispatchEngine, PacketInSource};
pub use fanin::{FanIn, FanInEvent, Subscription};
pub use limiter::{ExponentialBackoff, RateLimiter, TokenBucket};
pub use queue::{FifoQueue, RateLimitedQueue, ReasonQueue};
pub use registry::{DispatchOutcome, HandlerFailure, HandlerRegistry, PacketInHandler};
