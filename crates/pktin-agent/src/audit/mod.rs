//! Network-policy audit path.
//!
//! - `resolver`: injected lookups (conjunction -> policy, pipeline layout).
//! - `record`: builds one `AuditRecord` per packet-in.
//! - `sink`: where formatted lines go (rotating file by default).
//! - `handler`: the `PacketInHandler` tying the three together.

pub mod handler;
pub mod record;
pub mod resolver;
pub mod sink;

pub use handler::NetworkPolicyAuditor;
pub use record::{build_audit_record, full_policy_name, AuditRecord};
pub use resolver::{ConjunctionResolver, FlowPipeline, PolicyIdentity, StaticPipeline};
pub use sink::{AuditSink, RotatingFileSink};
