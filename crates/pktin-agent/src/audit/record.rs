//! Network-policy audit record built from one packet-in.

use std::fmt;

use pktin_core::error::{PacketInError, Result};
use pktin_core::protocol::{decode_register, L3Payload, ETHERTYPE_IPV4};
use pktin_core::PacketInEvent;

use crate::audit::resolver::{ConjunctionResolver, FlowPipeline};

/// One audit line. Fields the packet cannot provide stay empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditRecord {
    pub table_name: String,
    pub policy_name: String,
    pub disposition: String,
    pub priority: String,
    pub src_ip: String,
    pub dest_ip: String,
    pub length: u16,
    pub protocol: String,
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} SRC: {} DEST: {} {} {}",
            self.table_name,
            self.policy_name,
            self.disposition,
            self.priority,
            self.src_ip,
            self.dest_ip,
            self.length,
            self.protocol
        )
    }
}

/// `namespace/name`, or the bare name when either part is empty.
pub fn full_policy_name(name: &str, namespace: &str) -> String {
    if name.is_empty() || namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}

/// Decode policy identity and disposition from the event's registers.
///
/// Tables outside both rule ranges carry no policy match; those fields stay empty.
pub fn fill_policy_info(
    event: &PacketInEvent,
    pipeline: &dyn FlowPipeline,
    resolver: &dyn ConjunctionResolver,
    record: &mut AuditRecord,
) -> Result<()> {
    record.table_name = pipeline.table_name(event.table_id);

    let conj_reg = if pipeline.is_egress_table(event.table_id) {
        pipeline.egress_reg()
    } else if pipeline.is_ingress_table(event.table_id) {
        pipeline.ingress_reg()
    } else {
        return Ok(());
    };

    let conj_id = decode_register(&event.matches, conj_reg, None)?;
    let policy = match resolver.resolve_conjunction(conj_id) {
        Some(p) => p,
        None => {
            tracing::debug!(conj_id, table = event.table_id, "conjunction id not known to resolver");
            Default::default()
        }
    };
    record.policy_name = full_policy_name(&policy.name, &policy.namespace);
    record.priority = policy.priority;

    let disposition = decode_register(&event.matches, pipeline.disposition_reg(), None)?;
    record.disposition = pipeline.disposition_name(disposition);
    Ok(())
}

/// Copy IPv4 header fields; any other ethertype leaves them empty.
pub fn fill_packet_info(
    event: &PacketInEvent,
    pipeline: &dyn FlowPipeline,
    record: &mut AuditRecord,
) -> Result<()> {
    let Some(frame) = &event.packet else {
        return Ok(());
    };
    if frame.ethertype != ETHERTYPE_IPV4 {
        return Ok(());
    }

    let L3Payload::Ipv4(ip) = &frame.payload else {
        return Err(PacketInError::decode("invalid IPv4 packet"));
    };
    record.src_ip = ip.src.to_string();
    record.dest_ip = ip.dst.to_string();
    record.length = ip.total_length;
    record.protocol = pipeline.protocol_name(ip.protocol);
    Ok(())
}

/// Build the whole record; the first decode failure aborts it.
pub fn build_audit_record(
    event: &PacketInEvent,
    pipeline: &dyn FlowPipeline,
    resolver: &dyn ConjunctionResolver,
) -> Result<AuditRecord> {
    let mut record = AuditRecord::default();
    fill_policy_info(event, pipeline, resolver, &mut record)?;
    fill_packet_info(event, pipeline, &mut record)?;
    Ok(record)
}
