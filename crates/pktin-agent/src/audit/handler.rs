use std::sync::Arc;

use async_trait::async_trait;

use pktin_core::error::Result;
use pktin_core::PacketInEvent;

use crate::audit::record::build_audit_record;
use crate::audit::resolver::{ConjunctionResolver, FlowPipeline};
use crate::audit::sink::AuditSink;
use crate::dispatch::PacketInHandler;
use crate::obs::AgentMetrics;

/// Turns network-policy packet-ins into audit lines.
pub struct NetworkPolicyAuditor {
    pipeline: Arc<dyn FlowPipeline>,
    resolver: Arc<dyn ConjunctionResolver>,
    sink: Arc<dyn AuditSink>,
    metrics: Option<Arc<AgentMetrics>>,
}

impl NetworkPolicyAuditor {
    pub fn new(
        pipeline: Arc<dyn FlowPipeline>,
        resolver: Arc<dyn ConjunctionResolver>,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            pipeline,
            resolver,
            sink,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AgentMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[async_trait]
impl PacketInHandler for NetworkPolicyAuditor {
    async fn handle_packet_in(&self, event: &PacketInEvent) -> Result<()> {
        let record = build_audit_record(event, self.pipeline.as_ref(), self.resolver.as_ref())?;
        self.sink.write_line(&record.to_string())?;
        if let Some(m) = &self.metrics {
            m.audit_records.inc(&[("table", record.table_name.as_str())]);
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.sink.close()
    }
}
