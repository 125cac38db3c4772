//! Packet-in agent wiring.
//!
//! Builds the pipeline layout from config, registers the built-in audit
//! handler under every audit-class reason, and owns the dispatch engine.

use std::sync::Arc;

use tokio::sync::watch;

use pktin_core::error::Result;

use crate::audit::{AuditSink, ConjunctionResolver, NetworkPolicyAuditor, RotatingFileSink, StaticPipeline};
use crate::config::{AgentConfig, ReasonClass};
use crate::dispatch::{DispatchEngine, HandlerRegistry, PacketInSource};
use crate::obs::AgentMetrics;

pub const AUDIT_HANDLER_NAME: &str = "networkpolicy-audit";

pub struct PacketInAgent {
    cfg: AgentConfig,
    metrics: Arc<AgentMetrics>,
    engine: DispatchEngine,
}

impl PacketInAgent {
    pub fn new(
        cfg: AgentConfig,
        resolver: Arc<dyn ConjunctionResolver>,
        sink: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        cfg.validate()?;

        let metrics = Arc::new(AgentMetrics::new());
        let registry = Arc::new(HandlerRegistry::new());

        if cfg.audit.enabled {
            let pipeline = Arc::new(StaticPipeline::from_config(&cfg.pipeline));
            let auditor = Arc::new(
                NetworkPolicyAuditor::new(pipeline, resolver, sink).with_metrics(Arc::clone(&metrics)),
            );
            for rc in cfg.dispatch.reasons.iter().filter(|r| r.class == ReasonClass::Audit) {
                registry.register(rc.reason(), AUDIT_HANDLER_NAME, auditor.clone());
            }
        }

        // Reasons without a handler still get subscribed; their events are dropped at dispatch.
        for rc in &cfg.dispatch.reasons {
            if registry.handler_names(rc.reason()).is_empty() {
                tracing::warn!(reason = %rc.reason(), name = %rc.name, "no packet-in handler registered for reason yet");
            }
        }

        let engine = DispatchEngine::new(cfg.dispatch.clone(), registry, Arc::clone(&metrics));
        Ok(Self {
            cfg,
            metrics,
            engine,
        })
    }

    /// Same as `new`, writing audit lines to the rotating file configured under `audit`.
    pub fn with_file_sink(cfg: AgentConfig, resolver: Arc<dyn ConjunctionResolver>) -> Result<Self> {
        let sink = Arc::new(RotatingFileSink::open(&cfg.audit)?);
        Self::new(cfg, resolver, sink)
    }

    pub fn cfg(&self) -> &AgentConfig {
        &self.cfg
    }

    /// Other features (traceflow, ...) register their handlers here before `run`.
    pub fn registry(&self) -> Arc<HandlerRegistry> {
        self.engine.registry()
    }

    pub fn metrics(&self) -> Arc<AgentMetrics> {
        Arc::clone(&self.metrics)
    }

    pub async fn run<S>(&self, source: &S, stop: watch::Receiver<bool>) -> Result<()>
    where
        S: PacketInSource + ?Sized,
    {
        self.engine.run(source, stop).await
    }
}
