//! Lookups the audit path consumes but does not own.
//!
//! - `ConjunctionResolver`: conjunction id -> network-policy identity (maintained
//!   by the policy controller).
//! - `FlowPipeline`: table names, rule-table ranges, register layout,
//!   disposition and protocol names (defined by the flow program).

use std::collections::{BTreeMap, BTreeSet};

use pktin_core::protocol::protocol_name;

use crate::config::PipelineSection;

/// Network policy a conjunction id belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyIdentity {
    pub name: String,
    /// Empty for cluster-scoped policies.
    pub namespace: String,
    /// Flow priority, verbatim as the pipeline reports it.
    pub priority: String,
}

pub trait ConjunctionResolver: Send + Sync {
    fn resolve_conjunction(&self, conj_id: u32) -> Option<PolicyIdentity>;
}

pub trait FlowPipeline: Send + Sync {
    fn table_name(&self, table_id: u8) -> String;
    fn is_egress_table(&self, table_id: u8) -> bool;
    fn is_ingress_table(&self, table_id: u8) -> bool;
    fn egress_reg(&self) -> u32;
    fn ingress_reg(&self) -> u32;
    fn disposition_reg(&self) -> u32;
    fn disposition_name(&self, code: u32) -> String;
    fn protocol_name(&self, number: u8) -> String;
}

/// Config-driven pipeline layout.
#[derive(Debug, Clone)]
pub struct StaticPipeline {
    egress_reg: u32,
    ingress_reg: u32,
    disposition_reg: u32,
    egress_tables: BTreeSet<u8>,
    ingress_tables: BTreeSet<u8>,
    tables: BTreeMap<u8, String>,
    dispositions: BTreeMap<u32, String>,
}

impl StaticPipeline {
    pub fn from_config(cfg: &PipelineSection) -> Self {
        Self {
            egress_reg: cfg.egress_reg,
            ingress_reg: cfg.ingress_reg,
            disposition_reg: cfg.disposition_reg,
            egress_tables: cfg.egress_tables.iter().copied().collect(),
            ingress_tables: cfg.ingress_tables.iter().copied().collect(),
            tables: cfg.tables.clone(),
            dispositions: cfg.dispositions.clone(),
        }
    }
}

impl Default for StaticPipeline {
    fn default() -> Self {
        Self::from_config(&PipelineSection::default())
    }
}

impl FlowPipeline for StaticPipeline {
    fn table_name(&self, table_id: u8) -> String {
        self.tables
            .get(&table_id)
            .cloned()
            .unwrap_or_else(|| format!("table{table_id}"))
    }

    fn is_egress_table(&self, table_id: u8) -> bool {
        self.egress_tables.contains(&table_id)
    }

    fn is_ingress_table(&self, table_id: u8) -> bool {
        self.ingress_tables.contains(&table_id)
    }

    fn egress_reg(&self) -> u32 {
        self.egress_reg
    }

    fn ingress_reg(&self) -> u32 {
        self.ingress_reg
    }

    fn disposition_reg(&self) -> u32 {
        self.disposition_reg
    }

    fn disposition_name(&self, code: u32) -> String {
        self.dispositions.get(&code).cloned().unwrap_or_default()
    }

    fn protocol_name(&self, number: u8) -> String {
        protocol_name(number).map(str::to_string).unwrap_or_default()
    }
}
