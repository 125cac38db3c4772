use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use pktin_core::error::{PacketInError, Result};
use pktin_core::ReasonCode;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub version: u32,

    #[serde(default)]
    pub dispatch: DispatchSection,

    #[serde(default)]
    pub audit: AuditSection,

    #[serde(default)]
    pub pipeline: PipelineSection,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            version: 1,
            dispatch: DispatchSection::default(),
            audit: AuditSection::default(),
            pipeline: PipelineSection::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(PacketInError::UnsupportedVersion);
        }

        self.dispatch.validate()?;
        self.audit.validate()?;
        self.pipeline.validate()?;

        Ok(())
    }
}

/// How a reason's queue treats bursts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasonClass {
    /// Latency-sensitive: bounded FIFO, drop on full, polled first.
    Trace,
    /// High-volume: rate-limited queue.
    Audit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReasonConfig {
    pub name: String,
    pub code: u8,
    pub class: ReasonClass,
}

impl ReasonConfig {
    pub fn reason(&self) -> ReasonCode {
        ReasonCode(self.code)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchSection {
    #[serde(default = "default_trace_queue_capacity")]
    pub trace_queue_capacity: usize,

    #[serde(default = "default_reasons")]
    pub reasons: Vec<ReasonConfig>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            trace_queue_capacity: default_trace_queue_capacity(),
            reasons: default_reasons(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl DispatchSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=65536).contains(&self.trace_queue_capacity) {
            return Err(PacketInError::Config(
                "dispatch.trace_queue_capacity must be between 1 and 65536".into(),
            ));
        }
        if self.reasons.is_empty() {
            return Err(PacketInError::Config("dispatch.reasons must not be empty".into()));
        }

        let mut codes = HashSet::new();
        let mut names = HashSet::new();
        for r in &self.reasons {
            if r.name.is_empty() {
                return Err(PacketInError::Config("dispatch.reasons[].name must not be empty".into()));
            }
            if !codes.insert(r.code) {
                return Err(PacketInError::Config(format!(
                    "dispatch.reasons: duplicate code {}",
                    r.code
                )));
            }
            if !names.insert(r.name.as_str()) {
                return Err(PacketInError::Config(format!(
                    "dispatch.reasons: duplicate name {}",
                    r.name
                )));
            }
        }

        self.rate_limit.validate()
    }
}

fn default_trace_queue_capacity() -> usize {
    256
}
fn default_reasons() -> Vec<ReasonConfig> {
    vec![
        ReasonConfig {
            name: "traceflow".into(),
            code: ReasonCode::TRACEFLOW.as_u8(),
            class: ReasonClass::Trace,
        },
        ReasonConfig {
            name: "networkpolicy".into(),
            code: ReasonCode::NETWORK_POLICY.as_u8(),
            class: ReasonClass::Audit,
        },
    ]
}

/// Rate-limited queue policy for audit-class reasons.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_qps")]
    pub qps: u32,

    #[serde(default = "default_burst")]
    pub burst: u32,

    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            qps: default_qps(),
            burst: default_burst(),
            max_pending: default_max_pending(),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(PacketInError::Config(
                "dispatch.rate_limit.base_delay_ms must be at least 1".into(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(PacketInError::Config(
                "dispatch.rate_limit.max_delay_ms must not be below base_delay_ms".into(),
            ));
        }
        if self.qps == 0 || self.burst == 0 {
            return Err(PacketInError::Config(
                "dispatch.rate_limit.qps and burst must be at least 1".into(),
            ));
        }
        if self.max_pending == 0 {
            return Err(PacketInError::Config(
                "dispatch.rate_limit.max_pending must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_base_delay_ms() -> u64 {
    5
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_qps() -> u32 {
    10
}
fn default_burst() -> u32 {
    100
}
fn default_max_pending() -> usize {
    4096
}

/// Audit log file settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_file_name")]
    pub file_name: String,

    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,

    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            log_dir: default_log_dir(),
            file_name: default_file_name(),
            max_size_mb: default_max_size_mb(),
            max_backups: default_max_backups(),
            max_age_days: default_max_age_days(),
        }
    }
}

impl AuditSection {
    pub fn validate(&self) -> Result<()> {
        if self.file_name.is_empty() || self.file_name.contains('/') {
            return Err(PacketInError::Config(
                "audit.file_name must be a plain file name".into(),
            ));
        }
        if self.log_dir.is_empty() {
            return Err(PacketInError::Config("audit.log_dir must not be empty".into()));
        }
        if self.max_size_mb == 0 {
            return Err(PacketInError::Config("audit.max_size_mb must be at least 1".into()));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_log_dir() -> String {
    "/var/log/pktin/networkpolicy".into()
}
fn default_file_name() -> String {
    "np.log".into()
}
fn default_max_size_mb() -> u64 {
    500
}
fn default_max_backups() -> usize {
    3
}
fn default_max_age_days() -> u64 {
    28
}

/// Flow pipeline layout: which registers and tables carry policy state.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    #[serde(default = "default_egress_reg")]
    pub egress_reg: u32,

    #[serde(default = "default_ingress_reg")]
    pub ingress_reg: u32,

    #[serde(default = "default_disposition_reg")]
    pub disposition_reg: u32,

    #[serde(default = "default_egress_tables")]
    pub egress_tables: Vec<u8>,

    #[serde(default = "default_ingress_tables")]
    pub ingress_tables: Vec<u8>,

    #[serde(default = "default_tables")]
    pub tables: BTreeMap<u8, String>,

    #[serde(default = "default_dispositions")]
    pub dispositions: BTreeMap<u32, String>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            egress_reg: default_egress_reg(),
            ingress_reg: default_ingress_reg(),
            disposition_reg: default_disposition_reg(),
            egress_tables: default_egress_tables(),
            ingress_tables: default_ingress_tables(),
            tables: default_tables(),
            dispositions: default_dispositions(),
        }
    }
}

impl PipelineSection {
    pub fn validate(&self) -> Result<()> {
        for (name, reg) in [
            ("egress_reg", self.egress_reg),
            ("ingress_reg", self.ingress_reg),
            ("disposition_reg", self.disposition_reg),
        ] {
            if reg > 15 {
                return Err(PacketInError::Config(format!(
                    "pipeline.{name} must be between 0 and 15"
                )));
            }
        }
        if let Some(t) = self.egress_tables.iter().find(|t| self.ingress_tables.contains(t)) {
            return Err(PacketInError::Config(format!(
                "pipeline: table {t} is listed as both egress and ingress"
            )));
        }
        Ok(())
    }
}

fn default_egress_reg() -> u32 {
    5
}
fn default_ingress_reg() -> u32 {
    6
}
fn default_disposition_reg() -> u32 {
    3
}
fn default_egress_tables() -> Vec<u8> {
    vec![45, 50]
}
fn default_ingress_tables() -> Vec<u8> {
    vec![85, 90]
}
fn default_tables() -> BTreeMap<u8, String> {
    [
        (45, "AntreaPolicyEgressRule"),
        (50, "EgressRule"),
        (85, "AntreaPolicyIngressRule"),
        (90, "IngressRule"),
    ]
    .into_iter()
    .map(|(id, name)| (id, name.to_string()))
    .collect()
}
fn default_dispositions() -> BTreeMap<u32, String> {
    [(0, "Allow"), (1, "Drop"), (2, "Reject")]
        .into_iter()
        .map(|(code, name)| (code, name.to_string()))
        .collect()
}
