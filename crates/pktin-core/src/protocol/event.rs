//! Reason-coded packet-in events.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::ethernet::EthernetFrame;
use crate::protocol::register::register_field_name;

/// Packet-in reason code set by the flow pipeline's controller action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReasonCode(pub u8);

impl ReasonCode {
    /// Network-policy decision (audit logging).
    pub const NETWORK_POLICY: ReasonCode = ReasonCode(0);
    /// Explicit trace packets.
    pub const TRACEFLOW: ReasonCode = ReasonCode(1);

    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value of one match field as reported by the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchValue {
    /// Plain integer field (ports, metadata, ...).
    Raw(u64),
    /// 32-bit register; can be narrowed to a bit range.
    Register(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchField {
    pub name: String,
    pub value: MatchValue,
}

/// Named match fields attached to a packet-in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSet {
    fields: Vec<MatchField>,
}

impl MatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field by name.
    pub fn insert(&mut self, name: impl Into<String>, value: MatchValue) {
        let name = name.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(f) => f.value = value,
            None => self.fields.push(MatchField { name, value }),
        }
    }

    pub fn with_register(mut self, index: u32, value: u32) -> Self {
        self.insert(register_field_name(index), MatchValue::Register(value));
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: MatchValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&MatchField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatchField> {
        self.fields.iter()
    }
}

/// One packet delivered by the switch for a given reason code.
/// Immutable once built; handlers only ever see `&PacketInEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketInEvent {
    pub reason: ReasonCode,
    pub table_id: u8,
    pub matches: MatchSet,
    /// Decoded payload, absent when the switch sent no packet data.
    pub packet: Option<EthernetFrame>,
}

impl PacketInEvent {
    pub fn new(
        reason: ReasonCode,
        table_id: u8,
        matches: MatchSet,
        packet: Option<EthernetFrame>,
    ) -> Self {
        Self {
            reason,
            table_id,
            matches,
            packet,
        }
    }

    /// Build an event from raw packet-in data, decoding the frame once.
    pub fn from_wire(
        reason: ReasonCode,
        table_id: u8,
        matches: MatchSet,
        data: Bytes,
    ) -> Result<Self> {
        let packet = if data.is_empty() {
            None
        } else {
            Some(EthernetFrame::decode(data)?)
        };
        Ok(Self::new(reason, table_id, matches, packet))
    }

    /// Key identifying the flow this packet belongs to, used for backoff bookkeeping.
    pub fn flow_key(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.reason.hash(&mut h);
        self.table_id.hash(&mut h);
        if let Some(ip) = self.packet.as_ref().and_then(|p| p.ipv4_header()) {
            ip.src.hash(&mut h);
            ip.dst.hash(&mut h);
            ip.protocol.hash(&mut h);
        }
        h.finish()
    }
}
