//! Register decoding from packet-in match fields.
//!
//! Registers are reported as `REG<index>` match fields holding a 32-bit value.
//! The flow pipeline may pack several values into one register, so callers can
//! narrow a read to an inclusive bit range.

use crate::error::{PacketInError, Result};
use crate::protocol::event::{MatchField, MatchSet, MatchValue};

const REGISTER_PREFIX: &str = "REG";

/// Inclusive bit range `[start, end]` inside a 32-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitRange {
    pub start: u8,
    pub end: u8,
}

impl BitRange {
    pub fn new(start: u8, end: u8) -> Self {
        Self { start, end }
    }

    fn extract(self, data: u32) -> Result<u32> {
        if self.start > self.end || self.end > 31 {
            return Err(PacketInError::decode(format!(
                "invalid register range [{}, {}]",
                self.start, self.end
            )));
        }
        let width = u32::from(self.end - self.start) + 1;
        let mask = if width == 32 { u32::MAX } else { (1u32 << width) - 1 };
        Ok((data >> self.start) & mask)
    }
}

pub fn register_field_name(index: u32) -> String {
    format!("{REGISTER_PREFIX}{index}")
}

/// Locate register `index` in the match set.
pub fn find_register(matches: &MatchSet, index: u32) -> Result<&MatchField> {
    let name = register_field_name(index);
    matches
        .get(&name)
        .ok_or_else(|| PacketInError::decode(format!("match field {name} not found")))
}

/// Read a register field, optionally narrowed to `range`.
pub fn register_value(field: &MatchField, range: Option<BitRange>) -> Result<u32> {
    let data = match field.value {
        MatchValue::Register(v) => v,
        MatchValue::Raw(_) => {
            return Err(PacketInError::decode(format!(
                "register value cannot be retrieved from {}",
                field.name
            )))
        }
    };
    match range {
        Some(r) => r.extract(data),
        None => Ok(data),
    }
}

pub fn decode_register(matches: &MatchSet, index: u32, range: Option<BitRange>) -> Result<u32> {
    register_value(find_register(matches, index)?, range)
}
