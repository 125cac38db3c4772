//! Packet-in protocol primitives.
//!
//! - `event`: the reason-coded `PacketInEvent` and its match-field set.
//! - `ethernet`: one-shot Ethernet/IPv4 decoding of the packet-in data.
//! - `register`: extraction of (optionally bit-ranged) register values.
//!
//! All parsers are panic-free: malformed input from the switch is reported as
//! `PacketInError::Decode` instead of panicking or indexing raw buffers.

pub mod ethernet;
pub mod event;
pub mod register;

pub use ethernet::{EthernetFrame, Ipv4Header, L3Payload, ETHERTYPE_IPV4, ETHERTYPE_VLAN};
pub use event::{MatchField, MatchSet, MatchValue, PacketInEvent, ReasonCode};
pub use register::{decode_register, find_register, register_field_name, register_value, BitRange};

/// IANA protocol number to the short name used in audit lines.
pub fn protocol_name(number: u8) -> Option<&'static str> {
    match number {
        1 => Some("ICMP"),
        6 => Some("TCP"),
        17 => Some("UDP"),
        58 => Some("IPv6-ICMP"),
        132 => Some("SCTP"),
        _ => None,
    }
}
