//! Ethernet / IPv4 decoding of packet-in data (panic-free).
//!
//! Parsing rules:
//! - Never index (`buf[0]`); always use `Buf` and `remaining()` checks.
//! - Never `unwrap()` / `expect()` / `panic!()` in production paths.
//! - Decode once at event construction; downstream code matches on `L3Payload`.

use std::net::Ipv4Addr;

use bytes::Buf;
use bytes::Bytes;

use crate::error::{PacketInError, Result};

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_VLAN: u16 = 0x8100;

const ETH_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const IPV4_MIN_HEADER_LEN: usize = 20;

/// Fixed IPv4 header fields carried into audit records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    /// Total length (header + payload) as written in the packet.
    pub total_length: u16,
    pub ttl: u8,
    pub protocol: u8,
}

/// Network-layer payload, tagged by what the decoder understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum L3Payload {
    Ipv4(Ipv4Header),
    /// Any ethertype we do not parse; bytes kept opaque.
    Other(Bytes),
}

/// Decoded Ethernet frame from a packet-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    pub dst_mac: [u8; 6],
    pub src_mac: [u8; 6],
    /// Optional 802.1Q VLAN id.
    pub vlan_id: Option<u16>,
    /// Inner ethertype (after any VLAN tag).
    pub ethertype: u16,
    pub payload: L3Payload,
}

impl EthernetFrame {
    /// Build a frame around an already-decoded IPv4 header.
    pub fn ipv4(header: Ipv4Header) -> Self {
        Self {
            dst_mac: [0; 6],
            src_mac: [0; 6],
            vlan_id: None,
            ethertype: ETHERTYPE_IPV4,
            payload: L3Payload::Ipv4(header),
        }
    }

    /// Build a frame carrying an unparsed payload.
    pub fn other(ethertype: u16, data: Bytes) -> Self {
        Self {
            dst_mac: [0; 6],
            src_mac: [0; 6],
            vlan_id: None,
            ethertype,
            payload: L3Payload::Other(data),
        }
    }

    pub fn ipv4_header(&self) -> Option<&Ipv4Header> {
        match &self.payload {
            L3Payload::Ipv4(h) => Some(h),
            L3Payload::Other(_) => None,
        }
    }

    /// Decode an Ethernet frame from bytes.
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        if buf.remaining() < ETH_HEADER_LEN {
            return Err(PacketInError::decode("ethernet frame too short"));
        }

        let mut dst_mac = [0u8; 6];
        buf.copy_to_slice(&mut dst_mac);
        let mut src_mac = [0u8; 6];
        buf.copy_to_slice(&mut src_mac);

        let mut ethertype = buf.get_u16();
        let mut vlan_id = None;
        if ethertype == ETHERTYPE_VLAN {
            if buf.remaining() < VLAN_TAG_LEN {
                return Err(PacketInError::decode("vlan tag truncated"));
            }
            let tci = buf.get_u16();
            vlan_id = Some(tci & 0x0fff);
            ethertype = buf.get_u16();
        }

        let payload = if ethertype == ETHERTYPE_IPV4 {
            L3Payload::Ipv4(decode_ipv4(&mut buf)?)
        } else {
            L3Payload::Other(buf.copy_to_bytes(buf.remaining()))
        };

        Ok(Self {
            dst_mac,
            src_mac,
            vlan_id,
            ethertype,
            payload,
        })
    }
}

fn decode_ipv4(buf: &mut Bytes) -> Result<Ipv4Header> {
    if buf.remaining() < IPV4_MIN_HEADER_LEN {
        return Err(PacketInError::decode("ipv4 header too short"));
    }

    let version_ihl = buf.get_u8();
    let version = version_ihl >> 4;
    if version != 4 {
        return Err(PacketInError::decode(format!(
            "ipv4 header carries version {version}"
        )));
    }
    let header_len = usize::from(version_ihl & 0x0f) * 4;
    if header_len < IPV4_MIN_HEADER_LEN {
        return Err(PacketInError::decode(format!(
            "ipv4 header length {header_len} below minimum"
        )));
    }

    let _tos = buf.get_u8();
    let total_length = buf.get_u16();
    let _id = buf.get_u16();
    let _flags_fragment = buf.get_u16();
    let ttl = buf.get_u8();
    let protocol = buf.get_u8();
    let _checksum = buf.get_u16();
    let src = Ipv4Addr::from(buf.get_u32());
    let dst = Ipv4Addr::from(buf.get_u32());

    // Options are not interesting for auditing; skip what is present.
    let options = header_len - IPV4_MIN_HEADER_LEN;
    if buf.remaining() < options {
        return Err(PacketInError::decode("ipv4 options truncated"));
    }
    buf.advance(options);

    Ok(Ipv4Header {
        src,
        dst,
        total_length,
        ttl,
        protocol,
    })
}
