//! Ethernet/IPv4 decoding vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use bytes::Bytes;

use pktin_core::protocol::{EthernetFrame, L3Payload, MatchSet};
use pktin_core::{PacketInEvent, ReasonCode};


#[test]
fn frame_vectors() {
    let files = [
        "ipv4_tcp.json",
        "ipv4_vlan_udp.json",
        "ipv4_options_icmp.json",
        "arp_other.json",
        "frame_too_short.json",
        "ipv4_truncated.json",
        "ipv4_bad_version.json",
        "ipv4_bad_ihl.json",
        "vlan_truncated.json",
    ];

    for f in files {
        let v = vector_loader::load(f);
        let res = EthernetFrame::decode(Bytes::from(v.frame.decode()));

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.kind().as_str(), err.kind, "vector={}", v.description);
            continue;
        }

        let frame = res.expect("expected ok frame");
        let ex = v.expect.expect("missing expect block");

        assert_eq!(frame.ethertype as u64, ex["ethertype"].as_u64().unwrap(), "vector={}", v.description);
        match ex.get("vlan_id").and_then(|id| id.as_u64()) {
            Some(id) => assert_eq!(frame.vlan_id.map(u64::from), Some(id), "vector={}", v.description),
            None => assert!(frame.vlan_id.is_none(), "vector={}", v.description),
        }

        match &frame.payload {
            L3Payload::Ipv4(h) => {
                assert_eq!(h.src.to_string(), ex["src"].as_str().unwrap(), "vector={}", v.description);
                assert_eq!(h.dst.to_string(), ex["dst"].as_str().unwrap(), "vector={}", v.description);
                assert_eq!(h.total_length as u64, ex["total_length"].as_u64().unwrap(), "vector={}", v.description);
                assert_eq!(h.protocol as u64, ex["protocol"].as_u64().unwrap(), "vector={}", v.description);
            }
            L3Payload::Other(data) => {
                assert_eq!(data.len() as u64, ex["other_len"].as_u64().unwrap(), "vector={}", v.description);
            }
        }
    }
}

#[test]
fn empty_wire_data_has_no_packet() {
    let ev = PacketInEvent::from_wire(ReasonCode::TRACEFLOW, 10, MatchSet::new(), Bytes::new()).unwrap();
    assert!(ev.packet.is_none());
}

#[test]
fn malformed_wire_data_is_a_decode_error() {
    let v = vector_loader::load("ipv4_truncated.json");
    let err = PacketInEvent::from_wire(
        ReasonCode::NETWORK_POLICY,
        90,
        MatchSet::new(),
        Bytes::from(v.frame.decode()),
    )
    .expect_err("must fail");
    assert_eq!(err.kind().as_str(), "DECODE");
}

#[test]
fn flow_key_tracks_addresses() {
    let v = vector_loader::load("ipv4_tcp.json");
    let data = Bytes::from(v.frame.decode());
    let a = PacketInEvent::from_wire(ReasonCode::NETWORK_POLICY, 90, MatchSet::new(), data.clone()).unwrap();
    let b = PacketInEvent::from_wire(ReasonCode::NETWORK_POLICY, 90, MatchSet::new().with_register(3, 1), data).unwrap();
    assert_eq!(a.flow_key(), b.flow_key());

    let other = vector_loader::load("ipv4_vlan_udp.json");
    let c = PacketInEvent::from_wire(
        ReasonCode::NETWORK_POLICY,
        90,
        MatchSet::new(),
        Bytes::from(other.frame.decode()),
    )
    .unwrap();
    assert_ne!(a.flow_key(), c.flow_key());
}
