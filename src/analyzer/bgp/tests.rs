use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

use super::*;
use crate::analyzer::PacketContext;

/// Shared writer so a test can inspect what the analyzer logged.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

fn analyzer() -> (BgpAnalyzer, SharedBuf, SharedBuf) {
    let anom = SharedBuf::default();
    let moas = SharedBuf::default();
    let mut a = BgpAnalyzer::new(
        BgpConfig::default(),
        Box::new(anom.clone()),
        Box::new(moas.clone()),
        None,
    )
    .unwrap();
    a.init(8).unwrap();
    (a, anom, moas)
}

fn flow_view(findex: u64) -> FlowView {
    FlowView {
        findex,
        src_ip: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
        dst_ip: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2)),
        src_port: 33000,
        dst_port: 179,
        vlan: 0,
        l4_proto: L4Proto::Tcp,
        first_seen_secs: 1_700_000_000,
        direction: FlowDir::A,
        opposite: None,
    }
}

fn packet<'a>(l7: &'a [u8], ts_secs: u64, pkt_num: u64) -> PacketView<'a> {
    PacketView {
        l7,
        l7_len: l7.len() as u16,
        ts_secs,
        ts_usecs: 0,
        l4_proto: L4Proto::Tcp,
        first_fragment: true,
        pkt_num,
    }
}

fn message(typ: u8, body: &[u8]) -> Vec<u8> {
    let mut msg = vec![0xff; 16];
    msg.extend_from_slice(&((19 + body.len()) as u16).to_be_bytes());
    msg.push(typ);
    msg.extend_from_slice(body);
    msg
}

fn open_msg(asn: u16, hold: u16, router_id: [u8; 4]) -> Vec<u8> {
    let mut body = vec![4]; // version
    body.extend_from_slice(&asn.to_be_bytes());
    body.extend_from_slice(&hold.to_be_bytes());
    body.extend_from_slice(&router_id);
    body.push(0); // no optional parameters
    message(1, &body)
}

fn attr(flags: u8, typ: u8, value: &[u8]) -> Vec<u8> {
    let mut a = vec![flags, typ, value.len() as u8];
    a.extend_from_slice(value);
    a
}

fn as_path_16(segments: &[(u8, &[u16])]) -> Vec<u8> {
    let mut v = Vec::new();
    for (stype, asns) in segments {
        v.push(*stype);
        v.push(asns.len() as u8);
        for a in *asns {
            v.extend_from_slice(&a.to_be_bytes());
        }
    }
    v
}

fn update_msg(withdrawn: &[(u8, &[u8])], attrs: &[u8], nlri: &[(u8, &[u8])]) -> Vec<u8> {
    let mut wd = Vec::new();
    for (mask, prefix) in withdrawn {
        wd.push(*mask);
        wd.extend_from_slice(prefix);
    }
    let mut body = Vec::new();
    body.extend_from_slice(&(wd.len() as u16).to_be_bytes());
    body.extend_from_slice(&wd);
    body.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
    body.extend_from_slice(attrs);
    for (mask, prefix) in nlri {
        body.push(*mask);
        body.extend_from_slice(prefix);
    }
    message(2, &body)
}

fn s1_update() -> Vec<u8> {
    let mut attrs = attr(0x40, 1, &[0]); // ORIGIN IGP
    attrs.extend(attr(0x40, 2, &as_path_16(&[(BGP_AS_SEQUENCE, &[65000, 65001])])));
    attrs.extend(attr(0x40, 3, &[10, 0, 0, 1])); // NEXT_HOP
    update_msg(&[], &attrs, &[(8, &[10])])
}

#[test]
fn test_non_bgp_flow_is_ignored() {
    let (mut a, _, _) = analyzer();
    let mut flow = flow_view(1);
    flow.src_port = 12345;
    flow.dst_port = 80;
    let msg = open_msg(65000, 90, [10, 0, 0, 1]);
    let pkt = packet(&msg, 1_700_000_000, 1);
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut PacketContext::default());
    assert!(a.flow(0).stat.is_empty());
    assert_eq!(a.flow(0).num_t, [0; 6]);
}

#[test]
fn test_open_then_update_scenario() {
    let (mut a, _, _) = analyzer();
    let flow = flow_view(1);
    let mut ctx = PacketContext::default();

    let open = open_msg(65000, 90, [10, 0, 0, 1]);
    let pkt = packet(&open, 1_700_000_000, 1);
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);

    let update = s1_update();
    let pkt = packet(&update, 1_700_000_001, 2);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);

    let f = a.flow(0);
    assert!(f.stat.contains(BgpStat::BGP));
    assert_eq!(f.num_t[BgpMessageType::Open.index()], 1);
    assert_eq!(f.num_t[BgpMessageType::Update.index()], 1);
    assert_eq!(f.version, 4);
    assert_eq!(f.src_as, 65000);
    assert_eq!(f.htime, 90);
    assert_eq!(f.src_id, u32::from(Ipv4Addr::new(10, 0, 0, 1)));
    assert_eq!(f.nadver, 1);
    assert_eq!(f.advpref, 1 << 7); // mask 8

    let entry = a
        .routing_table()
        .get(&BgpNlri { mask: 8, prefix: [10, 0, 0, 0] })
        .expect("route must be in the table");
    assert_eq!(entry.nexthop, u32::from(Ipv4Addr::new(10, 0, 0, 1)));
    assert_eq!(entry.orig_as, 65001);
    assert_eq!(entry.nas, 2);
}

#[test]
fn test_moas_detection() {
    let (mut a, _, moas) = analyzer();
    let flow = flow_view(7);
    let mut ctx = PacketContext::default();

    let open = open_msg(65000, 90, [10, 0, 0, 1]);
    let pkt = packet(&open, 1_700_000_000, 1);
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);

    let pkt_bytes = s1_update();
    a.on_layer4(&packet(&pkt_bytes, 1_700_000_001, 2), &flow, 0, &mut ctx);

    // same prefix, different origin AS
    let mut attrs = attr(0x40, 1, &[0]);
    attrs.extend(attr(0x40, 2, &as_path_16(&[(BGP_AS_SEQUENCE, &[65000, 65002])])));
    attrs.extend(attr(0x40, 3, &[10, 0, 0, 1]));
    let update2 = update_msg(&[], &attrs, &[(8, &[10])]);
    a.on_layer4(&packet(&update2, 1_700_000_002, 3), &flow, 0, &mut ctx);

    assert!(a.flow(0).aflgs.contains(BgpAnomaly::MOAS));
    let log = moas.contents();
    let line = log.lines().nth(1).expect("one MOAS line after the header");
    assert_eq!(line, "10.0.0.0\t8\t65001\t65002\t7\t3\t1");
}

#[test]
fn test_withdraw_removes_route() {
    let (mut a, _, _) = analyzer();
    let flow = flow_view(1);
    let mut ctx = PacketContext::default();

    let open = open_msg(65000, 90, [10, 0, 0, 1]);
    let pkt = packet(&open, 1_700_000_000, 1);
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);

    let adv = s1_update();
    a.on_layer4(&packet(&adv, 1_700_000_001, 2), &flow, 0, &mut ctx);
    assert_eq!(a.routing_table().len(), 1);

    let wd = update_msg(&[(8, &[10])], &[], &[]);
    a.on_layer4(&packet(&wd, 1_700_000_002, 3), &flow, 0, &mut ctx);

    assert!(a.routing_table().is_empty());
    let f = a.flow(0);
    assert_eq!(f.nwdrwn, 1);
    assert_eq!(f.wdrnpref, 1 << 7);
}

#[test]
fn test_marker_resync() {
    let (mut a, _, _) = analyzer();
    let flow = flow_view(1);
    let mut ctx = PacketContext::default();

    // garbage before a valid KEEPALIVE
    let mut bytes = vec![0xaa; 7];
    bytes.extend(message(4, &[]));
    let pkt = packet(&bytes, 1_700_000_000, 1);
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);

    assert_eq!(a.flow(0).num_t[BgpMessageType::KeepAlive.index()], 1);
}

#[test]
fn test_missing_marker_sets_conn_sync() {
    let (mut a, _, _) = analyzer();
    let flow = flow_view(1);
    let mut ctx = PacketContext::default();

    let bytes = vec![0x00; 64];
    let pkt = packet(&bytes, 1_700_000_000, 1);
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);

    assert!(a.flow(0).stat.contains(BgpStat::CONN_SYNC));
}

#[test]
fn test_bad_length_is_fatal_for_packet() {
    let (mut a, _, _) = analyzer();
    let flow = flow_view(1);
    let mut ctx = PacketContext::default();

    let mut bytes = vec![0xff; 16];
    bytes.extend_from_slice(&10u16.to_be_bytes()); // < 19
    bytes.push(4);
    let pkt = packet(&bytes, 1_700_000_000, 1);
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);

    assert!(a.flow(0).stat.contains(BgpStat::BAD_LEN));
}

#[test]
fn test_bad_type_skips_record_only() {
    let (mut a, _, _) = analyzer();
    let flow = flow_view(1);
    let mut ctx = PacketContext::default();

    let mut bytes = message(9, &[0u8; 4]); // type out of range
    bytes.extend(message(4, &[])); // followed by a valid KEEPALIVE
    let pkt = packet(&bytes, 1_700_000_000, 1);
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);

    let f = a.flow(0);
    assert!(f.stat.contains(BgpStat::BAD_TYPE));
    assert_eq!(f.num_t[BgpMessageType::KeepAlive.index()], 1);
}

#[test]
fn test_invalid_mask_flags_invmask() {
    let (mut a, _, _) = analyzer();
    let flow = flow_view(1);
    let mut ctx = PacketContext::default();

    let update = update_msg(&[], &[], &[(33, &[10, 0, 0, 0, 0])]);
    let pkt = packet(&update, 1_700_000_000, 1);
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);

    assert!(a.flow(0).stat.contains(BgpStat::INVMASK));
}

#[test]
fn test_bogon_and_specific_prefix_anomalies() {
    let (mut a, anom, _) = analyzer();
    let flow = flow_view(3);
    let mut ctx = PacketContext::default();

    let mut attrs = attr(0x40, 1, &[0]);
    attrs.extend(attr(0x40, 2, &as_path_16(&[(BGP_AS_SEQUENCE, &[65000, 64512])])));
    attrs.extend(attr(0x40, 3, &[10, 0, 0, 1]));
    // 192.168.1.0/26 is both a bogon and more specific than /24
    let update = update_msg(&[], &attrs, &[(26, &[192, 168, 1, 0])]);
    let pkt = packet(&update, 1_700_000_000, 1);
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);

    let f = a.flow(0);
    assert!(f.aflgs.contains(BgpAnomaly::BOGON));
    assert!(f.aflgs.contains(BgpAnomaly::SPEC_PREF));
    assert!(f.aflgs.contains(BgpAnomaly::RESRVD_AS));

    let log = anom.contents();
    assert!(log.contains("BOGON\t3\t1\t1\t192.168.1.0\t26"));
    assert!(log.contains("SPEC24\t3\t1\t1\t192.168.1.0\t26"));
    assert!(log.contains("PRIVAS\t3\t1\t1\t64512"));
}

#[test]
fn test_keepalive_iat_statistics() {
    let (mut a, _, _) = analyzer();
    let flow = flow_view(1);
    let mut ctx = PacketContext::default();

    let ka = message(4, &[]);
    let pkt = packet(&ka, 100, 1);
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);
    a.on_layer4(&packet(&ka, 130, 2), &flow, 0, &mut ctx);
    a.on_layer4(&packet(&ka, 190, 3), &flow, 0, &mut ctx);

    let f = a.flow(0);
    assert_eq!(f.num_t[BgpMessageType::KeepAlive.index()], 3);
    assert_eq!(f.min_iat_ka, 30.0);
    assert_eq!(f.max_iat_ka, 60.0);
    assert_eq!(f.avg_iat_ka, 45.0);
}

#[test]
fn test_open_capabilities() {
    let (mut a, _, _) = analyzer();
    let flow = flow_view(1);
    let mut ctx = PacketContext::default();

    // optional parameter: capability 65 (4-octet AS), AS 65000
    let mut body = vec![4];
    body.extend_from_slice(&65000u16.to_be_bytes());
    body.extend_from_slice(&90u16.to_be_bytes());
    body.extend_from_slice(&[10, 0, 0, 1]);
    let cap = {
        let mut c = vec![65u8, 4];
        c.extend_from_slice(&65000u32.to_be_bytes());
        c
    };
    body.push((cap.len() + 2) as u8); // opt params length
    body.push(2); // parameter type: capability
    body.push(cap.len() as u8);
    body.extend_from_slice(&cap);
    let open = message(1, &body);

    let pkt = packet(&open, 1_700_000_000, 1);
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);

    let f = a.flow(0);
    assert!(f.caps.contains(BgpCaps::AS4));
    assert!(!f.stat.contains(BgpStat::AS_MISMATCH));
    assert_eq!(f.src_as, 65000);
}

#[test]
fn test_as4_mismatch() {
    let (mut a, _, _) = analyzer();
    let flow = flow_view(1);
    let mut ctx = PacketContext::default();

    let mut body = vec![4];
    body.extend_from_slice(&65000u16.to_be_bytes());
    body.extend_from_slice(&90u16.to_be_bytes());
    body.extend_from_slice(&[10, 0, 0, 1]);
    let cap = {
        let mut c = vec![65u8, 4];
        c.extend_from_slice(&3_200_000_000u32.to_be_bytes());
        c
    };
    body.push((cap.len() + 2) as u8);
    body.push(2);
    body.push(cap.len() as u8);
    body.extend_from_slice(&cap);
    let open = message(1, &body);

    let pkt = packet(&open, 1_700_000_000, 1);
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);

    let f = a.flow(0);
    assert!(f.stat.contains(BgpStat::AS_MISMATCH));
    assert_eq!(f.src_as, 3_200_000_000);
}

#[test]
fn test_terminate_row_matches_schema() {
    let (mut a, _, _) = analyzer();
    let flow = flow_view(1);
    let mut ctx = PacketContext::default();

    let open = open_msg(65000, 90, [10, 0, 0, 1]);
    let pkt = packet(&open, 1_700_000_000, 1);
    a.on_new_flow(&pkt, &flow, 0);
    a.on_layer4(&pkt, &flow, 0, &mut ctx);
    a.on_layer4(&packet(&s1_update(), 1_700_000_001, 2), &flow, 0, &mut ctx);

    let mut out = crate::output::OutputBuffer::new();
    a.on_flow_terminate(0, &flow, &mut out);

    let schema = a.print_header();
    let tr = crate::output::TextTranslator::new(crate::output::TextFormat::default());
    let mut line = Vec::new();
    assert!(tr.write_row(&schema, out.as_slice(), &mut line).unwrap());
    let line = String::from_utf8(line).unwrap();
    assert!(line.starts_with("0x0001\t")); // BGP_STAT_BGP
    assert!(line.contains("\t65000_0\t")); // src/dst AS
    assert!(line.contains("\t10.0.0.1_0.0.0.0\t")); // src/dst router id
}
